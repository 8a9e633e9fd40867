//! Typed adapters over the control channel: remote dial/close and ping.
//!
//! Each adapter issues one request, waits on its slot, and turns the
//! application-level failure carried in the result into an error. None of
//! them needs anything from the engine beyond `issue`.

use std::sync::Arc;

use remproc_protocol::{
    ConnHandle, Ping, PingResult, RemoteIpCloseRequest, RemoteIpDialRequest,
};

use crate::channel::ControlChannel;
use crate::error::ChannelError;
use crate::pipe::{PipeReader, PipeWriter};

/// Opens IP connections from the remote agent's point of view.
pub struct RemoteIpDialer<R, W> {
    channel: Arc<ControlChannel<R, W>>,
}

impl<R, W> Clone for RemoteIpDialer<R, W> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
        }
    }
}

/// A socket held open by the remote agent, identified by its handle.
pub struct RemoteIpConn<R, W> {
    handle: ConnHandle,
    channel: Arc<ControlChannel<R, W>>,
}

impl<R: PipeReader, W: PipeWriter> ControlChannel<R, W> {
    /// Create a reusable dialer bound to this channel.
    pub fn remote_ip_dialer(self: &Arc<Self>) -> RemoteIpDialer<R, W> {
        RemoteIpDialer::new(Arc::clone(self))
    }
}

impl<R: PipeReader, W: PipeWriter> RemoteIpDialer<R, W> {
    pub fn new(channel: Arc<ControlChannel<R, W>>) -> Self {
        Self { channel }
    }

    /// Ask the agent to open `network`/`address` on our behalf.
    ///
    /// A refusal from the agent surfaces as [`ChannelError::Remote`]; a close
    /// of the channel while waiting as [`ChannelError::RequestCancelled`].
    pub async fn dial(&self, network: &str, address: &str) -> Result<RemoteIpConn<R, W>, ChannelError> {
        let request = RemoteIpDialRequest {
            network: network.to_string(),
            address: address.to_string(),
        };
        let result = self.channel.call(&request).await?;

        if !result.success {
            let reason = result.error.unwrap_or_else(|| "remote dial refused".into());
            tracing::debug!(network, address, reason = %reason, "remote dial refused");
            return Err(ChannelError::Remote(reason));
        }
        let handle = result.handle.ok_or_else(|| {
            ChannelError::Remote("remote dial succeeded without a connection handle".into())
        })?;

        tracing::debug!(network, address, handle, "remote dial connected");
        Ok(RemoteIpConn {
            handle,
            channel: Arc::clone(&self.channel),
        })
    }
}

impl<R: PipeReader, W: PipeWriter> RemoteIpConn<R, W> {
    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    /// Close the socket on the agent. The handle is invalid afterwards.
    pub async fn close(self) -> Result<(), ChannelError> {
        let result = self
            .channel
            .call(&RemoteIpCloseRequest {
                handle: self.handle,
            })
            .await?;
        if result.success {
            Ok(())
        } else {
            Err(ChannelError::Remote(
                result.error.unwrap_or_else(|| "remote close failed".into()),
            ))
        }
    }
}

impl<R, W> std::fmt::Debug for RemoteIpConn<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteIpConn")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Liveness probe.
pub async fn ping<R: PipeReader, W: PipeWriter>(
    channel: &ControlChannel<R, W>,
) -> Result<PingResult, ChannelError> {
    channel.call(&Ping {}).await
}
