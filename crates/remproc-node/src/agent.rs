//! Agent side of the control link -- accept loop and per-connection request service.
//!
//! Each accepted connection gets its own session: requests are answered in
//! arrival order, and the sockets a session opened live exactly as long as
//! the session does.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use remproc_channel::{
    accept_handshake, stream_pipe, ChannelError, PipeReader, PipeWriter, TransportError,
};
use remproc_protocol::{
    ConnHandle, Envelope, ErrorPayload, PingResult, ProtocolError, RemoteIpCloseRequest,
    RemoteIpCloseResult, RemoteIpDialRequest, RemoteIpDialResult, RequestId, ERROR, PING,
    REMOTE_IP_CLOSE, REMOTE_IP_DIAL,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::config::AgentSection;

#[derive(Debug, Clone)]
pub struct Agent {
    dial_timeout: Duration,
}

impl Agent {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }

    pub fn from_config(section: &AgentSection) -> Self {
        Self::new(section.dial_timeout())
    }

    /// Run the accept loop -- spawns a task per inbound connection.
    pub async fn listen(&self, listener: TcpListener, shutdown: broadcast::Receiver<()>) {
        let mut shutdown = shutdown;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => {
                            let agent = self.clone();
                            tokio::spawn(async move {
                                agent.serve_tcp(stream, remote).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!("failed to accept connection: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal, stopping accept loop");
                    break;
                }
            }
        }
    }

    async fn serve_tcp(&self, stream: TcpStream, remote: SocketAddr) {
        tracing::info!(%remote, "accepted control connection");
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%remote, "set_nodelay failed: {e}");
        }
        let (reader, writer) = stream_pipe(stream);
        match self.serve(reader, writer).await {
            Ok(()) => tracing::info!(%remote, "control connection closed"),
            Err(e) => tracing::warn!(%remote, "control connection failed: {e}"),
        }
    }

    /// Serve one control connection until the client hangs up.
    ///
    /// Returns `Ok` on a clean close from the client side; handshake and
    /// transport failures are returned as errors.
    pub async fn serve<R: PipeReader, W: PipeWriter>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> Result<(), ChannelError> {
        let version = accept_handshake(&mut reader, &mut writer).await?;
        tracing::debug!(version, "handshake accepted");

        let mut session = Session::new(self.dial_timeout);
        loop {
            let request = match reader.read().await {
                Ok(envelope) => envelope,
                Err(TransportError::Closed) => break,
                Err(e) => return Err(e.into()),
            };
            let reply = session.handle(&request).await?;
            writer.write(reply).await?;
        }

        tracing::debug!(open = session.conns.len(), "session ended, dropping remote sockets");
        Ok(())
    }
}

/// Per-connection state: sockets opened on the client's behalf.
struct Session {
    dial_timeout: Duration,
    conns: HashMap<ConnHandle, TcpStream>,
    last_handle: ConnHandle,
}

impl Session {
    fn new(dial_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            conns: HashMap::new(),
            last_handle: 0,
        }
    }

    /// Build the reply for one request. Always answers on the request's ID.
    async fn handle(&mut self, request: &Envelope) -> Result<Envelope, ChannelError> {
        let id = request.request_id;
        let reply = match request.type_tag.as_str() {
            PING => Envelope::json(PING, &PingResult { ok: true }, id),
            REMOTE_IP_DIAL => match request.decode_json::<RemoteIpDialRequest>(REMOTE_IP_DIAL) {
                Ok(dial) => {
                    let result = self.dial(dial).await;
                    Envelope::json(REMOTE_IP_DIAL, &result, id)
                }
                Err(e) => error_reply(id, format!("malformed {REMOTE_IP_DIAL} request: {e}")),
            },
            REMOTE_IP_CLOSE => match request.decode_json::<RemoteIpCloseRequest>(REMOTE_IP_CLOSE) {
                Ok(close) => Envelope::json(REMOTE_IP_CLOSE, &self.close(close), id),
                Err(e) => error_reply(id, format!("malformed {REMOTE_IP_CLOSE} request: {e}")),
            },
            other => {
                tracing::debug!(type_tag = other, request_id = id, "unsupported request type");
                error_reply(id, format!("unsupported request type: {other}"))
            }
        };
        reply.map_err(ChannelError::Encode)
    }

    async fn dial(&mut self, request: RemoteIpDialRequest) -> RemoteIpDialResult {
        let family: fn(&SocketAddr) -> bool = match request.network.as_str() {
            "tcp" => |_| true,
            "tcp4" => SocketAddr::is_ipv4,
            "tcp6" => SocketAddr::is_ipv6,
            other => return RemoteIpDialResult::refused(format!("unsupported network {other:?}")),
        };

        let address = request.address.as_str();
        let connect = async {
            let candidates: Vec<SocketAddr> =
                tokio::net::lookup_host(address).await?.filter(family).collect();
            if candidates.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no {} address for {address}", request.network),
                ));
            }
            TcpStream::connect(candidates.as_slice()).await
        };

        let stream = match tokio::time::timeout(self.dial_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!(address, "dial failed: {e}");
                return RemoteIpDialResult::refused(format!("dial {address}: {e}"));
            }
            Err(_) => {
                tracing::debug!(address, "dial timed out");
                return RemoteIpDialResult::refused(format!("dial {address}: timed out"));
            }
        };

        self.last_handle += 1;
        let handle = self.last_handle;
        tracing::info!(
            network = %request.network,
            address,
            handle,
            "remote socket opened"
        );
        self.conns.insert(handle, stream);
        RemoteIpDialResult::connected(handle)
    }

    fn close(&mut self, request: RemoteIpCloseRequest) -> RemoteIpCloseResult {
        match self.conns.remove(&request.handle) {
            Some(_) => {
                tracing::info!(handle = request.handle, "remote socket closed");
                RemoteIpCloseResult {
                    success: true,
                    error: None,
                }
            }
            None => RemoteIpCloseResult {
                success: false,
                error: Some(format!("unknown connection handle {}", request.handle)),
            },
        }
    }
}

fn error_reply(request_id: RequestId, message: String) -> Result<Envelope, ProtocolError> {
    Envelope::json(ERROR, &ErrorPayload { message }, request_id)
}
