//! Hello / hello-ack exchange that moves a channel from New to Open.
//!
//! Runs before the dispatch loop starts, so it may read the pipe directly.
//! Both handshake envelopes use request ID 0.

use remproc_protocol::{
    negotiate_version, Envelope, Hello, HelloAck, ProtocolError, HANDSHAKE_REQUEST_ID, HELLO,
    HELLO_ACK, PROTOCOL_MAGIC, VERSION_MAX, VERSION_MIN,
};

use crate::channel::ControlChannel;
use crate::error::ChannelError;
use crate::pipe::{PipeReader, PipeWriter};

impl<R: PipeReader, W: PipeWriter> ControlChannel<R, W> {
    /// Propose our version range, wait for the agent's answer, open on accept.
    ///
    /// Any failure is fatal: the channel ends up Closed with the cause
    /// recorded as its last error. Returns the negotiated version.
    pub async fn handshake(&self) -> Result<u16, ChannelError> {
        self.begin_handshake().await?;

        match self.exchange_hello().await {
            Ok(version) => {
                self.complete_handshake().await?;
                tracing::info!(protocol_version = version, "handshake complete");
                Ok(version)
            }
            Err(e) => {
                let reason = match &e {
                    ChannelError::Handshake(r) => r.clone(),
                    other => other.to_string(),
                };
                self.fail(e).await;
                Err(ChannelError::Handshake(reason))
            }
        }
    }

    async fn exchange_hello(&self) -> Result<u16, ChannelError> {
        let hello = Hello {
            magic: PROTOCOL_MAGIC,
            version_min: VERSION_MIN,
            version_max: VERSION_MAX,
        };
        let envelope =
            Envelope::json(HELLO, &hello, HANDSHAKE_REQUEST_ID).map_err(ChannelError::Encode)?;
        self.write(envelope).await?;

        let reply = {
            let mut reader = self.reader.lock().await;
            let reader = reader.as_mut().ok_or(ChannelError::InternalInconsistency(
                "pipe reader missing or already claimed",
            ))?;
            reader.read().await?
        };

        if reply.request_id != HANDSHAKE_REQUEST_ID {
            return Err(ChannelError::Protocol(ProtocolError::Codec(format!(
                "expected handshake reply on request 0, got {}",
                reply.request_id
            ))));
        }
        let ack: HelloAck = reply.decode_json(HELLO_ACK).map_err(ChannelError::Protocol)?;

        if ack.version == 0 {
            return Err(ChannelError::Handshake(format!(
                "rejected: {}",
                ack.reject_reason.unwrap_or_default()
            )));
        }
        if !(VERSION_MIN..=VERSION_MAX).contains(&ack.version) {
            return Err(ChannelError::Protocol(ProtocolError::VersionMismatch {
                min: ack.version,
                max: ack.version,
                our_min: VERSION_MIN,
                our_max: VERSION_MAX,
            }));
        }
        Ok(ack.version)
    }
}

/// Agent side: read the hello, answer with an ack, return the negotiated version.
///
/// A bad magic or disjoint version range is answered with a reject before
/// returning the error.
pub async fn accept_handshake<R: PipeReader, W: PipeWriter>(
    reader: &mut R,
    writer: &mut W,
) -> Result<u16, ChannelError> {
    let envelope = reader.read().await?;
    let hello: Hello = envelope.decode_json(HELLO).map_err(ChannelError::Protocol)?;

    if hello.magic != PROTOCOL_MAGIC {
        let err = ProtocolError::InvalidMagic {
            expected: PROTOCOL_MAGIC,
            got: hello.magic,
        };
        send_ack(writer, 0, Some(err.to_string())).await?;
        return Err(ChannelError::Protocol(err));
    }

    let version = negotiate_version(hello.version_min, hello.version_max);
    if version == 0 {
        send_ack(writer, 0, Some("no compatible version".into())).await?;
        return Err(ChannelError::Protocol(ProtocolError::VersionMismatch {
            min: hello.version_min,
            max: hello.version_max,
            our_min: VERSION_MIN,
            our_max: VERSION_MAX,
        }));
    }

    send_ack(writer, version, None).await?;
    tracing::info!(protocol_version = version, "accepted handshake");
    Ok(version)
}

async fn send_ack<W: PipeWriter>(
    writer: &mut W,
    version: u16,
    reject_reason: Option<String>,
) -> Result<(), ChannelError> {
    let ack = HelloAck {
        version,
        reject_reason,
    };
    let envelope =
        Envelope::json(HELLO_ACK, &ack, HANDSHAKE_REQUEST_ID).map_err(ChannelError::Encode)?;
    writer.write(envelope).await?;
    Ok(())
}
