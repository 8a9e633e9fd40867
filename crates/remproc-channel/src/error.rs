use std::sync::Arc;
use std::time::Duration;

use remproc_protocol::ProtocolError;

use crate::state::ChannelState;

/// Failure of one half of the pipe. Always fatal to the whole channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("pipe closed by peer")]
    Closed,
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("malformed framing: {0}")]
    Framing(Arc<ProtocolError>),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(Arc::new(e))
        }
    }
}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(io) => io.into(),
            other => TransportError::Framing(Arc::new(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("control channel is not open")]
    ChannelNotOpen,
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(&'static str),
    #[error("request was cancelled")]
    RequestCancelled,
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("encode failed: {0}")]
    Encode(ProtocolError),
    #[error("decode failed: {0}")]
    Decode(ProtocolError),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("protocol violation: {0}")]
    Protocol(ProtocolError),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: ChannelState, to: ChannelState },
    #[error("no result within {0:?}")]
    DeadlineExceeded(Duration),
}
