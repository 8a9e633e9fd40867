//! Remproc Protocol -- envelope wire type, request/result capabilities, codec.
//!
//! One control link per remote agent. Every message in either direction is an
//! [`Envelope`]: a type tag, an opaque payload and the request ID it answers.
//! Stream transports frame envelopes as a 4-byte big-endian length prefix +
//! serde JSON.

pub mod codec;
pub mod envelope;
pub mod messages;

pub use codec::EnvelopeCodec;
pub use envelope::{Envelope, Request, Response};
pub use messages::*;

/// Protocol magic number exchanged in the handshake: 0x5EC0_11AB
pub const PROTOCOL_MAGIC: u32 = 0x5EC0_11AB;

/// Minimum supported protocol version.
pub const VERSION_MIN: u16 = 1;

/// Maximum supported protocol version.
pub const VERSION_MAX: u16 = 1;

/// Request ID reserved for the handshake exchange. Issued requests start at 1.
pub const HANDSHAKE_REQUEST_ID: RequestId = 0;

/// Maximum encoded envelope size: 16 MB.
pub const MAX_ENVELOPE_BYTES: usize = 16 * 1024 * 1024;

/// Correlation key carried by every envelope.
pub type RequestId = u64;

/// Handle of a socket held open by the remote agent.
pub type ConnHandle = u64;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid magic: expected {expected:#010x}, got {got:#010x}")]
    InvalidMagic { expected: u32, got: u32 },
    #[error("version mismatch: peer offers {min}-{max}, we support {our_min}-{our_max}")]
    VersionMismatch {
        min: u16,
        max: u16,
        our_min: u16,
        our_max: u16,
    },
    #[error("envelope too large: {size} bytes (max {max})")]
    EnvelopeTooLarge { size: usize, max: usize },
    #[error("type mismatch: expected {expected:?}, got {got:?}")]
    TypeMismatch { expected: String, got: String },
    #[error("codec error: {0}")]
    Codec(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pick the highest version both sides support, or 0 when the ranges don't overlap.
pub fn negotiate_version(peer_min: u16, peer_max: u16) -> u16 {
    let common_min = peer_min.max(VERSION_MIN);
    let common_max = peer_max.min(VERSION_MAX);
    if common_min <= common_max {
        common_max
    } else {
        0
    }
}
