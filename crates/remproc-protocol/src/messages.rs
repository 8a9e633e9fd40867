//! Typed payloads carried inside envelopes.
//!
//! Each request type names its tag via [`Request::TYPE`]; the agent answers
//! with the same tag, or with [`ERROR`] when it cannot serve the request.

use serde::{Deserialize, Serialize};

use crate::envelope::{Request, Response};
use crate::ConnHandle;

pub const HELLO: &str = "hello";
pub const HELLO_ACK: &str = "hello_ack";
pub const PING: &str = "ping";
pub const REMOTE_IP_DIAL: &str = "remote_ip_dial";
pub const REMOTE_IP_CLOSE: &str = "remote_ip_close";
pub const ERROR: &str = "error";

// ============================================================================
// Handshake
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub magic: u32,
    pub version_min: u16,
    pub version_max: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAck {
    /// Negotiated version. 0 = rejected.
    pub version: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
}

// ============================================================================
// Ping
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResult {
    pub ok: bool,
}

impl Request for Ping {
    const TYPE: &'static str = PING;
    type Response = PingResult;
}

impl Response for PingResult {}

// ============================================================================
// Remote IP dial / close
// ============================================================================

/// Open an outbound connection from the remote agent's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIpDialRequest {
    pub network: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIpDialResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ConnHandle>,
}

impl RemoteIpDialResult {
    pub fn connected(handle: ConnHandle) -> Self {
        Self {
            success: true,
            error: None,
            handle: Some(handle),
        }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            handle: None,
        }
    }
}

impl Request for RemoteIpDialRequest {
    const TYPE: &'static str = REMOTE_IP_DIAL;
    type Response = RemoteIpDialResult;
}

impl Response for RemoteIpDialResult {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIpCloseRequest {
    pub handle: ConnHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIpCloseResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Request for RemoteIpCloseRequest {
    const TYPE: &'static str = REMOTE_IP_CLOSE;
    type Response = RemoteIpCloseResult;
}

impl Response for RemoteIpCloseResult {}

// ============================================================================
// Errors
// ============================================================================

/// Sent by the agent instead of a typed result when it cannot serve a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
