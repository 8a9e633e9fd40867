//! The envelope wire unit and the capability traits typed requests implement.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, RequestId};

/// One wire-level message: type tag, opaque payload, correlation key.
///
/// The remote side echoes `request_id` unchanged in its response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub request_id: RequestId,
}

impl Envelope {
    pub fn new(type_tag: impl Into<String>, payload: Vec<u8>, request_id: RequestId) -> Self {
        Self {
            type_tag: type_tag.into(),
            payload,
            request_id,
        }
    }

    /// Build the outbound envelope for a typed request.
    pub fn for_request<R: Request>(request: &R, request_id: RequestId) -> Result<Self, ProtocolError> {
        Ok(Self::new(R::TYPE, request.encode()?, request_id))
    }

    /// Build a JSON-encoded envelope (handshake and agent replies).
    pub fn json<T: Serialize>(
        type_tag: impl Into<String>,
        value: &T,
        request_id: RequestId,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(type_tag, serde_json::to_vec(value)?, request_id))
    }

    /// Size of the JSON body this envelope frames to, without serializing the payload.
    pub fn wire_len(&self) -> Result<usize, ProtocolError> {
        let skeleton = serde_json::to_vec(&Envelope::new(
            self.type_tag.clone(),
            Vec::new(),
            self.request_id,
        ))?;
        let payload = base64::encoded_len(self.payload.len(), true).ok_or(
            ProtocolError::EnvelopeTooLarge {
                size: usize::MAX,
                max: crate::MAX_ENVELOPE_BYTES,
            },
        )?;
        Ok(skeleton.len() + payload)
    }

    /// Decode a JSON payload after checking the tag.
    pub fn decode_json<T: DeserializeOwned>(&self, expected_tag: &str) -> Result<T, ProtocolError> {
        if self.type_tag != expected_tag {
            return Err(ProtocolError::TypeMismatch {
                expected: expected_tag.to_string(),
                got: self.type_tag.clone(),
            });
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// A request that can be issued over a control channel.
///
/// The tag selects the schema on the remote side and is echoed on the
/// response envelope, where it selects [`Request::Response`]'s decoder.
pub trait Request: Serialize {
    const TYPE: &'static str;

    type Response: Response;

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A result decoded from an inbound envelope payload.
pub trait Response: DeserializeOwned + Send + 'static {
    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Serialize/deserialize Vec<u8> as base64 string.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
