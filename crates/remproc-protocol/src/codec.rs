//! Length-delimited JSON codec for byte-stream pipes.
//!
//! Wire format: 4-byte big-endian length prefix + serde JSON envelope.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::{ProtocolError, MAX_ENVELOPE_BYTES};

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for framing Envelope values over a byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > MAX_ENVELOPE_BYTES {
            return Err(ProtocolError::EnvelopeTooLarge {
                size: length,
                max: MAX_ENVELOPE_BYTES,
            });
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let body = src.split_to(length);

        let envelope: Envelope = serde_json::from_slice(&body)?;
        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;

        if body.len() > MAX_ENVELOPE_BYTES {
            return Err(ProtocolError::EnvelopeTooLarge {
                size: body.len(),
                max: MAX_ENVELOPE_BYTES,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);

        Ok(())
    }
}
