//! Pipe halves over any byte stream (TCP, Unix sockets, stdio).
//!
//! Framing is [`EnvelopeCodec`]: 4-byte big-endian length prefix + JSON.

use bytes::BytesMut;
use remproc_protocol::{Envelope, EnvelopeCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;
use crate::pipe::{PipeReader, PipeWriter};

pub struct StreamReader<T> {
    inner: T,
    buf: BytesMut,
}

pub struct StreamWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T> StreamReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }
}

impl<T> StreamWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }
}

impl<T: AsyncRead + Unpin + Send + 'static> PipeReader for StreamReader<T> {
    async fn read(&mut self) -> Result<Envelope, TransportError> {
        loop {
            if let Some(envelope) = EnvelopeCodec.decode(&mut self.buf)? {
                return Ok(envelope);
            }
            // EOF, whether between frames or inside one.
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Err(TransportError::Closed);
            }
        }
    }
}

impl<T: AsyncWrite + Unpin + Send + 'static> PipeWriter for StreamWriter<T> {
    async fn write(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        self.buf.clear();
        EnvelopeCodec.encode(envelope, &mut self.buf)?;
        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Split a byte stream into pipe halves.
pub fn stream_pipe<T>(io: T) -> (StreamReader<ReadHalf<T>>, StreamWriter<WriteHalf<T>>)
where
    T: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(io);
    (StreamReader::new(read), StreamWriter::new(write))
}
