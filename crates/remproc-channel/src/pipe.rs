//! The two halves of the abstract duplex pipe, plus an in-memory pair.
//!
//! The engine never learns what carries the envelopes. A reader yields one
//! envelope per call; a writer sends one whole envelope per call.

use std::future::Future;

use remproc_protocol::Envelope;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Inbound half. Only the dispatch loop (and the handshake before it) reads.
pub trait PipeReader: Send + 'static {
    fn read(&mut self) -> impl Future<Output = Result<Envelope, TransportError>> + Send;
}

/// Outbound half. The channel serializes calls, one envelope at a time.
pub trait PipeWriter: Send + 'static {
    fn write(&mut self, envelope: Envelope)
        -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Reading end of an in-memory pipe.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::Receiver<Envelope>,
}

/// Writing end of an in-memory pipe.
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    tx: mpsc::Sender<Envelope>,
}

impl PipeReader for MemoryReader {
    async fn read(&mut self) -> Result<Envelope, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

impl PipeWriter for MemoryWriter {
    async fn write(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Create a connected pair of duplex ends: `(local, remote)`.
///
/// Whatever one end writes the other end reads. Dropping an end's writer
/// makes the peer's reader fail with [`TransportError::Closed`].
pub fn memory_pipe(
    capacity: usize,
) -> ((MemoryReader, MemoryWriter), (MemoryReader, MemoryWriter)) {
    let (to_remote, from_local) = mpsc::channel(capacity);
    let (to_local, from_remote) = mpsc::channel(capacity);
    let local = (MemoryReader { rx: from_remote }, MemoryWriter { tx: to_remote });
    let remote = (MemoryReader { rx: from_local }, MemoryWriter { tx: to_local });
    (local, remote)
}
