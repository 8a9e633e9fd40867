//! The control channel -- issue, deliver, close, fail, and the dispatch loop.
//!
//! Lock discipline:
//!   - `pending` (exclusive): ID allocation + registration, lookup + removal on
//!     delivery, close-time sweep. Never held across an await on the pipe.
//!   - `status` (shared-read): lifecycle state and last fatal error.
//!   - `writer` (exclusive, held across the write): one envelope at a time.
//!   - `reader`: claimed once by the dispatch loop, borrowed by the handshake
//!     before that.

use std::sync::Arc;

use remproc_protocol::{Envelope, ProtocolError, Request, RequestId, MAX_ENVELOPE_BYTES};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::{ChannelError, TransportError};
use crate::pending::{bind_slot, slot_for, CompletionSlot, PendingTable, Resolution};
use crate::pipe::{PipeReader, PipeWriter};
use crate::state::ChannelState;

#[derive(Debug)]
struct Status {
    state: ChannelState,
    last_error: Option<Arc<ChannelError>>,
}

/// Correlates typed requests with their results over one duplex pipe.
pub struct ControlChannel<R, W> {
    status: RwLock<Status>,
    pending: Mutex<PendingTable>,
    pub(crate) reader: Mutex<Option<R>>,
    pub(crate) writer: Mutex<Option<W>>,
    has_reader: bool,
    has_writer: bool,
    shutdown: broadcast::Sender<()>,
}

impl<R: PipeReader, W: PipeWriter> ControlChannel<R, W> {
    /// Create a channel in [`ChannelState::New`] over both pipe halves.
    pub fn new(reader: R, writer: W) -> Self {
        Self::from_parts(Some(reader), Some(writer))
    }

    /// Create a channel from optional halves. A channel missing either half
    /// can change state but every `issue` fails with `InternalInconsistency`.
    pub fn from_parts(reader: Option<R>, writer: Option<W>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            status: RwLock::new(Status {
                state: ChannelState::New,
                last_error: None,
            }),
            pending: Mutex::new(PendingTable::new()),
            has_reader: reader.is_some(),
            has_writer: writer.is_some(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            shutdown,
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub async fn state(&self) -> ChannelState {
        self.status.read().await.state
    }

    pub async fn is_open(&self) -> bool {
        self.state().await.is_open()
    }

    /// The most recent fatal error. `None` while healthy or after a clean close.
    pub async fn last_error(&self) -> Option<Arc<ChannelError>> {
        self.status.read().await.last_error.clone()
    }

    pub async fn last_issued_id(&self) -> RequestId {
        self.pending.lock().await.last_issued()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// IDs of in-flight requests, ascending (diagnostics).
    pub async fn pending_ids(&self) -> Vec<RequestId> {
        self.pending.lock().await.ids()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn transition(&self, next: ChannelState) -> Result<(), ChannelError> {
        let mut status = self.status.write().await;
        if !status.state.can_transition(next) {
            return Err(ChannelError::InvalidTransition {
                from: status.state,
                to: next,
            });
        }
        tracing::debug!(from = status.state.name(), to = next.name(), "channel: state change");
        status.state = next;
        Ok(())
    }

    /// New → Waiting. The transport has started its handshake.
    pub async fn begin_handshake(&self) -> Result<(), ChannelError> {
        self.transition(ChannelState::Waiting).await
    }

    /// Waiting → Open. Requests may be issued from here on.
    pub async fn complete_handshake(&self) -> Result<(), ChannelError> {
        self.transition(ChannelState::Open).await?;
        tracing::info!("channel: open");
        Ok(())
    }

    /// Close the channel and cancel every pending request. Idempotent.
    pub async fn close(&self) {
        {
            let mut status = self.status.write().await;
            if status.state.is_terminating() {
                return;
            }
            status.state = ChannelState::Closing;
        }
        let _ = self.shutdown.send(());

        let cancelled = self.pending.lock().await.close();
        let count = cancelled.len();
        for (request_id, entry) in cancelled {
            tracing::debug!(request_id, type_tag = entry.type_tag(), "channel: cancelling pending request");
            entry.resolve(Resolution::Cancelled);
        }

        self.status.write().await.state = ChannelState::Closed;
        tracing::info!(cancelled = count, "channel: closed");
    }

    /// Record a fatal error and close.
    pub async fn fail(&self, error: ChannelError) {
        tracing::warn!(error = %error, "channel: fatal error");
        self.status.write().await.last_error = Some(Arc::new(error));
        self.close().await;
    }

    // ========================================================================
    // Issue
    // ========================================================================

    /// Issue a request and return the slot its result will arrive on.
    ///
    /// If the channel closes while the envelope is still being written, the
    /// write is abandoned and the caller gets `RequestCancelled`.
    pub async fn issue<Q: Request>(
        &self,
        request: &Q,
    ) -> Result<CompletionSlot<Q::Response>, ChannelError> {
        let mut shutdown = self.shutdown.subscribe();
        if !self.is_open().await {
            return Err(ChannelError::ChannelNotOpen);
        }
        if !self.has_reader || !self.has_writer {
            return Err(ChannelError::InternalInconsistency(
                "control channel is missing a pipe half",
            ));
        }

        // Sized with the widest possible ID; the real one can only be shorter.
        let mut envelope =
            Envelope::for_request(request, RequestId::MAX).map_err(ChannelError::Encode)?;
        let size = envelope.wire_len().map_err(ChannelError::Encode)?;
        if size > MAX_ENVELOPE_BYTES {
            return Err(ChannelError::Encode(ProtocolError::EnvelopeTooLarge {
                size,
                max: MAX_ENVELOPE_BYTES,
            }));
        }

        let (entry, rx) = slot_for::<Q>();
        let (request_id, pending) = {
            let mut table = self.pending.lock().await;
            let id = table.register(entry).ok_or(ChannelError::ChannelNotOpen)?;
            (id, table.len())
        };
        envelope.request_id = request_id;
        tracing::debug!(request_id, type_tag = Q::TYPE, pending, "channel: issuing request");

        let written = tokio::select! {
            written = self.write(envelope) => written,
            _ = shutdown.recv() => {
                tracing::debug!(request_id, "channel: closed during write");
                return Err(ChannelError::RequestCancelled);
            }
        };
        if let Err(e) = written {
            self.fail(ChannelError::Transport(e.clone())).await;
            return Err(ChannelError::Transport(e));
        }

        Ok(bind_slot(request_id, rx))
    }

    /// Issue a request and wait for its result.
    pub async fn call<Q: Request>(&self, request: &Q) -> Result<Q::Response, ChannelError> {
        self.issue(request).await?.wait().await
    }

    pub(crate) async fn write(&self, envelope: Envelope) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => w.write(envelope).await,
            None => Err(TransportError::Closed),
        }
    }

    // ========================================================================
    // Deliver + dispatch loop
    // ========================================================================

    /// Hand an inbound envelope to the slot waiting on its request ID.
    /// Unknown, stale and duplicate IDs are dropped.
    pub(crate) async fn deliver(&self, envelope: Envelope) {
        let request_id = envelope.request_id;
        let entry = self.pending.lock().await.take(request_id);
        match entry {
            Some(entry) => {
                tracing::debug!(
                    request_id,
                    type_tag = %envelope.type_tag,
                    expected = entry.type_tag(),
                    "channel: delivering result"
                );
                entry.resolve(Resolution::Delivered(envelope));
            }
            None => {
                tracing::debug!(
                    request_id,
                    type_tag = %envelope.type_tag,
                    "channel: no pending request, discarding"
                );
            }
        }
    }

    /// Read the pipe until it fails or the channel closes.
    ///
    /// Only starts on an Open channel; otherwise the reader is left in place
    /// and `ChannelNotOpen` is returned. Claims the reader; a second concurrent
    /// loop gets `InternalInconsistency`.
    pub async fn run_dispatch(&self) -> Result<(), ChannelError> {
        let mut shutdown = self.shutdown.subscribe();
        if !self.is_open().await {
            return Err(ChannelError::ChannelNotOpen);
        }
        let mut reader = self.reader.lock().await.take().ok_or(
            ChannelError::InternalInconsistency("pipe reader missing or already claimed"),
        )?;
        tracing::debug!("dispatch: started");

        loop {
            if !self.is_open().await {
                break;
            }
            tokio::select! {
                read = reader.read() => match read {
                    Ok(envelope) => self.deliver(envelope).await,
                    Err(e) => {
                        self.fail(ChannelError::Transport(e)).await;
                        break;
                    }
                },
                _ = shutdown.recv() => break,
            }
        }

        tracing::debug!("dispatch: stopped");
        Ok(())
    }

    /// Spawn [`ControlChannel::run_dispatch`] on the tokio runtime.
    pub fn spawn_dispatch(self: &Arc<Self>) -> JoinHandle<Result<(), ChannelError>> {
        let channel = Arc::clone(self);
        tokio::spawn(async move { channel.run_dispatch().await })
    }
}
