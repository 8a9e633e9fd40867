//! Pending-request table and completion slots.
//!
//! The table owns the request-ID counter and the map of in-flight requests.
//! Allocating an ID and registering its slot is one call under one lock, so
//! no ID is ever in flight without a registered slot.

use std::collections::HashMap;
use std::time::Duration;

use remproc_protocol::{Envelope, ErrorPayload, ProtocolError, Request, RequestId, Response, ERROR};
use tokio::sync::oneshot;

use crate::error::ChannelError;

/// How a pending entry ended.
#[derive(Debug)]
pub enum Resolution {
    Delivered(Envelope),
    Cancelled,
}

type Resolver = Box<dyn FnOnce(Resolution) + Send>;

/// One in-flight request: the tag it was issued under and the decoder that
/// completes its slot.
pub struct PendingEntry {
    type_tag: &'static str,
    resolve: Resolver,
}

impl PendingEntry {
    pub fn new(type_tag: &'static str, resolve: impl FnOnce(Resolution) + Send + 'static) -> Self {
        Self {
            type_tag,
            resolve: Box::new(resolve),
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    pub fn resolve(self, resolution: Resolution) {
        (self.resolve)(resolution)
    }
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// Request-ID counter plus the in-flight map.
///
/// Once [`PendingTable::close`] has run the table refuses new registrations,
/// so a request racing a close can never be registered after the sweep.
#[derive(Debug, Default)]
pub struct PendingTable {
    last_issued: RequestId,
    entries: HashMap<RequestId, PendingEntry>,
    closed: bool,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next ID and register `entry` under it.
    ///
    /// Returns `None` (counter untouched) once the table is closed.
    pub fn register(&mut self, entry: PendingEntry) -> Option<RequestId> {
        if self.closed {
            return None;
        }
        let id = self.last_issued + 1;
        self.last_issued = id;
        self.entries.insert(id, entry);
        Some(id)
    }

    /// Remove the entry for `id`, if still pending.
    pub fn take(&mut self, id: RequestId) -> Option<PendingEntry> {
        self.entries.remove(&id)
    }

    /// Refuse further registrations and drain every entry, lowest ID first.
    pub fn close(&mut self) -> Vec<(RequestId, PendingEntry)> {
        self.closed = true;
        let mut ids: Vec<RequestId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    pub fn last_issued(&self) -> RequestId {
        self.last_issued
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// What a completion slot was resolved with.
#[derive(Debug)]
pub enum SlotOutcome<T> {
    /// A real result arrived and decoded.
    Delivered(T),
    /// A response arrived but could not be decoded as `T`.
    DecodeFailed(ProtocolError),
    /// The remote side answered with an error envelope.
    Remote(String),
    /// The channel closed before any result arrived.
    Cancelled,
}

impl<T> SlotOutcome<T> {
    pub fn into_result(self) -> Result<T, ChannelError> {
        match self {
            SlotOutcome::Delivered(value) => Ok(value),
            SlotOutcome::DecodeFailed(e) => Err(ChannelError::Decode(e)),
            SlotOutcome::Remote(message) => Err(ChannelError::Remote(message)),
            SlotOutcome::Cancelled => Err(ChannelError::RequestCancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SlotOutcome::Cancelled)
    }
}

/// Decode an inbound envelope as the result of a request issued under `expected_tag`.
pub fn decode_outcome<T: Response>(expected_tag: &str, envelope: Envelope) -> SlotOutcome<T> {
    if envelope.type_tag == expected_tag {
        return match T::decode(&envelope.payload) {
            Ok(value) => SlotOutcome::Delivered(value),
            Err(e) => SlotOutcome::DecodeFailed(e),
        };
    }
    if envelope.type_tag == ERROR {
        return match envelope.decode_json::<ErrorPayload>(ERROR) {
            Ok(err) => SlotOutcome::Remote(err.message),
            Err(e) => SlotOutcome::DecodeFailed(e),
        };
    }
    SlotOutcome::DecodeFailed(ProtocolError::TypeMismatch {
        expected: expected_tag.to_string(),
        got: envelope.type_tag,
    })
}

/// Single-use handle the issuer waits on.
#[derive(Debug)]
pub struct CompletionSlot<T> {
    request_id: RequestId,
    rx: oneshot::Receiver<SlotOutcome<T>>,
}

impl<T> CompletionSlot<T> {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait for the slot to resolve.
    pub async fn outcome(self) -> SlotOutcome<T> {
        // A dropped resolver means the entry left the table without a result.
        self.rx.await.unwrap_or(SlotOutcome::Cancelled)
    }

    pub async fn wait(self) -> Result<T, ChannelError> {
        self.outcome().await.into_result()
    }

    /// Like [`CompletionSlot::wait`], giving up after `timeout`.
    ///
    /// The pending entry stays registered; a late result is discarded.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<T, ChannelError> {
        match tokio::time::timeout(timeout, self.outcome()).await {
            Ok(outcome) => outcome.into_result(),
            Err(_elapsed) => Err(ChannelError::DeadlineExceeded(timeout)),
        }
    }
}

/// Build the pending entry and the unbound receiver for request type `Q`.
pub(crate) fn slot_for<Q: Request>() -> (PendingEntry, oneshot::Receiver<SlotOutcome<Q::Response>>) {
    let (tx, rx) = oneshot::channel();
    let entry = PendingEntry::new(Q::TYPE, move |resolution| {
        let outcome = match resolution {
            Resolution::Delivered(envelope) => decode_outcome::<Q::Response>(Q::TYPE, envelope),
            Resolution::Cancelled => SlotOutcome::Cancelled,
        };
        // Receiver gone means the issuer stopped waiting.
        let _ = tx.send(outcome);
    });
    (entry, rx)
}

pub(crate) fn bind_slot<T>(
    request_id: RequestId,
    rx: oneshot::Receiver<SlotOutcome<T>>,
) -> CompletionSlot<T> {
    CompletionSlot { request_id, rx }
}
