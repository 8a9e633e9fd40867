//! Remproc Channel -- request/response correlation over one duplex pipe.
//!
//! ```text
//!   issue(req) ──► PendingTable.register ──► writer.write(envelope)
//!        │                 │
//!        ▼                 ▼
//!   CompletionSlot ◄── resolve(Delivered | Cancelled)
//!                          ▲
//!   dispatch loop ── reader.read() ──► deliver(envelope)
//! ```
//!
//! Only the dispatch loop reads the pipe. Any number of tasks may issue.
//! A transport fault on either half closes the whole channel and cancels
//! every pending slot.

pub mod channel;
pub mod dialer;
pub mod error;
pub mod handshake;
pub mod pending;
pub mod pipe;
pub mod state;
pub mod stream;

pub use channel::ControlChannel;
pub use dialer::{ping, RemoteIpConn, RemoteIpDialer};
pub use error::{ChannelError, TransportError};
pub use handshake::accept_handshake;
pub use pending::{CompletionSlot, PendingTable, SlotOutcome};
pub use pipe::{memory_pipe, MemoryReader, MemoryWriter, PipeReader, PipeWriter};
pub use state::ChannelState;
pub use stream::{stream_pipe, StreamReader, StreamWriter};
