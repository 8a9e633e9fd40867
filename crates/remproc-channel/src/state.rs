//! Channel lifecycle: New → Waiting → Open → Closing → Closed.
//!
//! Transitions only move forward. There is no re-open.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelState {
    New,
    Waiting,
    Open,
    Closing,
    Closed,
}

impl ChannelState {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelState::New => "new",
            ChannelState::Waiting => "waiting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    /// Closing or Closed.
    pub fn is_terminating(&self) -> bool {
        *self >= ChannelState::Closing
    }

    /// Whether `next` is a legal step from `self`.
    ///
    /// Handshake steps are strictly sequential; close may start from any
    /// non-terminating state.
    pub fn can_transition(&self, next: ChannelState) -> bool {
        match (self, next) {
            (ChannelState::New, ChannelState::Waiting) => true,
            (ChannelState::Waiting, ChannelState::Open) => true,
            (ChannelState::Closing, ChannelState::Closed) => true,
            (current, ChannelState::Closing) => !current.is_terminating(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
