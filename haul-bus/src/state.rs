//! Channel lifecycle.

use std::fmt;
use std::time::Duration;

/// Lifecycle of a context's listening channel.
///
/// `Absent → Initializing → Open`, with construction failures moving to
/// `Error` and back to `Initializing` after a backoff, until the retry budget
/// is spent. `Closed` means the open channel stopped delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Never listened, or torn down.
    #[default]
    Absent,
    /// Constructing the transport; `attempt` is zero-based.
    Initializing { attempt: u32 },
    Open,
    /// `attempts` consecutive construction failures. `retry_in` is `None`
    /// once the bus has given up.
    Error {
        attempts: u32,
        retry_in: Option<Duration>,
    },
    Closed,
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    /// The bus gave up and waits for a manual `listen()`.
    pub fn is_terminal_error(&self) -> bool {
        matches!(self, ChannelState::Error { retry_in: None, .. })
    }

    /// A retry chain is running.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ChannelState::Initializing { .. } | ChannelState::Error { retry_in: Some(_), .. }
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Absent => write!(f, "absent"),
            ChannelState::Initializing { attempt } => write!(f, "initializing (attempt {})", attempt + 1),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Error {
                attempts,
                retry_in: Some(delay),
            } => write!(f, "error after {} attempts, retry in {}ms", attempts, delay.as_millis()),
            ChannelState::Error {
                attempts,
                retry_in: None,
            } => write!(f, "error after {} attempts, gave up", attempts),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}
