//! Channel State Machine
//!
//! Defines valid connection state transitions for a broker channel.

use std::fmt;

/// Connection state of a single channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No link exists
    #[default]
    Disconnected,
    /// Link task spawned, socket not open yet
    Connecting,
    /// Socket open
    Open,
    /// Registration acknowledged (device channel only)
    Registered,
    /// Socket closed by either side
    Closed,
    /// Link failed (connect or I/O error)
    Errored,
}

impl ChannelState {
    /// A link task exists for this channel
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Registered)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Registered => "registered",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTransition {
    /// Client asked to connect
    Connect,
    /// Socket opened
    Opened,
    /// Registration acknowledged
    Registered,
    /// Socket closed
    Closed,
    /// Link failed
    Failed,
    /// Client asked to disconnect
    Disconnect,
}

/// Rejected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {event:?} from {from}")]
pub struct TransitionError {
    pub from: ChannelState,
    pub event: ChannelTransition,
}

/// The state machine for one channel
#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    current_state: ChannelState,
    supports_registration: bool,
}

impl ChannelStateMachine {
    /// State machine for a receive-only channel
    pub fn receive_only() -> Self {
        Self {
            current_state: ChannelState::Disconnected,
            supports_registration: false,
        }
    }

    /// State machine for a channel that requires a registration handshake
    pub fn with_registration() -> Self {
        Self {
            current_state: ChannelState::Disconnected,
            supports_registration: true,
        }
    }

    /// Get current state
    pub fn state(&self) -> ChannelState {
        self.current_state
    }

    /// Process an event, moving to the next state if the transition is valid
    pub fn process_event(&mut self, event: ChannelTransition) -> Result<ChannelState, TransitionError> {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                Ok(state)
            }
            None => Err(TransitionError {
                from: self.current_state,
                event,
            }),
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: ChannelTransition) -> Option<ChannelState> {
        use ChannelState::*;
        use ChannelTransition as T;

        match (self.current_state, event) {
            // Disconnect is always accepted
            (_, T::Disconnect) => Some(Disconnected),

            (Disconnected | Closed | Errored, T::Connect) => Some(Connecting),
            (Connecting, T::Opened) => Some(Open),

            (Open | Registered, T::Registered) if self.supports_registration => Some(Registered),

            (Connecting | Open | Registered, T::Closed) => Some(Closed),
            (Connecting | Open | Registered, T::Failed) => Some(Errored),

            _ => None,
        }
    }
}
