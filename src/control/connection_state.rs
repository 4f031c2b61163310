use std::fmt::{Display, Formatter};
use tracing::{info, warn};

/// Lifecycle of a logical connection. Transitions are one-directional except for
///  `Connected` <-> `Reconnecting`, and every state can transition to `Closed`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    /// not in use, either because it is disabled or because another transport won
    Deactivated,
    /// waiting for the next connection attempt
    Wanted,
    FirstAttempt,
    /// connection was lost, the socket is about to be closed and re-established
    Reconnecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionEvent {
    Enable,
    AttemptStarted,
    AttemptFailed,
    Established,
    /// keep-alive failed repeatedly, or the socket reported an error
    Lost,
    /// the socket of a lost connection was closed, and a new attempt is due
    SocketClosed,
    /// another transport connected first
    Deactivate,
    Close,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub struct ConnectionStateMachine {
    name: &'static str,
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn new(name: &'static str) -> ConnectionStateMachine {
        ConnectionStateMachine {
            name,
            state: ConnectionState::Deactivated,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies an event and returns the new state. Events that make no sense in the current state
    ///  leave it unchanged.
    pub fn on_event(&mut self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent::*;
        use ConnectionState::*;

        let next = match (self.state, event) {
            (Closed, _) => Closed,
            (_, Close) => Closed,
            (Deactivated, Enable) => Wanted,
            (Wanted, AttemptStarted) => FirstAttempt,
            (FirstAttempt, AttemptFailed) => Wanted,
            (FirstAttempt, Established) => Connected,
            (Reconnecting, Established) => Connected,
            (Connected, Lost) => Reconnecting,
            (Reconnecting, SocketClosed) => Wanted,
            (_, Deactivate) => Deactivated,
            (current, Enable) => current,
            (current, event) => {
                warn!("{}: ignoring event {:?} in state {}", self.name, event, current);
                current
            }
        };

        if next != self.state {
            info!("{}: {} -> {}", self.name, self.state, next);
            self.state = next;
        }
        next
    }
}
