//! Peer session lifecycle states and the connection events that drive them

use std::time::Instant;

/// Session state machine
///
/// `Negotiating → Connected → Closed | Failed`, or straight from
/// `Negotiating` to `Failed` (or `Closed` on shutdown). `Closed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Offer/answer and ICE checks in progress
    Negotiating,

    /// The connection reached `connected`
    Connected {
        /// When the connection came up
        since: Instant,
    },

    /// Closed locally
    Closed,

    /// The connection reported a terminal failure
    Failed,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Negotiating, Connected { .. }) => true,
            (Negotiating, Failed) => true,
            (Negotiating, Closed) => true,

            (Connected { .. }, Closed) => true,
            (Connected { .. }, Failed) => true,

            // Terminal states
            (Closed, _) | (Failed, _) => false,

            (Connected { .. }, Connected { .. }) => false,
            (a, b) => a == b,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Negotiating => "negotiating",
            SessionState::Connected { .. } => "connected",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }

    /// How long the session has been connected, if it is
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        if let SessionState::Connected { since } = self {
            Some(since.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Lifecycle notification from the transport engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    IceGathering(IceGatheringState),
    IceConnection(IceConnectionState),
    ConnectionState(ConnectionState),
}

impl std::fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionEvent::IceGathering(s) => write!(f, "iceGatheringState {:?}", s),
            ConnectionEvent::IceConnection(s) => write!(f, "iceConnectionState {:?}", s),
            ConnectionEvent::ConnectionState(s) => write!(f, "connectionState {:?}", s),
        }
    }
}

/// Structural outcome of dispatching an event into a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Connected,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let negotiating = SessionState::Negotiating;
        let connected = SessionState::Connected {
            since: Instant::now(),
        };

        assert!(negotiating.can_transition_to(&connected));
        assert!(negotiating.can_transition_to(&SessionState::Failed));
        assert!(negotiating.can_transition_to(&SessionState::Closed));
        assert!(connected.can_transition_to(&SessionState::Closed));
        assert!(connected.can_transition_to(&SessionState::Failed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let connected = SessionState::Connected {
            since: Instant::now(),
        };

        for terminal in [SessionState::Closed, SessionState::Failed] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(&connected));
            assert!(!terminal.can_transition_to(&SessionState::Negotiating));
        }
        assert!(!SessionState::Failed.can_transition_to(&SessionState::Closed));
        assert!(!connected.can_transition_to(&SessionState::Negotiating));
    }

    #[test]
    fn test_state_checks() {
        let connected = SessionState::Connected {
            since: Instant::now(),
        };
        assert!(connected.is_connected());
        assert!(connected.connected_duration().is_some());
        assert!(SessionState::Negotiating.connected_duration().is_none());
        assert_eq!(SessionState::Failed.to_string(), "failed");
    }
}
