use std::fmt;

use serde::Serialize;

/// Lifecycle of a single probe connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
    TimedOut,
}

impl ProbeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProbeState::Closed | ProbeState::Failed | ProbeState::TimedOut
        )
    }

    pub fn can_transition_to(self, next: ProbeState) -> bool {
        use ProbeState::*;

        match (self, next) {
            (Idle, Connecting) | (Connecting, Open) | (Open, Closing) | (Closing, Closed) => true,
            (Connecting | Open | Closing, Failed) => true,
            (from, TimedOut) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeState::Idle => "idle",
            ProbeState::Connecting => "connecting",
            ProbeState::Open => "open",
            ProbeState::Closing => "closing",
            ProbeState::Closed => "closed",
            ProbeState::Failed => "failed",
            ProbeState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Tracks the current [`ProbeState`] and refuses transitions the state
/// machine does not allow.
#[derive(Debug)]
pub struct Lifecycle {
    state: ProbeState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle {
            state: ProbeState::Idle,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Move to `next`. Returns false and leaves the state untouched when the
    /// transition is not allowed.
    pub fn advance(&mut self, next: ProbeState) -> bool {
        if !self.state.can_transition_to(next) {
            log::warn!("Ignoring illegal probe transition {} -> {}", self.state, next);
            return false;
        }
        log::debug!("Probe state {} -> {}", self.state, next);
        self.state = next;
        true
    }
}
