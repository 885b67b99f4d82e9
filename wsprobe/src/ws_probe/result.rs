use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use super::state::ProbeState;
use super::transcript::Transcript;

/// How a probe ended, as seen by whoever invoked it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Timeout,
    ConnectionError,
}

impl Outcome {
    /// Process exit code for this outcome. `1` and `2` are left for
    /// configuration and usage errors.
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Timeout => 3,
            Outcome::ConnectionError => 4,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Timeout => f.write_str("timeout"),
            Outcome::ConnectionError => f.write_str("connection_error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// DNS, TCP, TLS or HTTP Upgrade failed before the connection opened.
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    /// The open connection was lost, or closed by the peer too early.
    #[error("connection dropped: {0}")]
    ConnectionDropped(String),

    #[error("send failed: {0}")]
    SendFailure(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

impl ProbeError {
    pub fn outcome(&self) -> Outcome {
        match self {
            ProbeError::Timeout(_) => Outcome::Timeout,
            ProbeError::HandshakeFailure(_)
            | ProbeError::ConnectionDropped(_)
            | ProbeError::SendFailure(_) => Outcome::ConnectionError,
        }
    }
}

/// Time spent in each connection phase, in seconds. A phase that never ran
/// stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseTimings {
    pub dns: Option<f64>,
    pub connect: Option<f64>,
    pub handshake: Option<f64>,
}

/// Close frame details sent by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl From<CloseFrame<'_>> for CloseInfo {
    fn from(frame: CloseFrame<'_>) -> Self {
        CloseInfo {
            code: frame.code.into(),
            reason: frame.reason.into_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub outcome: Outcome,
    /// Terminal lifecycle state the probe ended in.
    pub state: ProbeState,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ProbeError>,
    pub close: Option<CloseInfo>,
    pub timings: PhaseTimings,
    pub total_probe_time: f64,
    /// Days until the peer certificate expires. Only set for `wss`.
    pub cert_validity_days: Option<i64>,
    pub transcript: Transcript,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}

fn serialize_error<S>(error: &Option<ProbeError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}
