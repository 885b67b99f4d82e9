use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => f.write_str("sent"),
            Direction::Received => f.write_str("received"),
        }
    }
}

/// A single message that crossed the connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEvent {
    pub direction: Direction,
    pub payload: String,
    /// Set for inbound binary frames; their payload is decoded lossily.
    pub binary: bool,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the transcript was started.
    pub offset_seconds: f64,
}

/// Ordered log of everything sent and received during one probe.
///
/// Events can only be appended. Nothing is ever removed or reordered once
/// recorded.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    #[serde(skip)]
    started: Instant,
    events: Vec<TranscriptEvent>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Transcript {
            started: Instant::now(),
            events: Vec::new(),
        }
    }

    pub fn record_sent(&mut self, payload: &str) {
        self.push(Direction::Sent, payload.to_string(), false);
    }

    pub fn record_received(&mut self, payload: String, binary: bool) {
        self.push(Direction::Received, payload, binary);
    }

    fn push(&mut self, direction: Direction, payload: String, binary: bool) {
        log::debug!("{direction}: {payload}");
        self.events.push(TranscriptEvent {
            direction,
            payload,
            binary,
            timestamp: Utc::now(),
            offset_seconds: self.started.elapsed().as_secs_f64(),
        });
    }

    pub fn events(&self) -> &[TranscriptEvent] {
        &self.events
    }

    pub fn sent(&self) -> impl Iterator<Item = &TranscriptEvent> {
        self.events
            .iter()
            .filter(|e| e.direction == Direction::Sent)
    }

    pub fn received(&self) -> impl Iterator<Item = &TranscriptEvent> {
        self.events
            .iter()
            .filter(|e| e.direction == Direction::Received)
    }

    pub fn sent_payloads(&self) -> Vec<&str> {
        self.sent().map(|e| e.payload.as_str()).collect()
    }

    pub fn received_payloads(&self) -> Vec<&str> {
        self.received().map(|e| e.payload.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
