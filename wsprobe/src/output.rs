use std::borrow::Cow;
use std::fmt::Write;

use unicode_truncate::UnicodeTruncateStr;

use crate::ws_probe::prelude::*;

const DIRECTION_WIDTH: usize = 8;
const PAYLOAD_WIDTH: usize = 72;

fn to_fixed_width(input: &str, width: usize) -> String {
    let (truncated, _) = input.unicode_truncate(width);
    format!("{:<width$}", truncated, width = width)
}

/// Replace control characters with their escaped form so a payload always
/// fits on one line.
fn escape_controls(input: &str) -> Cow<'_, str> {
    if !input.chars().any(char::is_control) {
        return Cow::Borrowed(input);
    }
    let mut escaped = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        if c.is_control() {
            escaped.extend(c.escape_debug());
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

/// Shorten `input` to at most `width` columns, marking the cut with `…`.
/// Control characters are escaped first.
fn truncate_payload(input: &str, width: usize) -> String {
    let input = escape_controls(input);
    let (truncated, used) = input.unicode_truncate(width);
    if truncated.len() == input.len() {
        return input.into_owned();
    }
    let (truncated, _) = input.unicode_truncate(used.saturating_sub(1));
    format!("{truncated}…")
}

fn marker(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "✅",
        Outcome::Timeout => "⏱",
        Outcome::ConnectionError => "❌",
    }
}

fn millis(seconds: Option<f64>) -> String {
    seconds
        .map(|s| format!("{:.2}ms", s * 1000.0))
        .unwrap_or_else(|| "N/A".to_string())
}

/// Human readable report: a summary line followed by one line per
/// transcript event.
pub fn render_text(result: &ProbeResult) -> String {
    let mut out = String::new();

    let _ = write!(
        out,
        "{} URL: {}, Outcome: {}, Elapsed: {:.2}ms, DNS: {}, Connect: {}, Handshake: {}, Cert: {}",
        marker(result.outcome),
        result.url,
        result.outcome,
        result.total_probe_time * 1000.0,
        millis(result.timings.dns),
        millis(result.timings.connect),
        millis(result.timings.handshake),
        result
            .cert_validity_days
            .map(|d| format!("{d}d"))
            .unwrap_or_else(|| "N/A".to_string())
    );

    if let Some(error) = &result.error {
        let _ = write!(out, "\n   Error: {error}");
    }
    if let Some(close) = &result.close {
        let _ = write!(out, "\n   Closed by peer: {} {}", close.code, close.reason);
    }

    let _ = write!(
        out,
        "\n   Transcript: {} sent, {} received",
        result.transcript.sent().count(),
        result.transcript.received().count()
    );
    for event in result.transcript.events() {
        let direction = match (event.direction, event.binary) {
            (Direction::Sent, _) => "→ sent".to_string(),
            (Direction::Received, false) => "← recv".to_string(),
            (Direction::Received, true) => "← bin".to_string(),
        };
        let _ = write!(
            out,
            "\n   +{:>9.3}s {} {}",
            event.offset_seconds,
            to_fixed_width(&direction, DIRECTION_WIDTH),
            truncate_payload(&event.payload, PAYLOAD_WIDTH)
        );
    }

    out
}

/// The whole result, transcript included, as pretty-printed JSON.
pub fn render_json(result: &ProbeResult) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(result)
}
