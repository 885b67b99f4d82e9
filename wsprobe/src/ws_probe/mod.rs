pub mod endpoint;
pub mod probe;
pub mod result;
pub mod state;
pub mod transcript;

pub mod prelude {
    pub use super::endpoint::{Endpoint, EndpointError, Scheme};
    pub use super::probe::{ProbeOptions, probe_endpoint};
    pub use super::result::{CloseInfo, Outcome, PhaseTimings, ProbeError, ProbeResult};
    pub use super::state::ProbeState;
    pub use super::transcript::{Direction, Transcript, TranscriptEvent};
}

use std::fmt::Write;

/// Render an error followed by every error in its `source()` chain.
pub fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, "\n\nCaused by: {}", src);
        err = src;
    }
    s
}
