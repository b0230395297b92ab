//! Debugger-protocol replay of a recorded session.
//!
//! A [`ReplaySession`] is created per connection. It loads the record's
//! network and console streams once, then pushes protocol events to the
//! client in the pacing mode chosen at connect time.

pub mod cdp;
mod session;

pub use session::{Outbound, ReplaySession};

use rewind_api::LogError;

/// Close code sent when the connection is refused (policy violation).
pub const CLOSE_POLICY: u16 = 1008;
/// Close code sent when a running session has to abort.
pub const CLOSE_ERROR: u16 = 1011;
pub const SEEK_BACKWARD: &str = "seek-backward";

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("missing recordId")]
    MissingRecordId,

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("event not found: {0}")]
    EventNotFound(String),

    #[error("event log: {0}")]
    Log(#[from] LogError),
}

impl ReplayError {
    pub fn close_code(&self) -> u16 {
        match self {
            ReplayError::MissingRecordId | ReplayError::RecordNotFound(_) => CLOSE_POLICY,
            _ => CLOSE_ERROR,
        }
    }
}

/// How emitted events are paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacingMode {
    /// Whole snapshot at once.
    #[default]
    Immediate,
    /// Wall-clock sleeps derived from inter-event gaps.
    Timed,
    /// Driven by the record's playback clock.
    Gated,
}

impl PacingMode {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("timed") => PacingMode::Timed,
            Some("gated") => PacingMode::Gated,
            _ => PacingMode::Immediate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    pub mode: PacingMode,
    /// Always positive.
    pub speed: f64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            mode: PacingMode::Immediate,
            speed: 1.0,
        }
    }
}

impl ReplayOptions {
    /// Build from raw connection parameters. Unparseable or non-positive
    /// speeds fall back to `1.0`.
    pub fn from_params(mode: Option<&str>, speed: Option<&str>) -> Self {
        let speed = speed
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|s| *s > 0.0 && s.is_finite())
            .unwrap_or(1.0);
        Self {
            mode: PacingMode::parse(mode),
            speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_params() {
        let opts = ReplayOptions::from_params(Some("GATED"), Some(" 2.5 "));
        assert_eq!(opts.mode, PacingMode::Gated);
        assert_eq!(opts.speed, 2.5);

        let opts = ReplayOptions::from_params(Some("warp"), Some("-3"));
        assert_eq!(opts.mode, PacingMode::Immediate);
        assert_eq!(opts.speed, 1.0);

        assert_eq!(ReplayOptions::from_params(None, Some("fast")).speed, 1.0);
    }
}
