use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

/// Root configuration — parsed from TOML. Every field has a default, so an
/// empty file (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RewindConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub replay: ReplayConfig,

    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub notable: NotableConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP + WS API port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            bind_host: default_bind_host(),
        }
    }
}

fn default_api_port() -> u16 {
    9300
}
fn default_bind_host() -> String {
    "0.0.0.0".into()
}

/// Replay session tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// Page size used when loading a session snapshot.
    #[serde(default = "default_load_batch")]
    pub load_batch: usize,
    /// Gated-mode clock polling interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Allowed clock regression before a gated session aborts.
    #[serde(default = "default_seek_tolerance_ms")]
    pub seek_tolerance_ms: i64,
    /// Upper bound of a single timed-mode sleep.
    #[serde(default = "default_max_sleep_ms")]
    pub max_sleep_ms: u64,
    /// Bodies longer than this are truncated in body lookups.
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            load_batch: default_load_batch(),
            poll_interval_ms: default_poll_interval_ms(),
            seek_tolerance_ms: default_seek_tolerance_ms(),
            max_sleep_ms: default_max_sleep_ms(),
            max_body_chars: default_max_body_chars(),
        }
    }
}

impl ReplayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }
}

fn default_load_batch() -> usize {
    500
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_seek_tolerance_ms() -> i64 {
    10
}
fn default_max_sleep_ms() -> u64 {
    30_000
}
fn default_max_body_chars() -> usize {
    200_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// How long emitted events stay available to late joiners.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
        }
    }
}

impl LiveConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_window_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl TimelineConfig {
    /// Requested page size → `1..=max_limit`.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

fn default_limit() -> usize {
    200
}
fn default_max_limit() -> usize {
    500
}

/// Thresholds that make an ingested event "notable" for the live hub.
#[derive(Debug, Clone, Deserialize)]
pub struct NotableConfig {
    /// Requests slower than this are reported as `network-slow`.
    #[serde(default = "default_slow_ms")]
    pub slow_ms: i64,
    /// Responses at or above this status are reported as `network-http-error`.
    #[serde(default = "default_http_error_status")]
    pub http_error_status: i32,
}

impl Default for NotableConfig {
    fn default() -> Self {
        Self {
            slow_ms: default_slow_ms(),
            http_error_status: default_http_error_status(),
        }
    }
}

fn default_slow_ms() -> i64 {
    2000
}
fn default_http_error_status() -> i32 {
    400
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Ring-buffer capacity of a single `(record, kind)` stream.
    #[serde(default = "default_max_events_per_stream")]
    pub max_events_per_stream: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_events_per_stream: default_max_events_per_stream(),
        }
    }
}

fn default_max_events_per_stream() -> usize {
    100_000
}

impl RewindConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = RewindConfig::parse("").unwrap();
        assert_eq!(cfg.server.api_port, 9300);
        assert_eq!(cfg.replay.poll_interval_ms, 50);
        assert_eq!(cfg.replay.seek_tolerance_ms, 10);
        assert_eq!(cfg.live.window(), Duration::from_secs(300));
        assert_eq!(cfg.notable.slow_ms, 2000);
    }

    #[test]
    fn sections_override_individually() {
        let cfg = RewindConfig::parse(
            r#"
            [server]
            api_port = 8080

            [replay]
            max_sleep_ms = 1000

            [timeline]
            max_limit = 50
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.api_port, 8080);
        assert_eq!(cfg.server.bind_host, "0.0.0.0");
        assert_eq!(cfg.replay.max_sleep(), Duration::from_secs(1));
        assert_eq!(cfg.replay.load_batch, 500);
        assert_eq!(cfg.timeline.clamp_limit(Some(10_000)), 50);
        assert_eq!(cfg.timeline.clamp_limit(Some(0)), 1);
        assert_eq!(cfg.timeline.clamp_limit(None), 50);
    }

    #[test]
    fn example_file_matches_defaults() {
        let cfg = RewindConfig::parse(include_str!("../../../config.example.toml")).unwrap();
        assert_eq!(cfg.server.api_port, default_api_port());
        assert_eq!(cfg.replay.max_body_chars, default_max_body_chars());
        assert_eq!(cfg.storage.max_events_per_stream, default_max_events_per_stream());
        assert_eq!(cfg.timeline.max_limit, default_max_limit());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = RewindConfig::parse("[replay\nload_batch = ").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
