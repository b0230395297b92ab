use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use rewind_api::now_ms;

/// Transport state reported by the clock driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    Play,
    Pause,
    Seek,
}

impl PlaybackMode {
    /// Blank, absent or unknown values mean `Play`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("pause") => PlaybackMode::Pause,
            Some("seek") => PlaybackMode::Seek,
            _ => PlaybackMode::Play,
        }
    }
}

/// One full clock update as received from the driver. Every tick overwrites
/// the previous value for its record; nothing is merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockTick {
    pub relative_ms: i64,
    pub base_epoch_ms: i64,
    /// Explicit absolute time; non-positive counts as absent.
    pub absolute_epoch_ms: Option<i64>,
    pub mode: Option<String>,
    pub speed: Option<f64>,
}

/// Immutable clock value. Readers always see a whole snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockSnapshot {
    pub relative_ms: i64,
    pub base_epoch_ms: i64,
    /// 0 when neither an explicit absolute time nor a base epoch is known.
    pub absolute_epoch_ms: i64,
    pub mode: PlaybackMode,
    pub speed: f64,
    /// Diagnostics only; never used for ordering.
    pub updated_at_ms: i64,
}

impl ClockSnapshot {
    pub fn from_tick(tick: &ClockTick) -> Self {
        let relative_ms = tick.relative_ms.max(0);
        let base_epoch_ms = tick.base_epoch_ms.max(0);
        let absolute_epoch_ms = match tick.absolute_epoch_ms {
            Some(abs) if abs > 0 => abs,
            _ if base_epoch_ms > 0 => base_epoch_ms.saturating_add(relative_ms),
            _ => 0,
        };
        let speed = match tick.speed {
            Some(s) if s > 0.0 && s.is_finite() => s,
            _ => 1.0,
        };
        Self {
            relative_ms,
            base_epoch_ms,
            absolute_epoch_ms,
            mode: PlaybackMode::parse(tick.mode.as_deref()),
            speed,
            updated_at_ms: now_ms(),
        }
    }

    /// Absolute epoch ms up to which events are due, given the session's
    /// own baseline.
    pub fn cutoff(&self, baseline_ms: i64) -> i64 {
        if self.absolute_epoch_ms > 0 {
            self.absolute_epoch_ms
        } else {
            baseline_ms.saturating_add(self.relative_ms.max(0))
        }
    }

    pub fn is_paused(&self) -> bool {
        self.mode == PlaybackMode::Pause
    }
}

/// Per-record playback clocks. Entries are created lazily on the first tick,
/// replaced atomically on every later one and live until process exit.
#[derive(Debug, Default)]
pub struct ClockRegistry {
    clocks: RwLock<HashMap<String, Arc<ClockSnapshot>>>,
}

impl ClockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins.
    pub fn update(&self, record_id: &str, tick: &ClockTick) -> Arc<ClockSnapshot> {
        let snapshot = Arc::new(ClockSnapshot::from_tick(tick));
        let mut guard = match self.clocks.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("clock registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.insert(record_id.to_string(), snapshot.clone());
        snapshot
    }

    pub fn read(&self, record_id: &str) -> Option<Arc<ClockSnapshot>> {
        let guard = match self.clocks.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("clock registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.get(record_id).cloned()
    }
}

/// Wire form of a clock-sync message:
/// `{type:"clock", recordId, tMs, baseEpochMs, absEpochMs, mode, speed}`.
///
/// Numbers are accepted as floats and truncated, since drivers often report
/// fractional player time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSyncMessage {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub record_id: String,
    #[serde(default)]
    pub t_ms: Option<f64>,
    #[serde(default)]
    pub base_epoch_ms: Option<f64>,
    #[serde(default)]
    pub abs_epoch_ms: Option<f64>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
}

impl ClockSyncMessage {
    pub fn is_clock(&self) -> bool {
        self.kind == "clock"
    }

    pub fn to_tick(&self) -> ClockTick {
        ClockTick {
            relative_ms: self.t_ms.map(|v| v as i64).unwrap_or(0),
            base_epoch_ms: self.base_epoch_ms.map(|v| v as i64).unwrap_or(0),
            absolute_epoch_ms: self.abs_epoch_ms.map(|v| v as i64),
            mode: self.mode.clone(),
            speed: self.speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_are_sanitised() {
        let snap = ClockSnapshot::from_tick(&ClockTick {
            relative_ms: -40,
            base_epoch_ms: -1,
            absolute_epoch_ms: Some(-5),
            mode: Some("   ".into()),
            speed: Some(0.0),
        });
        assert_eq!(snap.relative_ms, 0);
        assert_eq!(snap.base_epoch_ms, 0);
        assert_eq!(snap.absolute_epoch_ms, 0);
        assert_eq!(snap.mode, PlaybackMode::Play);
        assert_eq!(snap.speed, 1.0);
    }

    #[test]
    fn absolute_time_is_derived_from_base() {
        let snap = ClockSnapshot::from_tick(&ClockTick {
            relative_ms: 250,
            base_epoch_ms: 1_000_000,
            ..Default::default()
        });
        assert_eq!(snap.absolute_epoch_ms, 1_000_250);
        assert_eq!(snap.cutoff(5), 1_000_250);

        let explicit = ClockSnapshot::from_tick(&ClockTick {
            relative_ms: 250,
            base_epoch_ms: 1_000_000,
            absolute_epoch_ms: Some(2_000_000),
            ..Default::default()
        });
        assert_eq!(explicit.absolute_epoch_ms, 2_000_000);
    }

    #[test]
    fn cutoff_falls_back_to_session_baseline() {
        let snap = ClockSnapshot::from_tick(&ClockTick {
            relative_ms: 150,
            ..Default::default()
        });
        assert_eq!(snap.absolute_epoch_ms, 0);
        assert_eq!(snap.cutoff(10_000), 10_150);
    }

    #[test]
    fn registry_last_write_wins() {
        let clocks = ClockRegistry::new();
        assert!(clocks.read("r1").is_none());
        clocks.update("r1", &ClockTick { relative_ms: 500, ..Default::default() });
        clocks.update(
            "r1",
            &ClockTick {
                relative_ms: 100,
                mode: Some("Pause".into()),
                ..Default::default()
            },
        );
        let snap = clocks.read("r1").unwrap();
        assert_eq!(snap.relative_ms, 100);
        assert!(snap.is_paused());
        assert!(clocks.read("r2").is_none());
    }

    #[test]
    fn sync_message_parses_fractional_numbers() {
        let msg: ClockSyncMessage = serde_json::from_str(
            r#"{"type":"clock","recordId":"r1","tMs":120.7,"baseEpochMs":1000,"mode":"play"}"#,
        )
        .unwrap();
        assert!(msg.is_clock());
        let tick = msg.to_tick();
        assert_eq!(tick.relative_ms, 120);
        assert_eq!(ClockSnapshot::from_tick(&tick).absolute_epoch_ms, 1120);
    }

    #[test]
    fn huge_wire_values_saturate() {
        let msg: ClockSyncMessage =
            serde_json::from_str(r#"{"type":"clock","recordId":"r1","tMs":9e18,"baseEpochMs":9e18}"#).unwrap();
        let snap = ClockSnapshot::from_tick(&msg.to_tick());
        assert_eq!(snap.absolute_epoch_ms, i64::MAX);

        let relative_only = ClockSnapshot::from_tick(&ClockTick {
            relative_ms: i64::MAX,
            ..Default::default()
        });
        assert_eq!(relative_only.cutoff(1_700_000_000_000), i64::MAX);
    }
}
