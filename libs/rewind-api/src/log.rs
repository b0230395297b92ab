use std::future::Future;
use std::pin::Pin;

use crate::cursor::Cursor;
use crate::error::LogError;
use crate::event::{Event, EventKind, EventPayload};

/// Per-stream filter applied by the event log before the page limit.
///
/// Each field only constrains events of its own kind; a console filter
/// never hides network events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    /// Console level. `None`, blank or `all` match every level.
    pub console_level: Option<String>,
    /// Minimum HTTP status for network events.
    pub status_min: Option<i32>,
    /// Breadcrumb name. `None`, blank or `all` match every name.
    pub breadcrumb_name: Option<String>,
}

impl StreamFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match &event.payload {
            EventPayload::Console(c) => matches_label(self.console_level.as_deref(), &c.level),
            EventPayload::Network(n) => self.status_min.is_none_or(|min| n.status >= min),
            EventPayload::Breadcrumb(b) => matches_label(self.breadcrumb_name.as_deref(), &b.name),
            EventPayload::Rrweb(_) => true,
        }
    }
}

fn matches_label(wanted: Option<&str>, actual: &str) -> bool {
    match wanted.map(str::trim) {
        None | Some("") => true,
        Some(w) if w.eq_ignore_ascii_case("all") => true,
        Some(w) => w.eq_ignore_ascii_case(actual),
    }
}

/// Append-only, per-record, per-kind store of timestamped events.
///
/// This is the read seam used by the timeline and by replay sessions.
/// Implementations must return events strictly after `cursor`, ordered
/// ascending by `(timestamp_ms, sequence)`, with `filter` applied before
/// `limit`.
pub trait EventLog: Send + Sync {
    /// Whether a record with this id was ever created.
    fn record_exists(&self, record_id: &str) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Up to `limit` events of one stream after `cursor`.
    fn read_after(
        &self,
        record_id: &str,
        kind: EventKind,
        cursor: Cursor,
        limit: usize,
        filter: &StreamFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, LogError>> + Send + '_>>;

    /// Single event lookup by id.
    fn find(
        &self,
        record_id: &str,
        kind: EventKind,
        event_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, LogError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Breadcrumb, ConsoleEntry, NetworkExchange};

    fn event(payload: EventPayload) -> Event {
        Event {
            event_id: "x".into(),
            record_id: "r".into(),
            timestamp_ms: 1,
            sequence: 1,
            payload,
        }
    }

    #[test]
    fn console_level_filter() {
        let warn = event(EventPayload::Console(ConsoleEntry {
            level: "warn".into(),
            message: String::new(),
            stack: None,
        }));
        let mut filter = StreamFilter::default();
        assert!(filter.matches(&warn));
        filter.console_level = Some("ALL".into());
        assert!(filter.matches(&warn));
        filter.console_level = Some("Warn".into());
        assert!(filter.matches(&warn));
        filter.console_level = Some("error".into());
        assert!(!filter.matches(&warn));
    }

    #[test]
    fn filters_only_touch_their_own_kind() {
        let filter = StreamFilter {
            console_level: Some("error".into()),
            status_min: Some(500),
            breadcrumb_name: Some("click".into()),
        };
        let ok = event(EventPayload::Network(NetworkExchange {
            status: 200,
            ..Default::default()
        }));
        let failed = event(EventPayload::Network(NetworkExchange {
            status: 503,
            ..Default::default()
        }));
        let nav = event(EventPayload::Breadcrumb(Breadcrumb {
            name: "navigation".into(),
            message: String::new(),
            data: Default::default(),
        }));
        assert!(!filter.matches(&ok));
        assert!(filter.matches(&failed));
        assert!(!filter.matches(&nav));
    }
}
