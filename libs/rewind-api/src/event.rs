use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;

/// Stream type of an event. Each `(record_id, kind)` pair is an independent,
/// append-only stream ordered by `(timestamp_ms, sequence)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Console,
    Network,
    Breadcrumb,
    /// DOM-mutation snapshot frames.
    Rrweb,
}

impl EventKind {
    /// Streams that take part in the merged timeline view.
    pub const TIMELINE: [EventKind; 3] = [EventKind::Console, EventKind::Network, EventKind::Breadcrumb];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Console => "console",
            EventKind::Network => "network",
            EventKind::Breadcrumb => "breadcrumb",
            EventKind::Rrweb => "rrweb",
        }
    }

    /// Case-insensitive lookup. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "console" => Some(EventKind::Console),
            "network" => Some(EventKind::Network),
            "breadcrumb" => Some(EventKind::Breadcrumb),
            "rrweb" => Some(EventKind::Rrweb),
            _ => None,
        }
    }

    /// Prefix of generated event ids (`c_00000001`, ...).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            EventKind::Console => "c",
            EventKind::Network => "n",
            EventKind::Breadcrumb => "b",
            EventKind::Rrweb => "r",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured telemetry event. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub record_id: String,
    /// Epoch ms. For network events this is the request start time.
    pub timestamp_ms: i64,
    /// Client-supplied tie-breaker, not globally unique.
    pub sequence: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Position of this event as a pagination cursor.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.timestamp_ms, self.sequence)
    }

    pub fn order_key(&self) -> (i64, i64) {
        (self.timestamp_ms, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Console(ConsoleEntry),
    Network(NetworkExchange),
    Breadcrumb(Breadcrumb),
    Rrweb(RrwebFrame),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Console(_) => EventKind::Console,
            EventPayload::Network(_) => EventKind::Network,
            EventPayload::Breadcrumb(_) => EventKind::Breadcrumb,
            EventPayload::Rrweb(_) => EventKind::Rrweb,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    /// `log` | `info` | `warn` | `error` | `debug`.
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkExchange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
    pub method: String,
    pub url: String,
    /// 0 when the request failed before a response arrived.
    pub status: i32,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NetworkExchange {
    /// Recorded transport error, if any (blank counts as none).
    pub fn failure(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// Case-insensitive response header lookup.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    /// `click` | `navigation` | `input` | `custom` ...
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Opaque DOM-mutation snapshot frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrwebFrame {
    pub data: serde_json::Value,
}
