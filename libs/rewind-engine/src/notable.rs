//! Which ingested events are worth pushing to live observers.

use serde_json::{Map, Value, json};

use rewind_api::{Event, EventPayload, Record};

use crate::config::NotableConfig;
use crate::live::LiveEvent;

pub const RECORD_CREATED: &str = "record-created";
pub const CONSOLE_ERROR: &str = "console-error";
pub const CONSOLE_WARN: &str = "console-warn";
pub const NETWORK_HTTP_ERROR: &str = "network-http-error";
pub const NETWORK_SLOW: &str = "network-slow";

pub fn record_created(record: &Record, now_ms: i64) -> LiveEvent {
    let mut payload = Map::new();
    payload.insert("recordId".into(), json!(record.record_id));
    payload.insert("sessionId".into(), json!(record.session_id));
    payload.insert("pageUrl".into(), json!(record.page_url));
    payload.insert("userAgent".into(), json!(record.user_agent));
    LiveEvent::new(RECORD_CREATED, now_ms, payload)
}

/// Notable events derived from one stored event. A single network exchange
/// can be both an HTTP error and slow.
pub fn classify(event: &Event, cfg: &NotableConfig, now_ms: i64) -> Vec<LiveEvent> {
    let mut out = Vec::new();
    match &event.payload {
        EventPayload::Console(c) => {
            let kind = match c.level.trim().to_ascii_lowercase().as_str() {
                "error" => CONSOLE_ERROR,
                "warn" | "warning" => CONSOLE_WARN,
                _ => return out,
            };
            let mut payload = base(event);
            payload.insert("level".into(), json!(c.level));
            payload.insert("message".into(), json!(c.message));
            out.push(LiveEvent::new(kind, now_ms, payload));
        }
        EventPayload::Network(n) => {
            let summary = |event: &Event| {
                let mut payload = base(event);
                payload.insert("method".into(), json!(n.method));
                payload.insert("url".into(), json!(n.url));
                payload.insert("status".into(), json!(n.status));
                payload.insert("durationMs".into(), json!(n.duration_ms));
                payload
            };
            if n.status >= cfg.http_error_status {
                out.push(LiveEvent::new(NETWORK_HTTP_ERROR, now_ms, summary(event)));
            }
            if n.duration_ms > cfg.slow_ms {
                out.push(LiveEvent::new(NETWORK_SLOW, now_ms, summary(event)));
            }
        }
        EventPayload::Breadcrumb(_) | EventPayload::Rrweb(_) => {}
    }
    out
}

fn base(event: &Event) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("recordId".into(), json!(event.record_id));
    payload.insert("eventId".into(), json!(event.event_id));
    payload.insert("eventTs".into(), json!(event.timestamp_ms));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_api::{ConsoleEntry, NetworkExchange};

    fn event(payload: EventPayload) -> Event {
        Event {
            event_id: "x_00000001".into(),
            record_id: "r1".into(),
            timestamp_ms: 10,
            sequence: 0,
            payload,
        }
    }

    fn network(status: i32, duration_ms: i64) -> Event {
        event(EventPayload::Network(NetworkExchange {
            method: "GET".into(),
            url: "/api".into(),
            status,
            duration_ms,
            ..Default::default()
        }))
    }

    #[test]
    fn console_levels() {
        let cfg = NotableConfig::default();
        let console = |level: &str| {
            event(EventPayload::Console(ConsoleEntry {
                level: level.into(),
                message: "m".into(),
                stack: None,
            }))
        };
        assert_eq!(classify(&console("ERROR"), &cfg, 1)[0].kind, CONSOLE_ERROR);
        assert_eq!(classify(&console("warn"), &cfg, 1)[0].kind, CONSOLE_WARN);
        assert!(classify(&console("log"), &cfg, 1).is_empty());
    }

    #[test]
    fn network_thresholds() {
        let cfg = NotableConfig::default();
        assert!(classify(&network(399, 2000), &cfg, 1).is_empty());

        let kinds: Vec<_> = classify(&network(400, 2001), &cfg, 1).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![NETWORK_HTTP_ERROR, NETWORK_SLOW]);

        let slow = classify(&network(200, 5000), &cfg, 7);
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].timestamp_ms, 7);
        assert_eq!(slow[0].payload["durationMs"], 5000);
    }
}
