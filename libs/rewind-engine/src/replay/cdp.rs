//! Builders for the subset of debugger-protocol messages the replay emits.

use serde_json::{Value, json};

use rewind_api::{ConsoleEntry, Event, EventPayload, NetworkExchange};

const TRUNCATED: &str = "\n...[truncated]";

pub fn reply(id: Value, result: Value) -> Value {
    json!({ "id": id, "result": result })
}

pub fn empty_reply(id: Value) -> Value {
    reply(id, json!({}))
}

pub fn push(method: &str, params: Value) -> Value {
    json!({ "method": method, "params": params })
}

/// The single default context announced after `Runtime.enable`.
pub fn execution_context_created() -> Value {
    push(
        "Runtime.executionContextCreated",
        json!({
            "context": {
                "id": 1,
                "origin": "rewind://replay",
                "name": "Rewind Replay",
                "uniqueId": "rewind-context-1",
            }
        }),
    )
}

/// Result of `Runtime.evaluate`. Nothing is executed.
pub fn undefined_result() -> Value {
    json!({
        "result": {
            "type": "undefined",
            "value": null,
            "description": "undefined",
        }
    })
}

/// Protocol messages for one stored event, timestamped relative to
/// `baseline_ms`. Kinds without a protocol rendering produce nothing.
pub fn render(event: &Event, loader_id: &str, baseline_ms: i64) -> Vec<Value> {
    match &event.payload {
        EventPayload::Network(n) => network_messages(event, n, loader_id, baseline_ms),
        EventPayload::Console(c) => vec![log_entry(event, c, baseline_ms)],
        EventPayload::Breadcrumb(_) | EventPayload::Rrweb(_) => Vec::new(),
    }
}

/// `requestWillBeSent` followed by `loadingFailed`, or by
/// `responseReceived` + `loadingFinished`.
pub fn network_messages(event: &Event, n: &NetworkExchange, loader_id: &str, baseline_ms: i64) -> Vec<Value> {
    let request_id = event.event_id.as_str();
    let started = event.timestamp_ms;
    let finished_ts = seconds(started.saturating_add(n.duration_ms.max(0)).saturating_sub(baseline_ms));

    let mut out = Vec::with_capacity(3);
    out.push(push(
        "Network.requestWillBeSent",
        json!({
            "requestId": request_id,
            "loaderId": loader_id,
            "documentURL": n.url,
            "request": {
                "url": n.url,
                "method": n.method,
                "headers": n.request_headers,
            },
            "timestamp": seconds(started.saturating_sub(baseline_ms)),
            "wallTime": seconds(started),
            "initiator": { "type": "other" },
            "type": "Fetch",
        }),
    ));

    if let Some(error) = n.failure() {
        out.push(push(
            "Network.loadingFailed",
            json!({
                "requestId": request_id,
                "timestamp": finished_ts,
                "type": "Fetch",
                "errorText": error,
            }),
        ));
        return out;
    }

    let encoded_len = n.response_body.as_deref().map(str::len).unwrap_or(0);
    out.push(push(
        "Network.responseReceived",
        json!({
            "requestId": request_id,
            "loaderId": loader_id,
            "timestamp": finished_ts,
            "type": "Fetch",
            "response": {
                "url": n.url,
                "status": n.status,
                "statusText": "",
                "headers": n.response_headers,
                "mimeType": mime_type(n),
                "connectionReused": false,
                "connectionId": 0,
                "encodedDataLength": encoded_len,
            },
        }),
    ));
    out.push(push(
        "Network.loadingFinished",
        json!({
            "requestId": request_id,
            "timestamp": finished_ts,
            "encodedDataLength": encoded_len,
        }),
    ));
    out
}

pub fn log_entry(event: &Event, c: &ConsoleEntry, baseline_ms: i64) -> Value {
    let mut entry = json!({
        "source": "console-api",
        "level": log_level(&c.level),
        "text": c.message,
        "timestamp": seconds(event.timestamp_ms.saturating_sub(baseline_ms)),
    });
    if let Some(stack) = c.stack.as_deref().filter(|s| !s.trim().is_empty()) {
        entry["stackTrace"] = json!({ "callFrames": call_frames(stack) });
    }
    push("Log.entryAdded", json!({ "entry": entry }))
}

pub fn log_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => "error",
        "warn" => "warning",
        "debug" => "verbose",
        _ => "info",
    }
}

/// One frame per non-blank stack line; the line itself is the description.
pub fn call_frames(stack: &str) -> Vec<Value> {
    stack
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            json!({
                "functionName": "",
                "url": "",
                "lineNumber": 0,
                "columnNumber": 0,
                "description": line,
            })
        })
        .collect()
}

/// Media type from the response `content-type`, parameters stripped.
pub fn mime_type(n: &NetworkExchange) -> String {
    match n.response_header("content-type") {
        Some(ct) => ct.split(';').next().unwrap_or_default().trim().to_string(),
        None => "text/plain".into(),
    }
}

/// Cut `body` to at most `max_chars` characters, marking the cut.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((at, _)) => format!("{}{TRUNCATED}", &body[..at]),
        None => body.to_string(),
    }
}

fn seconds(ms: i64) -> f64 {
    ms as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn network_event(n: NetworkExchange) -> Event {
        Event {
            event_id: "n_00000001".into(),
            record_id: "r1".into(),
            timestamp_ms: 2_500,
            sequence: 0,
            payload: EventPayload::Network(n),
        }
    }

    fn methods(msgs: &[Value]) -> Vec<&str> {
        msgs.iter().map(|m| m["method"].as_str().unwrap()).collect()
    }

    #[test]
    fn successful_exchange_renders_three_messages() {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".into(), "application/json; charset=utf-8".into());
        let event = network_event(NetworkExchange {
            method: "POST".into(),
            url: "https://app/api".into(),
            status: 201,
            response_headers: headers,
            response_body: Some("{}".into()),
            duration_ms: 500,
            ..Default::default()
        });
        let msgs = render(&event, "r1", 1_000);
        assert_eq!(
            methods(&msgs),
            vec!["Network.requestWillBeSent", "Network.responseReceived", "Network.loadingFinished"]
        );
        assert_eq!(msgs[0]["params"]["timestamp"], 1.5);
        assert_eq!(msgs[0]["params"]["wallTime"], 2.5);
        assert_eq!(msgs[1]["params"]["timestamp"], 2.0);
        assert_eq!(msgs[1]["params"]["response"]["mimeType"], "application/json");
        assert_eq!(msgs[2]["params"]["encodedDataLength"], 2);
    }

    #[test]
    fn failed_exchange_renders_loading_failed() {
        let event = network_event(NetworkExchange {
            method: "GET".into(),
            url: "/x".into(),
            error: Some("net::ERR_FAILED".into()),
            ..Default::default()
        });
        let msgs = render(&event, "r1", 0);
        assert_eq!(methods(&msgs), vec!["Network.requestWillBeSent", "Network.loadingFailed"]);
        assert_eq!(msgs[1]["params"]["errorText"], "net::ERR_FAILED");
    }

    #[test]
    fn console_entry_with_stack() {
        let event = Event {
            event_id: "c_00000001".into(),
            record_id: "r1".into(),
            timestamp_ms: 1_250,
            sequence: 0,
            payload: EventPayload::Console(ConsoleEntry {
                level: "WARN".into(),
                message: "careful".into(),
                stack: Some("at a()\n\n  at b()  ".into()),
            }),
        };
        let msgs = render(&event, "r1", 1_000);
        let entry = &msgs[0]["params"]["entry"];
        assert_eq!(entry["level"], "warning");
        assert_eq!(entry["timestamp"], 0.25);
        let frames = entry["stackTrace"]["callFrames"].as_array().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1]["description"], "at b()");
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let mut event = network_event(NetworkExchange {
            url: "/far".into(),
            status: 200,
            duration_ms: i64::MAX,
            ..Default::default()
        });
        event.timestamp_ms = i64::MAX - 10;
        let msgs = render(&event, "r1", i64::MIN);
        assert_eq!(msgs.len(), 3);
        assert!(msgs[1]["params"]["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn level_mapping() {
        assert_eq!(log_level("error"), "error");
        assert_eq!(log_level("debug"), "verbose");
        assert_eq!(log_level("log"), "info");
    }

    #[test]
    fn truncation_is_char_based() {
        assert_eq!(truncate_body("héllo", 10), "héllo");
        assert_eq!(truncate_body("héllo", 2), "hé\n...[truncated]");
    }
}
