use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use rewind_api::{
    Breadcrumb, ConsoleEntry, Event, EventPayload, NetworkExchange, NewRecord, Record, RrwebFrame,
    now_ms,
};

use crate::config::NotableConfig;
use crate::error::EngineError;
use crate::live::LiveHub;
use crate::memory::MemoryEventLog;
use crate::notable;

/// One message on the ingest channel, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestMessage {
    Console(ConsoleIngest),
    Network(NetworkIngest),
    Breadcrumb(BreadcrumbIngest),
    Rrweb(RrwebBatch),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleIngest {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub seq: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkIngest {
    #[serde(default)]
    pub client_request_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub request_headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub response_body: Option<String>,
    #[serde(default)]
    pub started_at_epoch_ms: i64,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub seq: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreadcrumbIngest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub seq: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RrwebBatch {
    #[serde(default)]
    pub events: Vec<RrwebEnvelope>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RrwebEnvelope {
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Write path: normalises client messages, appends them to the log and
/// reports notable ones to the live hub. The hub never fails an append.
pub struct Ingestor {
    log: Arc<MemoryEventLog>,
    hub: Arc<LiveHub>,
    notable: NotableConfig,
}

impl Ingestor {
    pub fn new(log: Arc<MemoryEventLog>, hub: Arc<LiveHub>, notable: NotableConfig) -> Self {
        Self { log, hub, notable }
    }

    pub fn create_record(&self, req: NewRecord) -> Record {
        let record = self.log.create_record(req);
        tracing::info!(record_id = %record.record_id, session_id = %record.session_id, "record created");
        self.hub.emit(notable::record_created(&record, now_ms()));
        record
    }

    /// Store one ingest message. Returns the stored events (several for an
    /// rrweb batch).
    pub fn ingest(&self, record_id: &str, msg: IngestMessage) -> Result<Vec<Event>, EngineError> {
        let stored = match msg {
            IngestMessage::Console(c) => {
                let payload = EventPayload::Console(ConsoleEntry {
                    level: non_blank(c.level).unwrap_or_else(|| "log".into()),
                    message: c.message.unwrap_or_default(),
                    stack: c.stack,
                });
                vec![self.append(record_id, c.ts, c.seq, payload)?]
            }
            IngestMessage::Network(n) => {
                let payload = EventPayload::Network(NetworkExchange {
                    client_request_id: n.client_request_id,
                    method: non_blank(n.method).unwrap_or_else(|| "GET".into()),
                    url: n.url.unwrap_or_default(),
                    status: n.status,
                    request_headers: n.request_headers.unwrap_or_default(),
                    request_body: n.request_body,
                    response_headers: n.response_headers.unwrap_or_default(),
                    response_body: n.response_body,
                    duration_ms: n.duration_ms,
                    error: n.error,
                });
                vec![self.append(record_id, n.started_at_epoch_ms, n.seq, payload)?]
            }
            IngestMessage::Breadcrumb(b) => {
                let payload = EventPayload::Breadcrumb(Breadcrumb {
                    name: b.name.unwrap_or_default(),
                    message: b.message.unwrap_or_default(),
                    data: b.data.unwrap_or_default(),
                });
                vec![self.append(record_id, b.ts, b.seq, payload)?]
            }
            IngestMessage::Rrweb(batch) => {
                let mut out = Vec::with_capacity(batch.events.len());
                for frame in batch.events {
                    let data = if frame.payload.is_null() {
                        serde_json::Value::Object(Default::default())
                    } else {
                        frame.payload
                    };
                    let payload = EventPayload::Rrweb(RrwebFrame { data });
                    out.push(self.append(record_id, frame.ts, frame.seq, payload)?);
                }
                out
            }
        };
        Ok(stored)
    }

    /// Parse and store a raw ingest frame.
    pub fn ingest_json(&self, record_id: &str, raw: &str) -> Result<Vec<Event>, EngineError> {
        let msg: IngestMessage =
            serde_json::from_str(raw).map_err(|e| EngineError::Malformed(e.to_string()))?;
        self.ingest(record_id, msg)
    }

    fn append(&self, record_id: &str, ts: i64, seq: i64, payload: EventPayload) -> Result<Event, EngineError> {
        let event = self.log.append(record_id, ts, seq, payload)?;
        tracing::debug!(record_id, kind = %event.kind(), event_id = %event.event_id, "event stored");
        let now = now_ms();
        for live in notable::classify(&event, &self.notable, now) {
            self.hub.emit(live);
        }
        Ok(event)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
