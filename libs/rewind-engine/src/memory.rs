use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rewind_api::{
    Cursor, Event, EventKind, EventLog, EventPayload, LogError, NewRecord, Record, StreamFilter,
    now_ms,
};

use crate::error::EngineError;

type StreamKey = (String, EventKind);

/// In-memory event log: a record registry plus one sorted ring buffer per
/// `(record, kind)` stream.
///
/// Appends may arrive out of order; each stream is kept sorted by
/// `(timestamp_ms, sequence)` on insert so reads are a binary search plus a
/// forward scan. When a stream reaches `max_events_per_stream` the oldest
/// event is dropped.
pub struct MemoryEventLog {
    records: RwLock<HashMap<String, Record>>,
    streams: RwLock<HashMap<StreamKey, VecDeque<Event>>>,
    max_events_per_stream: usize,
    next_id: [AtomicU64; 4],
}

impl std::fmt::Debug for MemoryEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventLog")
            .field("records", &read_lock(&self.records).len())
            .field("max_events_per_stream", &self.max_events_per_stream)
            .finish()
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl MemoryEventLog {
    pub fn new(max_events_per_stream: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            max_events_per_stream: max_events_per_stream.max(1),
            next_id: Default::default(),
        }
    }

    /// Register a new record with a fresh id.
    pub fn create_record(&self, req: NewRecord) -> Record {
        let record = Record {
            record_id: uuid::Uuid::new_v4().to_string(),
            session_id: non_blank(req.session_id).unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            previous_record_id: non_blank(req.previous_record_id),
            page_url: req.page_url.unwrap_or_default(),
            user_agent: req.user_agent.unwrap_or_default(),
            app_version: req.app_version.unwrap_or_default(),
            created_at_ms: now_ms(),
        };
        write_lock(&self.records).insert(record.record_id.clone(), record.clone());
        record
    }

    pub fn get_record(&self, record_id: &str) -> Option<Record> {
        read_lock(&self.records).get(record_id).cloned()
    }

    pub fn contains_record(&self, record_id: &str) -> bool {
        read_lock(&self.records).contains_key(record_id)
    }

    /// Append one event to its stream and return the stored copy.
    pub fn append(
        &self,
        record_id: &str,
        timestamp_ms: i64,
        sequence: i64,
        payload: EventPayload,
    ) -> Result<Event, EngineError> {
        if !self.contains_record(record_id) {
            return Err(LogError::RecordNotFound(record_id.to_string()).into());
        }
        let kind = payload.kind();
        let n = self.next_id[kind_slot(kind)].fetch_add(1, Ordering::Relaxed) + 1;
        let event = Event {
            event_id: format!("{}_{n:08}", kind.id_prefix()),
            record_id: record_id.to_string(),
            timestamp_ms,
            sequence,
            payload,
        };

        let mut streams = write_lock(&self.streams);
        let stream = streams.entry((record_id.to_string(), kind)).or_default();
        let key = event.order_key();
        let at = stream.partition_point(|e| e.order_key() <= key);
        stream.insert(at, event.clone());
        if stream.len() > self.max_events_per_stream {
            stream.pop_front();
        }
        Ok(event)
    }

    /// Synchronous page read backing [`EventLog::read_after`].
    pub fn page(
        &self,
        record_id: &str,
        kind: EventKind,
        cursor: Cursor,
        limit: usize,
        filter: &StreamFilter,
    ) -> Vec<Event> {
        let streams = read_lock(&self.streams);
        let Some(stream) = streams.get(&(record_id.to_string(), kind)) else {
            return Vec::new();
        };
        let start = stream.partition_point(|e| !cursor.is_before(e.timestamp_ms, e.sequence));
        stream
            .range(start..)
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn lookup(&self, record_id: &str, kind: EventKind, event_id: &str) -> Option<Event> {
        let streams = read_lock(&self.streams);
        streams
            .get(&(record_id.to_string(), kind))?
            .iter()
            .find(|e| e.event_id == event_id)
            .cloned()
    }
}

impl EventLog for MemoryEventLog {
    fn record_exists(&self, record_id: &str) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let exists = self.contains_record(record_id);
        Box::pin(async move { exists })
    }

    fn read_after(
        &self,
        record_id: &str,
        kind: EventKind,
        cursor: Cursor,
        limit: usize,
        filter: &StreamFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, LogError>> + Send + '_>> {
        let page = self.page(record_id, kind, cursor, limit, filter);
        Box::pin(async move { Ok(page) })
    }

    fn find(
        &self,
        record_id: &str,
        kind: EventKind,
        event_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, LogError>> + Send + '_>> {
        let found = self.lookup(record_id, kind, event_id);
        Box::pin(async move { Ok(found) })
    }
}

fn kind_slot(kind: EventKind) -> usize {
    match kind {
        EventKind::Console => 0,
        EventKind::Network => 1,
        EventKind::Breadcrumb => 2,
        EventKind::Rrweb => 3,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("event log read lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("event log write lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
