use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use rewind_api::now_ms;

pub const HISTORY_START: &str = "history_start";
pub const HISTORY_END: &str = "history_end";

/// A notable event broadcast to live observers.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    pub kind: String,
    pub timestamp_ms: i64,
    pub payload: Map<String, Value>,
}

impl LiveEvent {
    pub fn new(kind: impl Into<String>, timestamp_ms: i64, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            timestamp_ms,
            payload,
        }
    }

    /// JSON object sent to observers: the payload plus `type` and
    /// `timestampMs`.
    pub fn to_message(&self) -> Value {
        let mut obj = self.payload.clone();
        obj.insert("type".into(), Value::String(self.kind.clone()));
        obj.entry("timestampMs").or_insert(json!(self.timestamp_ms));
        Value::Object(obj)
    }
}

/// Receiving end of one observer. Dropping it disconnects the observer; the
/// hub notices on the next delivery attempt.
pub struct LiveSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl LiveSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

struct HubState {
    buffer: VecDeque<LiveEvent>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<Value>>,
}

/// Process-wide fan-out of notable events with a time-windowed backlog for
/// late joiners.
///
/// `emit` is called synchronously from ingestion: it never awaits and never
/// fails. Delivery goes through unbounded channels, so a stalled observer
/// grows its queue instead of slowing ingestion.
pub struct LiveHub {
    window_ms: i64,
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for LiveHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveHub").field("window_ms", &self.window_ms).finish()
    }
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl LiveHub {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as i64,
            state: Mutex::new(HubState {
                buffer: VecDeque::new(),
                subscribers: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn emit(&self, event: LiveEvent) {
        self.emit_at(event, now_ms());
    }

    /// Buffer `event`, trim everything outside the window as of `now_ms`,
    /// then attempt delivery to every observer.
    pub fn emit_at(&self, event: LiveEvent, now_ms: i64) {
        let message = event.to_message();
        let mut state = self.lock();

        state.buffer.push_back(event);
        let window = self.window_ms;
        state.buffer.retain(|e| now_ms - e.timestamp_ms < window);

        let mut gone = Vec::new();
        for (id, tx) in &state.subscribers {
            if tx.send(message.clone()).is_err() {
                tracing::debug!(subscriber = id, "live delivery failed, dropping observer");
                gone.push(*id);
            }
        }
        for id in gone {
            state.subscribers.remove(&id);
        }
    }

    pub fn subscribe(&self) -> LiveSubscription {
        self.subscribe_at(now_ms())
    }

    /// Register an observer and replay the unexpired backlog to it, framed by
    /// `history_start{count}` / `history_end`. Nothing is framed when the
    /// backlog is empty.
    pub fn subscribe_at(&self, now_ms: i64) -> LiveSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();

        let recent: Vec<&LiveEvent> = state
            .buffer
            .iter()
            .filter(|e| now_ms - e.timestamp_ms < self.window_ms)
            .collect();
        if !recent.is_empty() {
            let _ = tx.send(json!({
                "type": HISTORY_START,
                "timestampMs": now_ms,
                "count": recent.len(),
            }));
            for event in recent {
                let mut message = event.to_message();
                if let Value::Object(obj) = &mut message {
                    obj.insert("_buffered".into(), Value::Bool(true));
                    obj.insert("_bufferedAgeMs".into(), json!((now_ms - event.timestamp_ms).max(0)));
                }
                let _ = tx.send(message);
            }
            let _ = tx.send(json!({
                "type": HISTORY_END,
                "timestampMs": now_ms,
            }));
        }

        state.subscribers.insert(id, tx);
        tracing::debug!(subscriber = id, total = state.subscribers.len(), "live observer joined");
        LiveSubscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut state = self.lock();
        if state.subscribers.remove(&id).is_some() {
            tracing::debug!(subscriber = id, total = state.subscribers.len(), "live observer left");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Copy of the current backlog, oldest first.
    pub fn buffered(&self) -> Vec<LiveEvent> {
        self.lock().buffer.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("live hub lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
