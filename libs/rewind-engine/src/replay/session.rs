use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rewind_api::{Event, EventKind, EventPayload, NetworkExchange, now_ms};

use super::{CLOSE_ERROR, PacingMode, ReplayError, ReplayOptions, SEEK_BACKWARD, cdp};
use crate::clock::ClockRegistry;
use crate::config::ReplayConfig;
use crate::timeline::TimelineMerger;

/// Item queued for the client connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(Value),
    Close { code: u16, reason: String },
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capability {
    Network,
    Log,
}

impl Capability {
    fn as_str(self) -> &'static str {
        match self {
            Capability::Network => "network",
            Capability::Log => "log",
        }
    }
}

/// Ordered streams of one record, loaded once per session and never changed.
#[derive(Debug)]
struct Snapshot {
    networks: Vec<Event>,
    consoles: Vec<Event>,
    /// Earliest timestamp across both streams.
    baseline_ms: i64,
    network_index: HashMap<String, usize>,
}

impl Snapshot {
    fn new(networks: Vec<Event>, consoles: Vec<Event>) -> Self {
        let baseline_ms = networks
            .first()
            .into_iter()
            .chain(consoles.first())
            .map(|e| e.timestamp_ms)
            .min()
            .unwrap_or_else(now_ms);
        let network_index = networks
            .iter()
            .enumerate()
            .map(|(i, e)| (e.event_id.clone(), i))
            .collect();
        Self {
            networks,
            consoles,
            baseline_ms,
            network_index,
        }
    }

    fn events(&self, cap: Capability) -> &[Event] {
        match cap {
            Capability::Network => &self.networks,
            Capability::Log => &self.consoles,
        }
    }

    fn network(&self, event_id: &str) -> Result<&NetworkExchange, ReplayError> {
        let event = self
            .network_index
            .get(event_id)
            .and_then(|i| self.networks.get(*i))
            .ok_or_else(|| ReplayError::EventNotFound(event_id.to_string()))?;
        match &event.payload {
            EventPayload::Network(n) => Ok(n),
            _ => Err(ReplayError::EventNotFound(event_id.to_string())),
        }
    }
}

/// One replay connection.
///
/// Requests are handled in arrival order through [`ReplaySession::handle`];
/// everything for the client goes out through the receiver returned by
/// [`ReplaySession::connect`]. Timed and gated emission loops run as separate
/// tasks, one per capability, and stop when the session is dropped or
/// aborted.
pub struct ReplaySession {
    record_id: String,
    options: ReplayOptions,
    config: ReplayConfig,
    merger: TimelineMerger,
    clocks: Arc<ClockRegistry>,
    tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    /// Serialises emission against abort across the capability loops.
    send_gate: Arc<Mutex<()>>,
    snapshot: Option<Arc<Snapshot>>,
    network_started: bool,
    log_started: bool,
}

impl std::fmt::Debug for ReplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySession")
            .field("record_id", &self.record_id)
            .field("options", &self.options)
            .field("loaded", &self.snapshot.is_some())
            .finish()
    }
}

impl ReplaySession {
    /// Open a session for an existing record. A missing or unknown record id
    /// refuses the connection; no session is created.
    pub async fn connect(
        merger: TimelineMerger,
        clocks: Arc<ClockRegistry>,
        record_id: Option<&str>,
        options: ReplayOptions,
        config: ReplayConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Outbound>), ReplayError> {
        let record_id = record_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ReplayError::MissingRecordId)?;
        if !merger.record_exists(record_id).await {
            return Err(ReplayError::RecordNotFound(record_id.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            record_id: record_id.to_string(),
            options,
            config,
            merger,
            clocks,
            tx,
            cancel: CancellationToken::new(),
            send_gate: Arc::new(Mutex::new(())),
            snapshot: None,
            network_started: false,
            log_started: false,
        };
        Ok((session, rx))
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn options(&self) -> ReplayOptions {
        self.options
    }

    /// Token cancelled when the session ends, from either side.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle one inbound text frame. Malformed frames and frames without a
    /// method are dropped.
    pub async fn handle(&mut self, text: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        let req: Request = match serde_json::from_str(text) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(record_id = %self.record_id, error = %e, "dropping malformed replay request");
                return;
            }
        };
        let Some(method) = req.method else {
            return;
        };
        if let Err(e) = self.dispatch(req.id, &method, &req.params).await {
            tracing::warn!(record_id = %self.record_id, method = %method, error = %e, "replay request failed");
        }
    }

    async fn dispatch(&mut self, id: Value, method: &str, params: &Value) -> Result<(), ReplayError> {
        match method {
            "Runtime.enable" => {
                self.send(cdp::empty_reply(id));
                self.send(cdp::execution_context_created());
            }
            "Network.enable" => {
                self.send(cdp::empty_reply(id));
                self.enable(Capability::Network).await?;
            }
            "Log.enable" => {
                self.send(cdp::empty_reply(id));
                self.enable(Capability::Log).await?;
            }
            "Network.getResponseBody" => {
                let body = self
                    .lookup(params, |n| n.response_body.clone())
                    .await
                    .map(|b| cdp::truncate_body(&b, self.config.max_body_chars))
                    .unwrap_or_default();
                self.send(cdp::reply(id, json!({ "body": body, "base64Encoded": false })));
            }
            "Network.getRequestPostData" => {
                let post_data = self.lookup(params, |n| n.request_body.clone()).await.unwrap_or_default();
                self.send(cdp::reply(id, json!({ "postData": post_data })));
            }
            "Runtime.evaluate" => {
                self.send(cdp::reply(id, cdp::undefined_result()));
            }
            _ => {
                tracing::trace!(record_id = %self.record_id, method, "acknowledging unhandled method");
                self.send(cdp::empty_reply(id));
            }
        }
        Ok(())
    }

    /// Body text of a loaded network event. Absent events and absent bodies
    /// both come back as `None`.
    async fn lookup(
        &mut self,
        params: &Value,
        field: impl Fn(&NetworkExchange) -> Option<String>,
    ) -> Option<String> {
        let request_id = params.get("requestId").and_then(Value::as_str)?;
        let snapshot = match self.snapshot().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(record_id = %self.record_id, error = %e, "snapshot load failed");
                return None;
            }
        };
        match snapshot.network(request_id) {
            Ok(n) => field(n),
            Err(e) => {
                tracing::debug!(record_id = %self.record_id, error = %e, "body lookup missed");
                None
            }
        }
    }

    async fn enable(&mut self, cap: Capability) -> Result<(), ReplayError> {
        let started = match cap {
            Capability::Network => &mut self.network_started,
            Capability::Log => &mut self.log_started,
        };
        if *started {
            return Ok(());
        }
        *started = true;

        let snapshot = self.snapshot().await?;
        let out = Emitter {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
            gate: self.send_gate.clone(),
            record_id: self.record_id.clone(),
        };
        tracing::debug!(
            record_id = %self.record_id,
            capability = cap.as_str(),
            mode = ?self.options.mode,
            events = snapshot.events(cap).len(),
            "starting replay emission"
        );

        match self.options.mode {
            PacingMode::Immediate => {
                for event in snapshot.events(cap) {
                    if !out.emit(event, snapshot.baseline_ms) {
                        break;
                    }
                }
            }
            PacingMode::Timed => {
                let speed = self.options.speed;
                let max_sleep = self.config.max_sleep();
                tokio::spawn(run_timed(out, snapshot, cap, speed, max_sleep));
            }
            PacingMode::Gated => {
                let clocks = self.clocks.clone();
                let poll = self.config.poll_interval();
                let tolerance = self.config.seek_tolerance_ms;
                tokio::spawn(run_gated(out, snapshot, cap, clocks, poll, tolerance));
            }
        }
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<Arc<Snapshot>, ReplayError> {
        if let Some(snapshot) = &self.snapshot {
            return Ok(snapshot.clone());
        }
        let batch = self.config.load_batch;
        let networks = self.merger.load_all(&self.record_id, EventKind::Network, batch).await?;
        let consoles = self.merger.load_all(&self.record_id, EventKind::Console, batch).await?;
        let snapshot = Arc::new(Snapshot::new(networks, consoles));
        tracing::debug!(
            record_id = %self.record_id,
            networks = snapshot.networks.len(),
            consoles = snapshot.consoles.len(),
            baseline_ms = snapshot.baseline_ms,
            "replay snapshot loaded"
        );
        self.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn send(&self, msg: Value) {
        let _ = self.tx.send(Outbound::Message(msg));
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Shared sending half of the emission loops.
struct Emitter {
    tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    gate: Arc<Mutex<()>>,
    record_id: String,
}

impl Emitter {
    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        match self.gate.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(record_id = %self.record_id, "replay send gate was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// `false` once the client side is gone or the session was aborted.
    /// Nothing is queued after an abort's close.
    fn emit(&self, event: &Event, baseline_ms: i64) -> bool {
        let _gate = self.lock_gate();
        if self.cancel.is_cancelled() {
            return false;
        }
        cdp::render(event, &self.record_id, baseline_ms)
            .into_iter()
            .all(|msg| self.tx.send(Outbound::Message(msg)).is_ok())
    }

    /// `false` when cancelled while sleeping.
    async fn sleep(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    fn abort(&self, reason: &str) {
        let _gate = self.lock_gate();
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.tx.send(Outbound::Close {
            code: CLOSE_ERROR,
            reason: reason.to_string(),
        });
        self.cancel.cancel();
    }
}

async fn run_timed(out: Emitter, snapshot: Arc<Snapshot>, cap: Capability, speed: f64, max_sleep: Duration) {
    let mut last_ms = snapshot.baseline_ms;
    for event in snapshot.events(cap) {
        let diff = event.timestamp_ms.saturating_sub(last_ms);
        if diff > 0 {
            let sleep_ms = (diff as f64 / speed).floor() as u64;
            if sleep_ms > 0 && !out.sleep(Duration::from_millis(sleep_ms).min(max_sleep)).await {
                return;
            }
        }
        last_ms = event.timestamp_ms;
        if !out.emit(event, snapshot.baseline_ms) {
            return;
        }
    }
    tracing::debug!(record_id = %out.record_id, capability = cap.as_str(), "timed replay finished");
}

/// Emit every event at or before the clock cutoff, polling the clock until
/// the session ends. Keeps polling after the last event so a backward seek
/// is still detected.
async fn run_gated(
    out: Emitter,
    snapshot: Arc<Snapshot>,
    cap: Capability,
    clocks: Arc<ClockRegistry>,
    poll: Duration,
    tolerance_ms: i64,
) {
    let events = snapshot.events(cap);
    let mut baseline_ms = snapshot.baseline_ms;
    let mut next = 0usize;
    let mut last_relative: Option<i64> = None;

    loop {
        if out.cancel.is_cancelled() {
            return;
        }
        if let Some(clock) = clocks.read(&out.record_id) {
            let relative = clock.relative_ms;
            if let Some(prev) = last_relative.filter(|prev| relative.saturating_add(tolerance_ms) < *prev) {
                tracing::warn!(
                    record_id = %out.record_id,
                    capability = cap.as_str(),
                    from = prev,
                    to = relative,
                    "backward seek, closing replay session"
                );
                out.abort(SEEK_BACKWARD);
                return;
            }
            last_relative = Some(relative);

            if !clock.is_paused() {
                let cutoff = clock.cutoff(baseline_ms);
                if clock.base_epoch_ms > 0 && (baseline_ms <= 0 || clock.base_epoch_ms < baseline_ms) {
                    baseline_ms = clock.base_epoch_ms;
                }
                while let Some(event) = events.get(next) {
                    if event.timestamp_ms > cutoff {
                        break;
                    }
                    if !out.emit(event, baseline_ms) {
                        return;
                    }
                    next += 1;
                }
            }
        }
        if !out.sleep(poll).await {
            return;
        }
    }
}
