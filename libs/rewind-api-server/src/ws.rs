use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::Value;

use rewind_engine::replay::CLOSE_POLICY;
use rewind_engine::{ClockSyncMessage, Outbound, ReplayOptions, ReplaySession};

use super::AppState;

/// Close code for frames that carry unusable data.
const CLOSE_BAD_DATA: u16 = 1007;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectParams {
    record_id: Option<String>,
    mode: Option<String>,
    speed: Option<String>,
}

impl ConnectParams {
    fn record_id(&self) -> Option<String> {
        self.record_id.as_deref().map(sanitize_record_id).filter(|id| !id.is_empty())
    }
}

/// Debugger frontends are often launched from a pasted URL; drop anything
/// that follows the record id.
fn sanitize_record_id(raw: &str) -> String {
    let mut id = raw;
    for marker in ["devtools://", "chrome-devtools://"] {
        if let Some(at) = id.find(marker) {
            id = &id[..at];
        }
    }
    id.split_whitespace().next().unwrap_or_default().to_string()
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}

async fn close(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

// ═══════════════════════════════════════════════════════════════
//  /ws/ingest?recordId=
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_ingest(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ingest_connection(socket, state, params))
}

async fn ingest_connection(mut socket: WebSocket, state: AppState, params: ConnectParams) {
    let record_id = match params.record_id() {
        Some(id) if state.engine.log().contains_record(&id) => id,
        other => {
            tracing::warn!(record_id = ?other, "ingest rejected: unknown record");
            close(&mut socket, CLOSE_POLICY, "record not found").await;
            return;
        }
    };
    tracing::info!(record_id = %record_id, "ingest connected");

    let ingestor = state.engine.ingestor().clone();
    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        if let Err(e) = ingestor.ingest_json(&record_id, &text) {
            tracing::debug!(record_id = %record_id, error = %e, "dropping ingest message");
        }
    }

    tracing::info!(record_id = %record_id, "ingest disconnected");
}

// ═══════════════════════════════════════════════════════════════
//  /ws/clock
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_clock(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| clock_connection(socket, state))
}

async fn clock_connection(mut socket: WebSocket, state: AppState) {
    tracing::info!("clock connected");

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let sync: ClockSyncMessage = match serde_json::from_str(&text) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed clock message");
                continue;
            }
        };
        if !sync.is_clock() {
            continue;
        }
        let record_id = sync.record_id.trim();
        if record_id.is_empty() {
            tracing::warn!("clock message without recordId, closing");
            close(&mut socket, CLOSE_BAD_DATA, "missing recordId").await;
            break;
        }
        state.engine.clocks().update(record_id, &sync.to_tick());
    }

    tracing::info!("clock disconnected");
}

// ═══════════════════════════════════════════════════════════════
//  /ws/live
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_live(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| live_connection(socket, state))
}

async fn live_connection(mut socket: WebSocket, state: AppState) {
    let hub = state.engine.hub().clone();
    let mut sub = hub.subscribe();
    tracing::info!(subscriber = sub.id(), total = hub.subscriber_count(), "live observer connected");

    loop {
        tokio::select! {
            biased;

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }

            item = sub.recv() => {
                match item {
                    Some(value) => {
                        if !send_json(&mut socket, &value).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    hub.unsubscribe(sub.id());
    tracing::info!(subscriber = sub.id(), total = hub.subscriber_count(), "live observer disconnected");
}

// ═══════════════════════════════════════════════════════════════
//  /ws/cdp?recordId=&mode=&speed=
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_cdp(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| cdp_connection(socket, state, params))
}

async fn cdp_connection(mut socket: WebSocket, state: AppState, params: ConnectParams) {
    let options = ReplayOptions::from_params(params.mode.as_deref(), params.speed.as_deref());
    let record_id = params.record_id();
    let connected = ReplaySession::connect(
        state.engine.merger().clone(),
        state.engine.clocks().clone(),
        record_id.as_deref(),
        options,
        state.engine.config().replay.clone(),
    )
    .await;
    let (mut session, mut rx) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(record_id = ?record_id, error = %e, "replay rejected");
            close(&mut socket, e.close_code(), &e.to_string()).await;
            return;
        }
    };
    tracing::info!(
        record_id = %session.record_id(),
        mode = ?options.mode,
        speed = options.speed,
        "replay connected"
    );

    loop {
        tokio::select! {
            biased;

            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };
                match msg {
                    Message::Text(text) => session.handle(&text).await,
                    Message::Close(_) => break,
                    _ => continue,
                }
            }

            out = rx.recv() => {
                match out {
                    Some(Outbound::Message(value)) => {
                        if !send_json(&mut socket, &value).await {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        close(&mut socket, code, &reason).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!(record_id = %session.record_id(), "replay disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_is_cut_at_pasted_urls() {
        assert_eq!(sanitize_record_id(" abc "), "abc");
        assert_eq!(sanitize_record_id("abcdevtools://devtools/x"), "abc");
        assert_eq!(sanitize_record_id("abc\nchrome-devtools://x"), "abc");
        assert_eq!(sanitize_record_id("abc def"), "abc");
        assert_eq!(sanitize_record_id(""), "");
    }
}
