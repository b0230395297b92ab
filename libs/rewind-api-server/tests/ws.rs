use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use rewind_engine::{Engine, RewindConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    engine: Arc<Engine>,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Server {
    async fn start() -> Self {
        let engine = Arc::new(Engine::bootstrap(RewindConfig::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(rewind_api_server::serve(listener, engine.clone(), shutdown.clone()));
        Self { engine, addr, shutdown }
    }

    async fn connect(&self, path: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{}{}", self.addr, path)).await.unwrap();
        ws
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(_) => return serde_json::from_str(msg.to_text().unwrap()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

async fn next_close_code(ws: &mut Client) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended")
            .unwrap();
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code)).unwrap_or_default();
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn replay_refuses_unknown_record() {
    let server = Server::start().await;
    let mut ws = server.connect("/ws/cdp?recordId=missing").await;
    assert_eq!(next_close_code(&mut ws).await, 1008);

    let mut ws = server.connect("/ws/ingest").await;
    assert_eq!(next_close_code(&mut ws).await, 1008);
}

#[tokio::test]
async fn ingest_then_replay_immediately() {
    let server = Server::start().await;
    let record_id = server.engine.ingestor().create_record(Default::default()).record_id;

    let mut ingest = server.connect(&format!("/ws/ingest?recordId={record_id}")).await;
    send(&mut ingest, json!({"type": "console", "level": "warn", "message": "second", "ts": 2000, "seq": 1})).await;
    send(&mut ingest, json!({"type": "console", "level": "log", "message": "first", "ts": 1000, "seq": 1})).await;
    ingest.send(Message::Text("not json".into())).await.unwrap();
    send(
        &mut ingest,
        json!({"type": "network", "url": "/api", "status": 200, "responseBody": "hello", "startedAtEpochMs": 1500}),
    )
    .await;

    let log = server.engine.log().clone();
    let rid = record_id.clone();
    eventually(move || {
        log.page(&rid, rewind_api::EventKind::Network, Default::default(), 10, &Default::default())
            .len()
            == 1
    })
    .await;

    let mut cdp = server.connect(&format!("/ws/cdp?recordId={record_id}&mode=immediate")).await;
    send(&mut cdp, json!({"id": 1, "method": "Log.enable"})).await;
    assert_eq!(next_json(&mut cdp).await, json!({"id": 1, "result": {}}));
    let first = next_json(&mut cdp).await;
    assert_eq!(first["method"], "Log.entryAdded");
    assert_eq!(first["params"]["entry"]["text"], "first");
    assert_eq!(first["params"]["entry"]["timestamp"], 0.0);
    let second = next_json(&mut cdp).await;
    assert_eq!(second["params"]["entry"]["level"], "warning");

    send(&mut cdp, json!({"id": 2, "method": "Network.enable"})).await;
    assert_eq!(next_json(&mut cdp).await, json!({"id": 2, "result": {}}));
    let will = next_json(&mut cdp).await;
    assert_eq!(will["method"], "Network.requestWillBeSent");
    let request_id = will["params"]["requestId"].as_str().unwrap().to_string();
    assert_eq!(next_json(&mut cdp).await["method"], "Network.responseReceived");
    assert_eq!(next_json(&mut cdp).await["method"], "Network.loadingFinished");

    send(&mut cdp, json!({"id": 3, "method": "Network.getResponseBody", "params": {"requestId": request_id}})).await;
    assert_eq!(
        next_json(&mut cdp).await,
        json!({"id": 3, "result": {"body": "hello", "base64Encoded": false}})
    );

    send(&mut cdp, json!({"id": 4, "method": "Overlay.setShowViewportSizeOnResize", "params": {}})).await;
    assert_eq!(next_json(&mut cdp).await, json!({"id": 4, "result": {}}));
}

#[tokio::test]
async fn clock_channel_updates_registry() {
    let server = Server::start().await;
    let mut clock = server.connect("/ws/clock").await;
    clock.send(Message::Text("{broken".into())).await.unwrap();
    send(
        &mut clock,
        json!({"type": "clock", "recordId": "r-7", "tMs": 250, "baseEpochMs": 10000, "mode": "pause", "speed": 0}),
    )
    .await;

    let clocks = server.engine.clocks().clone();
    eventually(move || clocks.read("r-7").is_some()).await;
    let snap = server.engine.clocks().read("r-7").unwrap();
    assert_eq!(snap.absolute_epoch_ms, 10_250);
    assert!(snap.is_paused());
    assert_eq!(snap.speed, 1.0);
}

#[tokio::test]
async fn live_observer_gets_backlog_then_live_events() {
    let server = Server::start().await;
    let record_id = server.engine.ingestor().create_record(Default::default()).record_id;
    server
        .engine
        .ingestor()
        .ingest_json(&record_id, r#"{"type":"console","level":"error","message":"boom","ts":1}"#)
        .unwrap();

    let mut live = server.connect("/ws/live").await;
    let start = next_json(&mut live).await;
    assert_eq!(start["type"], "history_start");
    assert_eq!(start["count"], 2);
    let created = next_json(&mut live).await;
    assert_eq!(created["type"], "record-created");
    assert_eq!(created["_buffered"], true);
    assert_eq!(next_json(&mut live).await["type"], "console-error");
    assert_eq!(next_json(&mut live).await["type"], "history_end");

    let hub = server.engine.hub().clone();
    eventually(move || hub.subscriber_count() == 1).await;
    server
        .engine
        .ingestor()
        .ingest_json(
            &record_id,
            r#"{"type":"network","url":"/slow","status":200,"durationMs":4000,"startedAtEpochMs":5}"#,
        )
        .unwrap();
    let slow = next_json(&mut live).await;
    assert_eq!(slow["type"], "network-slow");
    assert!(slow.get("_buffered").is_none());
}
