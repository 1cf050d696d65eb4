use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bulkpull_core::testing::ScriptedProvider;
use bulkpull_core::{AppConfig, ProviderRegistry};
use bulkpull_db::Database;
use bulkpull_server::{create_app, AppState};
use bulkpull_types::{CellUpdate, DataSourceHandle, SearchQuery, ServerMessage, StartJobRequest};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(provider: Arc<ScriptedProvider>, config: AppConfig) -> (SocketAddr, Arc<AppState>) {
    let db = Database::new_in_memory().await.unwrap();
    let registry = Arc::new(ProviderRegistry::new().with("people", provider));
    let state = AppState::new(db, registry, &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.jobs.base_delay_ms = 1;
    config.jobs.max_delay_ms = 2;
    config
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, skipping protocol pings and pongs.
async fn next_json(ws: &mut Ws) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

async fn authed(addr: SocketAddr, user: Value) -> Ws {
    let mut ws = connect(addr).await;
    send(&mut ws, json!({"type": "auth", "userId": user})).await;
    assert_eq!(next_json(&mut ws).await, json!({"type": "auth_success"}));
    ws
}

#[tokio::test]
async fn auth_then_ping_pong() {
    let (addr, state) = spawn_server(Arc::new(ScriptedProvider::new(0)), fast_config()).await;
    let mut ws = authed(addr, json!("u1")).await;
    assert_eq!(state.notifier.subscriber_count("u1"), 1);

    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut ws).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn first_frame_must_be_auth() {
    let (addr, state) = spawn_server(Arc::new(ScriptedProvider::new(0)), fast_config()).await;
    let mut ws = connect(addr).await;
    send(&mut ws, json!({"type": "ping"})).await;

    let err = next_json(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["data"]["message"], "first message must be auth");

    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1008),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(state.notifier.connection_count(), 0);
}

#[tokio::test]
async fn silent_connection_times_out() {
    let mut config = fast_config();
    config.push.auth_timeout_secs = 1;
    let (addr, _) = spawn_server(Arc::new(ScriptedProvider::new(0)), config).await;

    let mut ws = connect(addr).await;
    let err = next_json(&mut ws).await;
    assert_eq!(err["data"]["message"], "auth timeout");
}

#[tokio::test]
async fn numeric_user_id_matches_string_owner() {
    let (addr, state) = spawn_server(Arc::new(ScriptedProvider::new(0)), fast_config()).await;
    let mut ws = authed(addr, json!(42)).await;

    let cell = ServerMessage::CellUpdate(CellUpdate {
        table_id: "t1".into(),
        row_id: "r9".into(),
        column_id: "email".into(),
        value: json!("x@y.z"),
    });
    assert_eq!(state.notifier.publish("42", &cell), 1);
    assert_eq!(next_json(&mut ws).await["data"]["rowId"], "r9");
}

#[tokio::test]
async fn events_fan_out_per_owner() {
    let (addr, state) = spawn_server(Arc::new(ScriptedProvider::new(0)), fast_config()).await;
    let mut tab_a = authed(addr, json!("u1")).await;
    let mut tab_b = authed(addr, json!("u1")).await;
    let mut other = authed(addr, json!("u2")).await;
    assert_eq!(state.notifier.subscriber_count("u1"), 2);

    let cell = ServerMessage::CellUpdate(CellUpdate {
        table_id: "t1".into(),
        row_id: "r1".into(),
        column_id: "title".into(),
        value: json!("CTO"),
    });
    assert_eq!(state.notifier.publish("u1", &cell), 2);

    assert_eq!(next_json(&mut tab_a).await["type"], "cell_update");
    assert_eq!(next_json(&mut tab_b).await["type"], "cell_update");

    // u2 only sees its own traffic
    send(&mut other, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut other).await["type"], "pong");
}

#[tokio::test]
async fn job_events_stream_to_completion() {
    let (addr, state) = spawn_server(Arc::new(ScriptedProvider::new(450)), fast_config()).await;
    let mut ws = authed(addr, json!("u1")).await;

    let job_id = state
        .jobs
        .start(
            "u1",
            StartJobRequest {
                table_name: "Leads".into(),
                query: SearchQuery::terms("vp sales"),
                data_source_handle: DataSourceHandle::new("people"),
            },
        )
        .await
        .unwrap();

    let mut percentages = Vec::new();
    let last = loop {
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["data"]["id"], job_id.as_str());
        let kind = frame["type"].as_str().unwrap().to_string();
        percentages.push(frame["data"]["progress"]["percentage"].as_f64().unwrap());
        if kind != "job_progress" {
            break frame;
        }
    };

    assert_eq!(last["type"], "job_complete");
    assert_eq!(last["data"]["progress"]["processedRecords"], 450);
    assert_eq!(last["data"]["progress"]["currentPage"], 5);
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn heartbeat_pings_arrive() {
    let mut config = fast_config();
    config.push.heartbeat_secs = 1;
    let (addr, _) = spawn_server(Arc::new(ScriptedProvider::new(0)), config).await;
    let mut ws = authed(addr, json!("u1")).await;

    let got_ping = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Some(Ok(Message::Ping(_))) = ws.next().await {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(got_ping);
}

#[tokio::test]
async fn disconnect_removes_subscription() {
    let (addr, state) = spawn_server(Arc::new(ScriptedProvider::new(0)), fast_config()).await;
    let mut ws = authed(addr, json!("u1")).await;
    assert_eq!(state.notifier.subscriber_count("u1"), 1);

    ws.close(None).await.unwrap();
    for _ in 0..200 {
        if state.notifier.subscriber_count("u1") == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscription was not removed");
}
