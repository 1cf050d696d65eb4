use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bulkpull_client::{
    push_url, ClientError, ConnectionState, HttpJobApi, JobApi, ReconnectPolicy, Subscriber,
    SubscriberConfig,
};
use bulkpull_core::testing::ScriptedProvider;
use bulkpull_core::{AppConfig, ProviderRegistry};
use bulkpull_db::Database;
use bulkpull_server::{create_app, AppState};
use bulkpull_types::{
    CancelResponse, ClientMessage, DataSourceHandle, Estimate, Job, JobId, JobList, JobProgress,
    JobStatus, SearchQuery, ServerMessage, StartJobRequest,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Serves a fixed sequence of snapshots; the last one repeats.
struct ScriptedApi {
    snapshots: Mutex<VecDeque<Job>>,
    gets: AtomicUsize,
}

impl ScriptedApi {
    fn new(snapshots: Vec<Job>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            gets: AtomicUsize::new(0),
        }
    }
}

fn unsupported<T>() -> Result<T, ClientError> {
    Err(ClientError::Status {
        status: 501,
        message: "not scripted".into(),
    })
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn estimate(&self, _: &SearchQuery, _: &DataSourceHandle) -> Result<Estimate, ClientError> {
        unsupported()
    }

    async fn start(&self, _: &StartJobRequest) -> Result<JobId, ClientError> {
        unsupported()
    }

    async fn get(&self, _job_id: &str) -> Result<Job, ClientError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.lock().unwrap();
        if snapshots.len() > 1 {
            Ok(snapshots.pop_front().unwrap())
        } else {
            Ok(snapshots.front().cloned().unwrap())
        }
    }

    async fn cancel(&self, _: &str) -> Result<CancelResponse, ClientError> {
        unsupported()
    }

    async fn list(&self) -> Result<JobList, ClientError> {
        unsupported()
    }
}

fn snapshot(status: JobStatus, page: u32) -> Job {
    let mut job = Job::pending("job_123", Utc::now());
    job.status = status;
    job.progress = JobProgress {
        current_page: page,
        total_pages: 10,
        processed_records: u64::from(page) * 100,
        total_estimated: 1000,
        percentage: JobProgress::percentage_of(u64::from(page) * 100, 1000),
    };
    job
}

fn fast_config(push_url: String, user: &str) -> SubscriberConfig {
    let mut config = SubscriberConfig::new(push_url, user);
    config.grace_window = Duration::from_millis(30);
    config.poll_interval = Duration::from_millis(10);
    config.auth_timeout = Duration::from_secs(2);
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 3,
    };
    config
}

#[tokio::test]
async fn falls_back_to_polling_when_push_never_connects() {
    let api = ScriptedApi::new(vec![
        snapshot(JobStatus::Pending, 0),
        snapshot(JobStatus::Running, 2),
        snapshot(JobStatus::Running, 6),
        snapshot(JobStatus::Completed, 10),
    ]);
    // Nothing listens on port 1.
    let subscriber = Subscriber::new(api, fast_config("ws://127.0.0.1:1/ws".into(), "u1"));
    let state = subscriber.state();

    let mut seen = Vec::new();
    let done = tokio::time::timeout(
        Duration::from_secs(10),
        subscriber.watch_job("job_123", |job| seen.push(job.progress.percentage)),
    )
    .await
    .expect("watch should finish")
    .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(seen, vec![0.0, 20.0, 60.0, 100.0]);
    assert!(subscriber.api().gets.load(Ordering::SeqCst) >= 4);
    assert_eq!(*state.borrow(), ConnectionState::Closed);
}

#[tokio::test]
async fn terminal_snapshot_on_first_poll_returns_immediately() {
    let api = ScriptedApi::new(vec![snapshot(JobStatus::Failed, 4)]);
    let subscriber = Subscriber::new(api, fast_config("ws://127.0.0.1:1/ws".into(), "u1"));

    let done = subscriber.watch_job("job_123", |_| {}).await.unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(subscriber.api().gets.load(Ordering::SeqCst), 1);
}

async fn spawn_server(provider: Arc<ScriptedProvider>) -> SocketAddr {
    let db = Database::new_in_memory().await.unwrap();
    let registry = Arc::new(ProviderRegistry::new().with("people", provider));
    let mut config = AppConfig::default();
    config.jobs.base_delay_ms = 1;
    config.jobs.max_delay_ms = 2;
    let state = AppState::new(db, registry, &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_app(state)).await.unwrap();
    });
    addr
}

fn leads_request() -> StartJobRequest {
    StartJobRequest {
        table_name: "Leads".into(),
        query: SearchQuery::terms("head of growth"),
        data_source_handle: DataSourceHandle::new("people"),
    }
}

#[tokio::test]
async fn follows_live_job_over_push() {
    let provider = Arc::new(ScriptedProvider::new(450).with_delay(Duration::from_millis(20)));
    let addr = spawn_server(provider).await;
    let base = format!("http://{addr}");

    let api = HttpJobApi::new(&base, "u1").unwrap();
    let job_id = api.start(&leads_request()).await.unwrap();

    let subscriber = Subscriber::new(api, fast_config(push_url(&base), "u1"));
    let mut percentages = Vec::new();
    let done = tokio::time::timeout(
        Duration::from_secs(10),
        subscriber.watch_job(&job_id, |job| percentages.push(job.progress.percentage)),
    )
    .await
    .expect("watch should finish")
    .unwrap();

    assert_eq!(done.id, job_id);
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress.processed_records, 450);
    assert_eq!(percentages.last(), Some(&100.0));
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn observes_cancellation() {
    let provider = Arc::new(ScriptedProvider::new(1000));
    provider.pause_at(3);
    let addr = spawn_server(Arc::clone(&provider)).await;
    let base = format!("http://{addr}");

    let api = HttpJobApi::new(&base, "u1").unwrap();
    let job_id = api.start(&leads_request()).await.unwrap();
    provider.wait_until_paused().await;

    let subscriber = Arc::new(Subscriber::new(api, fast_config(push_url(&base), "u1")));
    let watcher = {
        let subscriber = Arc::clone(&subscriber);
        let job_id = job_id.clone();
        tokio::spawn(async move { subscriber.watch_job(&job_id, |_| {}).await })
    };

    let ack = subscriber.api().cancel(&job_id).await.unwrap();
    assert!(ack.cancel_requested);
    provider.release();

    let done = tokio::time::timeout(Duration::from_secs(10), watcher)
        .await
        .expect("watch should finish")
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Cancelled);
    assert_eq!(done.progress.processed_records, 300);
}

#[tokio::test]
async fn unknown_job_is_an_error() {
    let addr = spawn_server(Arc::new(ScriptedProvider::new(0))).await;
    let base = format!("http://{addr}");
    let api = HttpJobApi::new(&base, "u1").unwrap();
    let subscriber = Subscriber::new(api, fast_config(push_url(&base), "u1"));

    let err = subscriber.watch_job("job_missing", |_| {}).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
}

/// What a scripted push connection does once it has acked the auth frame.
#[derive(Clone)]
enum AfterAuth {
    CloseNormally,
    /// Drop the TCP stream without a close frame.
    Abort,
    Push(ServerMessage),
    Silent,
}

struct PushScript {
    url: String,
    connections: Arc<AtomicUsize>,
    pings: Arc<AtomicUsize>,
}

/// Push endpoint whose nth connection follows `script[n]`; the last entry
/// repeats.
async fn spawn_push_script(script: Vec<AfterAuth>) -> PushScript {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    let pings = Arc::new(AtomicUsize::new(0));

    let (conn_count, ping_count) = (Arc::clone(&connections), Arc::clone(&pings));
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let n = conn_count.fetch_add(1, Ordering::SeqCst);
            let step = script[n.min(script.len() - 1)].clone();
            let pings = Arc::clone(&ping_count);
            tokio::spawn(serve_scripted(tcp, step, pings));
        }
    });

    PushScript {
        url,
        connections,
        pings,
    }
}

async fn serve_scripted(tcp: TcpStream, step: AfterAuth, pings: Arc<AtomicUsize>) {
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    while let Some(Ok(frame)) = ws.next().await {
        if frame.is_text() {
            break;
        }
    }
    send(&mut ws, &ServerMessage::AuthSuccess).await;

    match step {
        AfterAuth::CloseNormally => {
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                }))
                .await;
        }
        AfterAuth::Abort => {
            drop(ws);
            return;
        }
        AfterAuth::Push(message) => send(&mut ws, &message).await,
        AfterAuth::Silent => {}
    }

    while let Some(Ok(frame)) = ws.next().await {
        if let Message::Text(text) = frame {
            if serde_json::from_str::<ClientMessage>(text.as_str()).ok() == Some(ClientMessage::Ping) {
                pings.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, message: &ServerMessage) {
    let text = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

#[tokio::test]
async fn normal_close_stops_reconnecting_and_polls_to_the_end() {
    let push = spawn_push_script(vec![AfterAuth::CloseNormally]).await;
    let api = ScriptedApi::new(vec![
        snapshot(JobStatus::Running, 2),
        snapshot(JobStatus::Running, 2),
        snapshot(JobStatus::Running, 5),
        snapshot(JobStatus::Completed, 10),
    ]);
    let subscriber = Subscriber::new(api, fast_config(push.url.clone(), "u1"));

    let done = tokio::time::timeout(Duration::from_secs(10), subscriber.watch_job("job_123", |_| {}))
        .await
        .expect("watch should finish")
        .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(push.connections.load(Ordering::SeqCst), 1);
    assert!(subscriber.api().gets.load(Ordering::SeqCst) >= 4);
}

#[tokio::test]
async fn abnormal_drop_reconnects_and_resumes_push() {
    let mut complete = snapshot(JobStatus::Completed, 10);
    complete.completed_at = Some(Utc::now());
    let push = spawn_push_script(vec![
        AfterAuth::Abort,
        AfterAuth::Push(ServerMessage::JobComplete(complete)),
    ])
    .await;
    // Polling alone never sees the job finish.
    let api = ScriptedApi::new(vec![snapshot(JobStatus::Running, 3)]);
    let subscriber = Subscriber::new(api, fast_config(push.url.clone(), "u1"));

    let mut seen = Vec::new();
    let done = tokio::time::timeout(
        Duration::from_secs(10),
        subscriber.watch_job("job_123", |job| seen.push(job.status)),
    )
    .await
    .expect("watch should finish")
    .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress.processed_records, 1000);
    assert_eq!(push.connections.load(Ordering::SeqCst), 2);
    assert_eq!(seen, vec![JobStatus::Running, JobStatus::Completed]);
}

#[tokio::test]
async fn silent_connection_still_reaches_terminal_state() {
    let push = spawn_push_script(vec![AfterAuth::Silent]).await;
    let api = ScriptedApi::new(vec![
        snapshot(JobStatus::Running, 1),
        snapshot(JobStatus::Running, 1),
        snapshot(JobStatus::Running, 4),
        snapshot(JobStatus::Completed, 10),
    ]);
    let mut config = fast_config(push.url.clone(), "u1");
    config.reconcile_interval = Duration::from_millis(20);
    let subscriber = Subscriber::new(api, config);
    let state = subscriber.state();

    let done = tokio::time::timeout(Duration::from_secs(10), subscriber.watch_job("job_123", |_| {}))
        .await
        .expect("watch should finish without a terminal push event")
        .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress.processed_records, 1000);
    // Settled over the one live connection, with a ping per quiet period.
    assert_eq!(push.connections.load(Ordering::SeqCst), 1);
    assert!(subscriber.api().gets.load(Ordering::SeqCst) >= 4);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(push.pings.load(Ordering::SeqCst) >= 2);
    assert_eq!(*state.borrow(), ConnectionState::Closed);
}
