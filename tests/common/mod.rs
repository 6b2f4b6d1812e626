//! Shared helpers for integration tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokenwatch::config::Settings;
use tokenwatch::handlers::{create_router, AppState};
use tokenwatch::models::UsageRecord;
use tokenwatch::services::{MemoryStore, PricingTable, RecordSink};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Serve `router` on an ephemeral localhost port
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Settings pointing both dialects at test upstreams
pub fn test_settings(anthropic_url: &str, openai_url: &str) -> Settings {
    let mut settings = Settings::default();
    settings.upstream.anthropic_url = anthropic_url.to_string();
    settings.upstream.openai_url = openai_url.to_string();
    settings.upstream.use_system_proxy = false;
    settings.upstream.connect_timeout = 2;
    settings.upstream.read_timeout = 10;
    settings
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Run the full proxy stack with an in-memory record store
pub async fn spawn_proxy(settings: Settings) -> TestProxy {
    let store = Arc::new(MemoryStore::new());
    let (sink, _worker) = RecordSink::spawn(
        store.clone(),
        settings.sink.queue_capacity,
        settings.enqueue_timeout(),
    );

    let state = AppState::new(settings, PricingTable::builtin(), sink).unwrap();
    let addr = spawn_server(create_router(Arc::new(state))).await;

    TestProxy { addr, store }
}

/// HTTP client for talking to the proxy
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Poll the store until it holds at least `count` records
pub async fn wait_for_records(store: &MemoryStore, count: usize, timeout: Duration) -> Vec<UsageRecord> {
    let deadline = Instant::now() + timeout;
    loop {
        let records = store.records().await;
        if records.len() >= count || Instant::now() >= deadline {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll `flag` until it is set or `timeout` passes
pub async fn wait_for_flag(flag: &AtomicBool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !flag.load(Ordering::SeqCst) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}

/// One step of a scripted upstream body
pub enum Step {
    Chunk(&'static str),
    Sleep(Duration),
    /// Abort the connection without finishing the body
    Fail,
}

/// Event-stream response whose body follows `steps`
pub fn scripted_sse(steps: Vec<Step>) -> Response {
    scripted_sse_watched(steps, Arc::new(AtomicBool::new(false)))
}

/// Like [`scripted_sse`], setting `reader_gone` once the body is dropped before all steps ran
pub fn scripted_sse_watched(steps: Vec<Step>, reader_gone: Arc<AtomicBool>) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);

    tokio::spawn(async move {
        for step in steps {
            let item = match step {
                Step::Chunk(text) => Ok(Bytes::from_static(text.as_bytes())),
                Step::Sleep(delay) => {
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Step::Fail => Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "upstream went away",
                )),
            };
            if tx.send(item).await.is_err() {
                reader_gone.store(true, Ordering::SeqCst);
                return;
            }
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap()
}

pub const ANTHROPIC_EVENTS: &[&str] = &[
    "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_stream_1\",\"model\":\"claude-sonnet-4-5-20250929\",\"usage\":{\"input_tokens\":200,\"output_tokens\":1,\"cache_read_input_tokens\":50}}}\n\n",
    "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
    "event: ping\ndata: {\"type\":\"ping\"}\n\n",
    "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
    "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
    "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":75}}\n\n",
    "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
];
