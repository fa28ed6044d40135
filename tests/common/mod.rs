//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use intercept_proxy::config::ProxyConfig;
use intercept_proxy::http::{HttpServer, ServerError};
use intercept_proxy::lifecycle::Shutdown;
use intercept_proxy::observability::{Journal, MemorySink};
use intercept_proxy::session::SessionState;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One request as the mock upstream saw it.
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// When the request reached the upstream.
    pub at: Instant,
}

type ReplyFuture = Pin<Box<dyn Future<Output = (u16, String)> + Send>>;
type Reply = Arc<dyn Fn(usize) -> ReplyFuture + Send + Sync>;

#[derive(Clone)]
struct UpstreamState {
    reply: Reply,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<Captured>>>,
}

/// A programmable upstream on an ephemeral port.
pub struct MockUpstream {
    pub addr: SocketAddr,
    state: UpstreamState,
}

impl MockUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Highest number of requests the upstream was serving at once.
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.state.captured.lock().unwrap().clone()
    }

    /// Time between consecutive arrivals.
    pub fn arrival_gaps(&self) -> Vec<Duration> {
        self.captured()
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

/// Start an upstream whose reply is computed from the zero-based call index.
pub async fn start_programmable_upstream<F, Fut>(f: F) -> MockUpstream
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let reply: Reply = Arc::new(move |n| -> ReplyFuture { Box::pin(f(n)) });
    let state = UpstreamState {
        reply,
        calls: Arc::new(AtomicUsize::new(0)),
        in_flight: Arc::new(AtomicUsize::new(0)),
        peak: Arc::new(AtomicUsize::new(0)),
        captured: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .fallback(upstream_handler)
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream { addr, state }
}

/// Start an upstream that always answers with `status` and `body`.
pub async fn start_mock_upstream(status: u16, body: &'static str) -> MockUpstream {
    start_programmable_upstream(move |_| async move { (status, body.to_string()) }).await
}

async fn upstream_handler(State(state): State<UpstreamState>, request: Request<Body>) -> Response {
    let at = Instant::now();
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    state.captured.lock().unwrap().push(Captured {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
        at,
    });

    let n = state.calls.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(now, Ordering::SeqCst);

    let (status, body) = (state.reply)(n).await;

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(status).unwrap();
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Proxy configuration pointed at `upstream`, with a short retry interval.
pub fn proxy_config(upstream: &MockUpstream) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.url = upstream.url();
    config.retries.interval_ms = 50;
    config.journal.console = false;
    config.journal.file = None;
    config
}

/// A proxy running on an ephemeral port with an in-memory journal.
pub struct ProxyHandle {
    pub addr: SocketAddr,
    pub journal: MemorySink,
    pub session: Arc<SessionState>,
    pub shutdown: Shutdown,
    pub server: JoinHandle<Result<(), ServerError>>,
}

impl ProxyHandle {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Build the server with a memory journal, without binding a socket.
pub fn build_server(config: ProxyConfig) -> (HttpServer, MemorySink) {
    let sink = MemorySink::default();
    let journal = Journal::new(vec![Box::new(sink.clone())]);
    let server = HttpServer::new(config, journal).unwrap();
    (server, sink)
}

pub async fn start_proxy(config: ProxyConfig) -> ProxyHandle {
    let (server, journal) = build_server(config);
    let session = server.session();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let server = tokio::spawn(server.run(listener, rx));

    ProxyHandle {
        addr,
        journal,
        session,
        shutdown,
        server,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
