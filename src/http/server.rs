//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the wildcard proxy handler
//! - Wire up middleware (tracing)
//! - Assign correlation ids and capture inbound bodies
//! - Hand requests to the forwarding engine
//! - Stop serving on graceful shutdown or on a fatal report

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::body::BodyBuffer;
use crate::http::forward::{Forwarder, SetupError};
use crate::http::request::RequestEnvelope;
use crate::lifecycle::{shutdown_signal, FatalError, FatalReporter, Supervisor};
use crate::observability::journal::{Journal, JournalRecord};
use crate::session::SessionState;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionState>,
    pub forwarder: Arc<Forwarder>,
    pub reporter: FatalReporter,
    pub max_body_bytes: usize,
}

/// Why the server stopped serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),
}

/// HTTP server for the intercepting proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    session: Arc<SessionState>,
    forwarder: Arc<Forwarder>,
    supervisor: Supervisor,
}

impl HttpServer {
    /// Create a new HTTP server writing its journal to `journal`.
    pub fn new(config: ProxyConfig, journal: Journal) -> Result<Self, SetupError> {
        let session = Arc::new(SessionState::new(journal, config.api_keys.keys.clone()));
        let forwarder = Arc::new(Forwarder::new(&config, session.clone())?);
        let supervisor = Supervisor::new();

        let state = AppState {
            session: session.clone(),
            forwarder: forwarder.clone(),
            reporter: supervisor.reporter(),
            max_body_bytes: config.limits.max_body_bytes,
        };

        Ok(Self {
            router: Self::build_router(state),
            config,
            session,
            forwarder,
            supervisor,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for driving the proxy without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn session(&self) -> Arc<SessionState> {
        self.session.clone()
    }

    pub fn forwarder(&self) -> Arc<Forwarder> {
        self.forwarder.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve on `listener` until shutdown (`Ok`) or a fatal report (`Err`).
    ///
    /// A fatal report stops the run loop immediately, without draining
    /// in-flight requests, and closes admission so that requests still
    /// waiting for a slot are answered 503.
    pub async fn run(
        mut self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.url,
            admission_capacity = self.config.admission.capacity,
            max_attempts = self.config.retries.max_attempts,
            "HTTP server starting"
        );
        self.session.emit(&JournalRecord::Startup {
            listen: &addr.to_string(),
            upstream: &self.config.upstream.url,
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .into_future();

        tokio::select! {
            result = serve => {
                result?;
                tracing::info!("HTTP server stopped");
                Ok(())
            }
            fatal = self.supervisor.wait() => {
                tracing::error!(error = %fatal, "Stopping server after fatal error");
                // Queued requests must not start new upstream attempts.
                self.forwarder.admission().close();
                Err(ServerError::Fatal(fatal))
            }
        }
    }
}

/// Proxy handler for every method and path.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    // The id is assigned before the body is read, so ids follow arrival order.
    let id = state.session.begin_request();
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();
    let body = match BodyBuffer::capture(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(correlation_id = %id, error = %e, "Unable to read request body");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Unable to read request body")
                .into_response();
        }
    };

    tracing::debug!(
        correlation_id = %id,
        method = %parts.method,
        path = %parts.uri.path(),
        body_len = body.len(),
        "Proxying request"
    );

    let envelope = RequestEnvelope::new(id, parts, body, client_addr);

    // Forwarding runs in its own task: a client disconnect does not cancel
    // the attempt sequence or the fatal report at its end.
    let forwarder = state.forwarder.clone();
    let reporter = state.reporter.clone();
    let task = tokio::spawn(async move {
        let outcome = forwarder.forward(&envelope).await;
        if let Err(fatal) = &outcome {
            reporter.report(fatal.clone());
        }
        outcome
    });

    match task.await {
        Ok(Ok(response)) => response,
        // The process is going down; the client gets no response.
        Ok(Err(_)) => std::future::pending().await,
        Err(e) => {
            tracing::error!(correlation_id = %id, error = %e, "Forwarding task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Forwarding task failed").into_response()
        }
    }
}
