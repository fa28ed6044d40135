//! Forwarding engine.
//!
//! Drives one inbound request through up to `max_attempts` upstream
//! attempts while holding a single admission permit:
//!
//! ```text
//! acquire permit
//! for attempt in 1..=max:
//!     build outbound (Host, path) → rotate key → rewrite body → journal
//!     send → capture → rewrite body → journal
//!         (body over the limit: journal headers only, stream through as is)
//!     2xx → return to client
//!     else → journal retry, sleep interval (permit still held)
//! journal exhaustion → FatalError
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Response, StatusCode, Version};
use axum::response::IntoResponse;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::config::ProxyConfig;
use crate::http::body::CaptureError;
use crate::http::request::{RequestEnvelope, Upstream, UpstreamError};
use crate::http::response::{ResponseCapture, ResponseEnvelope};
use crate::http::rewrite::{PayloadRewriter, TransformError};
use crate::lifecycle::FatalError;
use crate::observability::journal::JournalRecord;
use crate::observability::metrics;
use crate::resilience::{is_success, AdmissionGate, RetryPolicy};
use crate::session::SessionState;

/// A failed attempt that the retry loop recovers from.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Request(#[from] UpstreamError),

    #[error("upstream transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read upstream response: {0}")]
    ResponseBody(#[from] CaptureError),

    #[error("upstream returned {0}")]
    Status(StatusCode),
}

/// Error constructing the forwarding engine.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Rewrite(#[from] TransformError),
}

/// Forwards requests to the upstream with rewriting, journaling and retries.
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    upstream: Upstream,
    session: Arc<SessionState>,
    admission: AdmissionGate,
    policy: RetryPolicy,
    outbound: PayloadRewriter,
    inbound: PayloadRewriter,
    rotate_api_key: bool,
    apply_api_key: bool,
    max_body_bytes: usize,
}

impl Forwarder {
    pub fn new(config: &ProxyConfig, session: Arc<SessionState>) -> Result<Self, SetupError> {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(
            config.upstream.connect_timeout_ms,
        )));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            upstream: Upstream::parse(&config.upstream.url)?,
            session,
            admission: AdmissionGate::new(config.admission.capacity),
            policy: RetryPolicy::from(&config.retries),
            outbound: PayloadRewriter::new(&config.rewrite.outbound)?,
            inbound: PayloadRewriter::new(&config.rewrite.inbound)?,
            rotate_api_key: config.api_keys.rotate,
            apply_api_key: config.api_keys.apply,
            max_body_bytes: config.limits.max_body_bytes,
        })
    }

    pub fn admission(&self) -> &AdmissionGate {
        &self.admission
    }

    /// Forward `envelope` until an attempt succeeds or the policy is exhausted.
    pub async fn forward(&self, envelope: &RequestEnvelope) -> Result<Response<Body>, FatalError> {
        let id = envelope.id;
        let _permit = match self.admission.acquire().await {
            Ok(permit) => permit,
            // Closed only once a fatal error is stopping the server.
            Err(e) => {
                tracing::error!(correlation_id = %id, error = %e, "Admission failed");
                return Ok((StatusCode::SERVICE_UNAVAILABLE, "Admission closed").into_response());
            }
        };

        for attempt in self.policy.attempts() {
            match self.attempt(envelope).await {
                Ok(response) => {
                    tracing::debug!(correlation_id = %id, attempt, status = %response.status(), "Upstream succeeded");
                    return Ok(response);
                }
                Err(AttemptError::Status(status)) => {
                    tracing::warn!(correlation_id = %id, attempt, status = %status, "Upstream returned failure status");
                }
                Err(e) => {
                    tracing::warn!(correlation_id = %id, attempt, error = %e, "Upstream attempt failed");
                    self.session.emit(&JournalRecord::TransportError {
                        id,
                        attempt,
                        error: &e,
                    });
                }
            }

            self.session.emit(&JournalRecord::Retry {
                id,
                attempt,
                max_attempts: self.policy.max_attempts,
            });
            metrics::record_retry();
            tokio::time::sleep(self.policy.interval).await;
        }

        self.session.emit(&JournalRecord::Exhausted {
            id,
            attempts: self.policy.max_attempts,
        });
        Err(FatalError::RetriesExhausted {
            id,
            attempts: self.policy.max_attempts,
        })
    }

    async fn attempt(&self, envelope: &RequestEnvelope) -> Result<Response<Body>, AttemptError> {
        // The index advances on every attempt; whether the key is attached is separate.
        let key = if self.rotate_api_key {
            self.session.rotate_api_key()
        } else {
            self.session.current_api_key()
        };
        let key = key.filter(|_| self.apply_api_key);

        let body = self.outbound.rewrite(&envelope.body);
        let request = envelope.outbound(&self.upstream, &body, key)?;

        self.session.emit(&JournalRecord::Request {
            id: envelope.id,
            method: request.method(),
            url: request.uri(),
            version: envelope.version,
            headers: request.headers(),
            body: body.as_bytes(),
        });

        let start = Instant::now();
        let response = match self.client.request(request).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_attempt("error", start);
                return Err(e.into());
            }
        };
        let captured = ResponseEnvelope::capture(response, self.max_body_bytes).await?;
        metrics::record_attempt(captured.status().as_str(), start);

        let mut response = match captured {
            ResponseCapture::Buffered(buffered) => buffered,
            ResponseCapture::Oversized { version, response } => {
                return self.pass_through(envelope, version, response);
            }
        };

        // Content-Length only changes when the body was re-encoded.
        if let Some(rewritten) = self.inbound.try_rewrite(response.body.as_bytes()) {
            response.replace_body(rewritten.into());
        }

        self.session.emit(&JournalRecord::Response {
            id: envelope.id,
            version: response.version,
            status: response.status,
            headers: &response.headers,
            body: response.body.as_bytes(),
        });

        if is_success(response.status) {
            Ok(response.into_response())
        } else {
            Err(AttemptError::Status(response.status))
        }
    }

    /// A response too large to buffer is journaled without its body. On
    /// success it streams to the client unrewritten.
    fn pass_through(
        &self,
        envelope: &RequestEnvelope,
        version: Version,
        response: Response<Body>,
    ) -> Result<Response<Body>, AttemptError> {
        let status = response.status();
        tracing::warn!(
            correlation_id = %envelope.id,
            status = %status,
            limit = self.max_body_bytes,
            "Upstream response exceeds body limit, passing through unrewritten"
        );
        self.session.emit(&JournalRecord::OversizedResponse {
            id: envelope.id,
            version,
            status,
            headers: response.headers(),
            limit: self.max_body_bytes,
        });

        if is_success(status) {
            Ok(response)
        } else {
            Err(AttemptError::Status(status))
        }
    }
}
