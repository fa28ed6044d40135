//! Response handling and transformation.
//!
//! # Responsibilities
//! - Capture one upstream response in full ([`ResponseEnvelope`]), or hand
//!   an oversized one back as a stream ([`ResponseCapture::Oversized`])
//! - Swap in a rewritten body with a matching `Content-Length`
//! - Turn the final envelope into the client response
//!
//! # Design Decisions
//! - Responses are buffered, not streamed: the journal and rewriter need
//!   the whole body
//! - Hop-by-hop headers stripped before returning to the client

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode, Version};
use hyper::body::Incoming;

use crate::http::body::{BodyBuffer, Capture, CaptureError};
use crate::http::request::strip_hop_by_hop;

/// One captured upstream response.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: BodyBuffer,
}

/// An upstream response, buffered or not.
#[derive(Debug)]
pub enum ResponseCapture {
    Buffered(ResponseEnvelope),
    /// Body larger than the capture limit. Headers are as received; the body
    /// streams through untouched.
    Oversized {
        version: Version,
        response: Response<Body>,
    },
}

impl ResponseCapture {
    pub fn status(&self) -> StatusCode {
        match self {
            ResponseCapture::Buffered(envelope) => envelope.status,
            ResponseCapture::Oversized { response, .. } => response.status(),
        }
    }
}

impl ResponseEnvelope {
    /// Drain an upstream response into memory if it fits in `limit` bytes.
    pub async fn capture(
        response: Response<Incoming>,
        limit: usize,
    ) -> Result<ResponseCapture, CaptureError> {
        let (parts, body) = response.into_parts();
        match BodyBuffer::capture_within(Body::new(body), limit).await? {
            Capture::Complete(body) => Ok(ResponseCapture::Buffered(Self {
                status: parts.status,
                version: parts.version,
                headers: parts.headers,
                body,
            })),
            Capture::Overflow(body) => {
                let mut headers = parts.headers;
                strip_hop_by_hop(&mut headers);

                let mut response = Response::new(body);
                *response.status_mut() = parts.status;
                *response.headers_mut() = headers;
                Ok(ResponseCapture::Oversized {
                    version: parts.version,
                    response,
                })
            }
        }
    }

    /// Replace the body and set `Content-Length` to its exact length.
    pub fn replace_body(&mut self, body: BodyBuffer) {
        self.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        self.body = body;
    }

    /// Build the response sent back to the client.
    pub fn into_response(self) -> Response<Body> {
        let mut headers = self.headers;
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(self.body.to_body());
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}
