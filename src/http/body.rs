//! Body capture.
//!
//! A message body is drained into memory exactly once and kept as a
//! [`BodyBuffer`]. The buffer is cheap to clone and hands out a fresh reader
//! or HTTP body on every call, so the journal, the rewriter and each retry
//! attempt all see the same bytes.

use std::io::Cursor;

use axum::body::{Body, Bytes};
use futures_util::{stream, StreamExt};
use thiserror::Error;

/// Failure while draining a body stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to read body: {0}")]
    Read(#[from] axum::Error),

    #[error("body exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
}

/// Outcome of [`BodyBuffer::capture_within`].
#[derive(Debug)]
pub enum Capture {
    Complete(BodyBuffer),
    /// The body ran past the limit. Holds the whole body, already-read
    /// prefix included, as a stream that can be sent on exactly once.
    Overflow(Body),
}

/// An owned, re-readable message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyBuffer {
    bytes: Bytes,
}

impl BodyBuffer {
    /// Drain `body` into memory, failing if it errors or exceeds `limit` bytes.
    pub async fn capture(body: Body, limit: usize) -> Result<Self, CaptureError> {
        match Self::capture_within(body, limit).await? {
            Capture::Complete(buffer) => Ok(buffer),
            Capture::Overflow(_) => Err(CaptureError::TooLarge { limit }),
        }
    }

    /// Drain `body` into memory unless it exceeds `limit` bytes, in which case
    /// the body is handed back unconsumed instead of failing.
    pub async fn capture_within(body: Body, limit: usize) -> Result<Capture, CaptureError> {
        let mut data = body.into_data_stream();
        let mut buffered = Vec::new();

        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            if buffered.len() + chunk.len() > limit {
                let head = stream::iter([Ok(Bytes::from(buffered)), Ok(chunk)]);
                return Ok(Capture::Overflow(Body::from_stream(head.chain(data))));
            }
            buffered.extend_from_slice(&chunk);
        }

        Ok(Capture::Complete(Self::from(buffered)))
    }

    /// A fresh cursor positioned at the start of the body.
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.bytes.clone())
    }

    /// A fresh HTTP body carrying these bytes.
    pub fn to_body(&self) -> Body {
        Body::from(self.bytes.clone())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for BodyBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Bytes::from(bytes),
        }
    }
}

impl From<Bytes> for BodyBuffer {
    fn from(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl From<&'static str> for BodyBuffer {
    fn from(text: &'static str) -> Self {
        Self {
            bytes: Bytes::from_static(text.as_bytes()),
        }
    }
}
