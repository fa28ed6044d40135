//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, correlation id, body capture)
//!     → forward.rs (admission, attempts, retries)
//!         → request.rs (outbound request per attempt)
//!         → rewrite.rs (JSON transforms, both directions)
//!         → response.rs (capture, Content-Length, client response)
//!     → Send to client
//! ```

pub mod body;
pub mod forward;
pub mod request;
pub mod response;
pub mod rewrite;
pub mod server;

pub use body::{BodyBuffer, CaptureError};
pub use forward::{AttemptError, Forwarder, SetupError};
pub use request::{RequestEnvelope, Upstream, UpstreamError};
pub use response::ResponseEnvelope;
pub use rewrite::{FieldTransform, PayloadRewriter, TransformAction};
pub use server::{HttpServer, ServerError};
