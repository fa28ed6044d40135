//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → admission.rs (wait for a slot, held until the final outcome)
//!     → attempt; on non-2xx or transport error: retries.rs (fixed wait, retry)
//!     → on exhaustion: FatalError to the supervisor
//! ```
//!
//! # Design Decisions
//! - Backpressure over rejection: new requests wait while retries hold slots
//! - Fixed retry interval, no jitter
//! - No in-process recovery from a persistently failing upstream

pub mod admission;
pub mod retries;

pub use admission::{AdmissionError, AdmissionGate, AdmissionPermit};
pub use retries::{is_success, RetryPolicy};
