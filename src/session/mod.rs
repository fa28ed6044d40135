//! Process-wide session state.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → state.rs begin_request (counter + "Total requests" record)
//!     → forwarding attempts: rotate_api_key, emit(request/response/retry)
//! ```
//!
//! # Design Decisions
//! - One mutex guards the counter, the key index and the journal sinks, so a
//!   counter value and the records that mention it are never reordered
//! - The lock is never held across an await point

pub mod state;

pub use state::{CorrelationId, SessionState};
