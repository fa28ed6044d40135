//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request pipeline produces:
//!     → journal.rs (full request/response records, console + file)
//!     → logging.rs (operational tracing events, stderr)
//!     → metrics.rs (counters, gauges, histograms)
//! ```
//!
//! # Design Decisions
//! - The journal is the audit trail; tracing is for operators
//! - Journal writes are serialized by the session lock, never by the journal
//! - Metrics are cheap and no-ops unless the exporter is enabled

pub mod journal;
pub mod logging;
pub mod metrics;

pub use journal::{Journal, JournalRecord, JournalSink, MemorySink};
