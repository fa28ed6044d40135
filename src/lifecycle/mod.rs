//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Open journal → Bind listener → Serve
//!
//! Shutdown (shutdown.rs):
//!     Ctrl-C or trigger → Stop accepting → Drain connections → Exit 0
//!
//! Fatal (supervisor.rs):
//!     Handler reports FatalError → run loop stops at once → Exit 1
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Retry exhaustion is crash-only; no in-process recovery
//! - Termination policy lives in one place, not in request handlers

pub mod shutdown;
pub mod supervisor;

pub use shutdown::{shutdown_signal, Shutdown};
pub use supervisor::{FatalError, FatalReporter, Supervisor};
