//! Crash-only failure handling.
//!
//! Request handlers never terminate the process themselves. They report a
//! [`FatalError`] through a [`FatalReporter`]; the server's run loop owns the
//! [`Supervisor`], stops serving when a report arrives and hands the error to
//! `main`, which exits non-zero and leaves the restart to an external process
//! manager.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::CorrelationId;

/// A failure that ends the whole process, not just one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("request #{id} failed after {attempts} upstream attempts")]
    RetriesExhausted { id: CorrelationId, attempts: u32 },
}

/// Cloneable handle for reporting fatal errors from request tasks.
#[derive(Debug, Clone)]
pub struct FatalReporter {
    tx: mpsc::UnboundedSender<FatalError>,
}

impl FatalReporter {
    pub fn report(&self, error: FatalError) {
        tracing::error!(error = %error, "Fatal error reported");
        if self.tx.send(error).is_err() {
            tracing::error!("Supervisor is gone, fatal error dropped");
        }
    }
}

/// Receives fatal reports.
#[derive(Debug)]
pub struct Supervisor {
    tx: mpsc::UnboundedSender<FatalError>,
    rx: mpsc::UnboundedReceiver<FatalError>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn reporter(&self) -> FatalReporter {
        FatalReporter {
            tx: self.tx.clone(),
        }
    }

    /// Wait for the first fatal report.
    pub async fn wait(&mut self) -> FatalError {
        match self.rx.recv().await {
            Some(error) => error,
            // Unreachable while `self.tx` is alive; park rather than invent an error.
            None => std::future::pending().await,
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
