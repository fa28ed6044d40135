//! Admission control.
//!
//! A counting gate bounding how many requests forward concurrently. A permit
//! is taken once per inbound request and held across all of its retry
//! attempts, including the waits between them, so a stalled upstream pushes
//! back on new arrivals.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::observability::metrics;

/// The gate was closed and will never admit again.
#[derive(Debug, Error)]
#[error("admission gate closed")]
pub struct AdmissionError;

/// Fixed-capacity gate. Waiters are admitted in FIFO order.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot and reserve it.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError)?;

        metrics::set_admission_in_flight(self.in_flight());
        Ok(AdmissionPermit {
            _permit: permit,
            gate: self.clone(),
        })
    }

    /// Stop admitting. Current waiters and later callers get [`AdmissionError`];
    /// permits already held stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

/// A reserved slot, released when dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    gate: AdmissionGate,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // The semaphore permit is dropped after this body runs.
        metrics::set_admission_in_flight(self.gate.in_flight().saturating_sub(1));
    }
}
