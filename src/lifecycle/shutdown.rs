//! Graceful shutdown coordination.

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel the server subscribes to; tests use it to stop
/// a running server without a signal.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves on Ctrl-C or when the coordinator triggers (or is dropped).
pub async fn shutdown_signal(mut trigger: broadcast::Receiver<()>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => {
                    // Without a signal handler only the trigger can stop us.
                    tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
                    let _ = trigger.recv().await;
                }
            }
        }
        _ = trigger.recv() => tracing::info!("Shutdown triggered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_resolves_signal() {
        let shutdown = Shutdown::new();
        let signal = tokio::spawn(shutdown_signal(shutdown.subscribe()));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn dropping_coordinator_resolves_signal() {
        let shutdown = Shutdown::new();
        let signal = tokio::spawn(shutdown_signal(shutdown.subscribe()));

        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .unwrap()
            .unwrap();
    }
}
