//! Shared counters and the journal, behind a single lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::observability::journal::{Journal, JournalRecord};
use crate::observability::metrics;

/// Correlation id tying together every journal record of one inbound request.
///
/// Issued from a strictly increasing per-process counter, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Inner {
    total_requests: u64,
    key_index: usize,
    journal: Journal,
}

/// State shared by every request handler.
#[derive(Debug)]
pub struct SessionState {
    inner: Mutex<Inner>,
    api_keys: Vec<String>,
}

impl SessionState {
    pub fn new(journal: Journal, api_keys: Vec<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                total_requests: 0,
                key_index: 0,
                journal,
            }),
            api_keys,
        }
    }

    // Journal writes are best-effort; a panic mid-write must not wedge the proxy.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a new inbound request and return its correlation id.
    ///
    /// The "Total requests" record is written under the same lock as the
    /// increment.
    pub fn begin_request(&self) -> CorrelationId {
        let total = off_worker(|| {
            let mut inner = self.lock();
            inner.total_requests += 1;
            let total = inner.total_requests;
            inner.journal.emit(&JournalRecord::Admitted { total });
            total
        });

        metrics::record_request();
        CorrelationId(total)
    }

    /// Return the key at the current rotation index and advance the index.
    ///
    /// With an empty key list this is a no-op returning `None`.
    pub fn rotate_api_key(&self) -> Option<&str> {
        if self.api_keys.is_empty() {
            return None;
        }
        let mut inner = self.lock();
        let current = inner.key_index;
        inner.key_index = (current + 1) % self.api_keys.len();
        Some(self.api_keys[current].as_str())
    }

    /// The key at the current rotation index, without advancing.
    pub fn current_api_key(&self) -> Option<&str> {
        if self.api_keys.is_empty() {
            return None;
        }
        let index = self.lock().key_index;
        Some(self.api_keys[index].as_str())
    }

    /// Write a record to every journal sink.
    pub fn emit(&self, record: &JournalRecord<'_>) {
        off_worker(|| self.lock().journal.emit(record));
    }

    pub fn total_requests(&self) -> u64 {
        self.lock().total_requests
    }

    pub fn key_index(&self) -> usize {
        self.lock().key_index
    }

    pub fn journal_write_failures(&self) -> u64 {
        self.lock().journal.write_failures()
    }
}

/// Run blocking journal I/O without starving the async worker it is called on.
///
/// Sink writes happen under the session lock and may be large. On a
/// multi-thread runtime the worker hands its other tasks to another thread
/// first; elsewhere the closure just runs.
fn off_worker<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::journal::MemorySink;
    use std::sync::Arc;

    fn session_with_sink(keys: &[&str]) -> (SessionState, MemorySink) {
        let sink = MemorySink::default();
        let journal = Journal::new(vec![Box::new(sink.clone())]);
        let keys = keys.iter().map(|k| k.to_string()).collect();
        (SessionState::new(journal, keys), sink)
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let (session, sink) = session_with_sink(&[]);
        let a = session.begin_request();
        let b = session.begin_request();
        assert_eq!(a.as_u64(), 1);
        assert!(b > a);
        assert_eq!(session.total_requests(), 2);
        assert_eq!(sink.contents(), "Total requests: 1\n\nTotal requests: 2\n\n");
    }

    #[test]
    fn concurrent_ids_are_unique_and_journal_is_ordered() {
        let (session, sink) = session_with_sink(&[]);
        let session = Arc::new(session);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || {
                    (0..50).map(|_| session.begin_request().as_u64()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=400).collect::<Vec<_>>());

        // Journal lines appear in counter order because both happen under one lock.
        let totals: Vec<u64> = sink
            .contents()
            .lines()
            .filter_map(|l| l.strip_prefix("Total requests: "))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(totals, (1..=400).collect::<Vec<_>>());
    }

    #[test]
    fn key_rotation_is_cyclic() {
        let (session, _) = session_with_sink(&["a", "b", "c"]);
        let seen: Vec<_> = (0..7)
            .map(|_| session.rotate_api_key().unwrap().to_string())
            .collect();
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c", "a"]);
        assert_eq!(session.key_index(), 1);
        assert_eq!(session.current_api_key(), Some("b"));
        assert_eq!(session.key_index(), 1);
    }

    /// A sink that takes a long time per write.
    struct SlowSink(std::time::Duration);

    impl crate::observability::JournalSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        fn write_record(&mut self, _record: &[u8]) -> std::io::Result<()> {
            std::thread::sleep(self.0);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn slow_journal_does_not_stall_other_tasks() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::Duration;

        let journal = Journal::new(vec![Box::new(SlowSink(Duration::from_millis(300)))]);
        let session = Arc::new(SessionState::new(journal, Vec::new()));

        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Emit from a task on the single worker, alongside the ticker.
        let during = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                let before = ticks.load(Ordering::SeqCst);
                session.begin_request();
                ticks.load(Ordering::SeqCst) - before
            }
        })
        .await
        .unwrap();

        ticker.abort();
        assert!(during >= 5, "ticker advanced {during} times during a 300ms write");
    }

    #[test]
    fn empty_key_list_never_advances() {
        let (session, _) = session_with_sink(&[]);
        assert_eq!(session.rotate_api_key(), None);
        assert_eq!(session.rotate_api_key(), None);
        assert_eq!(session.key_index(), 0);
    }
}
