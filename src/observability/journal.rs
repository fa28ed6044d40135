//! Diagnostic journal.
//!
//! Full request/response records, written in a human-readable multi-line
//! format to every configured sink. A [`Journal`] is not synchronized on its
//! own: it lives inside [`SessionState`](crate::session::SessionState), whose
//! lock makes each record atomic with respect to other requests.
//!
//! Write failures never reach callers. They are counted, exported as a metric
//! and reported through `tracing`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use axum::http::{HeaderMap, Method, StatusCode, Uri, Version};

use crate::config::JournalConfig;
use crate::observability::metrics;
use crate::session::CorrelationId;

/// A destination for rendered journal records.
pub trait JournalSink: Send {
    /// Short label used in diagnostics.
    fn name(&self) -> &str;

    /// Write one complete record.
    fn write_record(&mut self, record: &[u8]) -> io::Result<()>;
}

/// Writes records to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl JournalSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(record)?;
        stdout.flush()
    }
}

/// Appends records to a file, creating it if needed.
#[derive(Debug)]
pub struct FileSink {
    label: String,
    file: File,
}

impl FileSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            label: path.display().to_string(),
            file,
        })
    }
}

impl JournalSink for FileSink {
    fn name(&self) -> &str {
        &self.label
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.file.write_all(record)?;
        self.file.flush()
    }
}

/// Keeps records in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Everything written so far.
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl JournalSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(record);
        Ok(())
    }
}

/// Error opening a journal sink at startup.
#[derive(Debug, thiserror::Error)]
#[error("failed to open journal file {path}: {source}")]
pub struct JournalInitError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Fan-out writer over all sinks.
pub struct Journal {
    sinks: Vec<Box<dyn JournalSink>>,
    write_failures: u64,
}

impl Journal {
    pub fn new(sinks: Vec<Box<dyn JournalSink>>) -> Self {
        Self {
            sinks,
            write_failures: 0,
        }
    }

    /// Build the sinks named in configuration.
    pub fn from_config(config: &JournalConfig) -> Result<Self, JournalInitError> {
        let mut sinks: Vec<Box<dyn JournalSink>> = Vec::new();
        if config.console {
            sinks.push(Box::new(ConsoleSink));
        }
        if let Some(path) = &config.file {
            let sink = FileSink::open(path).map_err(|source| JournalInitError {
                path: path.clone(),
                source,
            })?;
            sinks.push(Box::new(sink));
        }
        Ok(Self::new(sinks))
    }

    /// Render `record` once and write it to every sink.
    pub fn emit(&mut self, record: &JournalRecord<'_>) {
        let rendered = record.to_string();
        for sink in &mut self.sinks {
            if let Err(e) = sink.write_record(rendered.as_bytes()) {
                self.write_failures += 1;
                metrics::record_journal_failure(sink.name());
                tracing::warn!(sink = sink.name(), error = %e, "Journal write failed");
            }
        }
    }

    /// Number of failed sink writes since creation.
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("Journal")
            .field("sinks", &names)
            .field("write_failures", &self.write_failures)
            .finish()
    }
}

/// One diagnostic record.
#[derive(Debug)]
pub enum JournalRecord<'a> {
    Startup {
        listen: &'a str,
        upstream: &'a str,
    },
    Admitted {
        total: u64,
    },
    Request {
        id: CorrelationId,
        method: &'a Method,
        url: &'a Uri,
        version: Version,
        headers: &'a HeaderMap,
        body: &'a [u8],
    },
    Response {
        id: CorrelationId,
        version: Version,
        status: StatusCode,
        headers: &'a HeaderMap,
        body: &'a [u8],
    },
    /// A response whose body was too large to capture; it is passed on as is.
    OversizedResponse {
        id: CorrelationId,
        version: Version,
        status: StatusCode,
        headers: &'a HeaderMap,
        limit: usize,
    },
    TransportError {
        id: CorrelationId,
        attempt: u32,
        error: &'a (dyn std::error::Error + Send + Sync),
    },
    Retry {
        id: CorrelationId,
        attempt: u32,
        max_attempts: u32,
    },
    Exhausted {
        id: CorrelationId,
        attempts: u32,
    },
}

fn write_headers(f: &mut fmt::Formatter<'_>, headers: &HeaderMap) -> fmt::Result {
    writeln!(f, "Headers:")?;
    for (name, value) in headers {
        writeln!(f, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
    }
    Ok(())
}

impl fmt::Display for JournalRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalRecord::Startup { listen, upstream } => {
                writeln!(f, "Starting proxy server on {}, forwarding to {}", listen, upstream)?;
            }
            JournalRecord::Admitted { total } => {
                writeln!(f, "Total requests: {}", total)?;
            }
            JournalRecord::Request {
                id,
                method,
                url,
                version,
                headers,
                body,
            } => {
                writeln!(f, "Request index: #{}:", id)?;
                writeln!(f, "Forwarding request upstream")?;
                writeln!(f, "Method: {}", method)?;
                writeln!(f, "URL: {}", url)?;
                writeln!(f, "HTTP version: {:?}", version)?;
                write_headers(f, headers)?;
                writeln!(f, "Body:\n{}", String::from_utf8_lossy(body))?;
            }
            JournalRecord::Response {
                id,
                version,
                status,
                headers,
                body,
            } => {
                writeln!(f, "Response index: #{}:", id)?;
                writeln!(f, "Received upstream response")?;
                writeln!(f, "HTTP version: {:?}", version)?;
                writeln!(f, "Status: {}", status)?;
                writeln!(f, "Status Code: {}", status.as_u16())?;
                write_headers(f, headers)?;
                writeln!(f, "Body:\n{}", String::from_utf8_lossy(body))?;
            }
            JournalRecord::OversizedResponse {
                id,
                version,
                status,
                headers,
                limit,
            } => {
                writeln!(f, "Response index: #{}:", id)?;
                writeln!(f, "Received upstream response")?;
                writeln!(f, "HTTP version: {:?}", version)?;
                writeln!(f, "Status: {}", status)?;
                writeln!(f, "Status Code: {}", status.as_u16())?;
                write_headers(f, headers)?;
                writeln!(f, "Body:\n<not captured, exceeds the {} byte limit>", limit)?;
            }
            JournalRecord::TransportError { id, attempt, error } => {
                writeln!(f, "Response index: #{}:", id)?;
                writeln!(f, "Upstream request failed on attempt {}: {}", attempt, error)?;
            }
            JournalRecord::Retry {
                id,
                attempt,
                max_attempts,
            } => {
                writeln!(f, "Response index: #{}:", id)?;
                writeln!(
                    f,
                    "Proxy request failed, attempting retry {} of {}",
                    attempt, max_attempts
                )?;
            }
            JournalRecord::Exhausted { id, attempts } => {
                writeln!(f, "Response index: #{}:", id)?;
                writeln!(
                    f,
                    "All {} retry attempts failed, program will exit",
                    attempts
                )?;
            }
        }
        // Blank line terminates every record.
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    struct BrokenSink;

    impl JournalSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        fn write_record(&mut self, _record: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn request_record_layout() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("127.0.0.1:8081"));
        headers.append("accept", HeaderValue::from_static("text/plain"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        let uri: Uri = "http://127.0.0.1:8081/v1/chat?x=1".parse().unwrap();

        let record = JournalRecord::Request {
            id: CorrelationId::from_raw(7),
            method: &Method::POST,
            url: &uri,
            version: Version::HTTP_11,
            headers: &headers,
            body: b"{\"x\":1}",
        };

        assert_eq!(
            record.to_string(),
            "Request index: #7:\n\
             Forwarding request upstream\n\
             Method: POST\n\
             URL: http://127.0.0.1:8081/v1/chat?x=1\n\
             HTTP version: HTTP/1.1\n\
             Headers:\n\
             host: 127.0.0.1:8081\n\
             accept: text/plain\n\
             accept: application/json\n\
             Body:\n\
             {\"x\":1}\n\
             \n"
        );
    }

    #[test]
    fn response_record_includes_status_line() {
        let headers = HeaderMap::new();
        let record = JournalRecord::Response {
            id: CorrelationId::from_raw(2),
            version: Version::HTTP_11,
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers: &headers,
            body: b"down",
        };
        let text = record.to_string();
        assert!(text.starts_with("Response index: #2:\n"));
        assert!(text.contains("Status: 503 Service Unavailable\n"));
        assert!(text.contains("Status Code: 503\n"));
        assert!(text.ends_with("Body:\ndown\n\n"));
    }

    #[test]
    fn oversized_response_omits_body() {
        let headers = HeaderMap::new();
        let record = JournalRecord::OversizedResponse {
            id: CorrelationId::from_raw(4),
            version: Version::HTTP_11,
            status: StatusCode::OK,
            headers: &headers,
            limit: 32,
        };
        let text = record.to_string();
        assert!(text.starts_with("Response index: #4:\nReceived upstream response\n"));
        assert!(text.contains("Status Code: 200\n"));
        assert!(text.ends_with("Body:\n<not captured, exceeds the 32 byte limit>\n\n"));
    }

    #[test]
    fn emit_fans_out_to_every_sink() {
        let first = MemorySink::default();
        let second = MemorySink::default();
        let mut journal = Journal::new(vec![Box::new(first.clone()), Box::new(second.clone())]);

        journal.emit(&JournalRecord::Admitted { total: 1 });

        assert_eq!(first.contents(), "Total requests: 1\n\n");
        assert_eq!(second.contents(), first.contents());
    }

    #[test]
    fn failing_sink_is_counted_not_raised() {
        let healthy = MemorySink::default();
        let mut journal = Journal::new(vec![Box::new(BrokenSink), Box::new(healthy.clone())]);

        journal.emit(&JournalRecord::Retry {
            id: CorrelationId::from_raw(1),
            attempt: 1,
            max_attempts: 3,
        });
        journal.emit(&JournalRecord::Admitted { total: 2 });

        assert_eq!(journal.write_failures(), 2);
        assert!(healthy
            .contents()
            .contains("Proxy request failed, attempting retry 1 of 3"));
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        std::fs::write(&path, "existing\n").unwrap();

        let config = JournalConfig {
            console: false,
            file: Some(path.clone()),
        };
        let mut journal = Journal::from_config(&config).unwrap();
        journal.emit(&JournalRecord::Admitted { total: 1 });
        drop(journal);

        let mut journal = Journal::from_config(&config).unwrap();
        journal.emit(&JournalRecord::Admitted { total: 2 });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "existing\nTotal requests: 1\n\nTotal requests: 2\n\n"
        );
    }

    #[test]
    fn unopenable_file_fails_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = JournalConfig {
            console: false,
            file: Some(dir.path().join("missing").join("main.log")),
        };
        assert!(Journal::from_config(&config).is_err());
    }
}
