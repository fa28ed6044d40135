//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::http::rewrite::FieldTransform;

/// Root configuration for the intercepting proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The single upstream every request is forwarded to.
    pub upstream: UpstreamConfig,

    /// Concurrency bound on forwarding.
    pub admission: AdmissionConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Diagnostic journal sinks.
    pub journal: JournalConfig,

    /// API key rotation.
    pub api_keys: ApiKeyConfig,

    /// JSON payload transforms.
    pub rewrite: RewriteConfig,

    /// Body size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8082", or ":8082" for all interfaces).
    pub bind_address: String,
}

impl ListenerConfig {
    /// The address to bind. A bare `:port` means every IPv4 interface.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        match self.bind_address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port).parse(),
            None => self.bind_address.parse(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8082".to_string(),
        }
    }
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the upstream service. Path and query are joined with the
    /// inbound request's.
    pub url: String,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8081".to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum requests forwarding concurrently (including their retries).
    pub capacity: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { capacity: 3 }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total forwarding attempts per request before the process gives up.
    pub max_attempts: u32,

    /// Fixed delay after each failed attempt, in milliseconds.
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval_ms: 60_000,
        }
    }
}

/// Diagnostic journal configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Write records to stdout.
    pub console: bool,

    /// Append records to this file. `None` disables the file sink.
    pub file: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            console: true,
            file: Some(PathBuf::from("main.log")),
        }
    }
}

/// API key rotation configuration.
///
/// Rotation and application are independent: the index may advance on every
/// attempt without the key ever being attached to the outbound request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    /// Keys rotated through, in order.
    pub keys: Vec<String>,

    /// Advance the rotation index once per forwarding attempt.
    pub rotate: bool,

    /// Attach the current key as the `Authorization` header.
    pub apply: bool,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            rotate: true,
            apply: false,
        }
    }
}

/// Payload rewriting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Transforms applied to request bodies before forwarding.
    pub outbound: Vec<FieldTransform>,

    /// Transforms applied to upstream response bodies.
    pub inbound: Vec<FieldTransform>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            outbound: vec![FieldTransform::observe("stream", serde_json::Value::Bool(true))],
            inbound: vec![FieldTransform::observe(
                "choices[].finish_reason",
                serde_json::Value::String("stop".to_string()),
            )],
        }
    }
}

/// Body size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request or response body captured into memory, in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
