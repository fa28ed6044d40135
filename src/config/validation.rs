//! Configuration validation.
//!
//! Semantic checks only; serde handles syntax. Every problem is collected so
//! a broken file is reported in one pass.

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::http::rewrite::PayloadRewriter;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.socket_addr().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }

    match Url::parse(&config.upstream.url) {
        Ok(url) => {
            if url.scheme() != "http" {
                errors.push(ValidationError::new(
                    "upstream.url",
                    format!("unsupported scheme '{}', only http is supported", url.scheme()),
                ));
            }
            if url.host_str().is_none() {
                errors.push(ValidationError::new("upstream.url", "missing host"));
            }
        }
        Err(e) => errors.push(ValidationError::new("upstream.url", e.to_string())),
    }

    if config.admission.capacity == 0 {
        errors.push(ValidationError::new("admission.capacity", "must be at least 1"));
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }

    if !config.journal.console && config.journal.file.is_none() {
        errors.push(ValidationError::new("journal", "at least one sink must be enabled"));
    }

    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::new("limits.max_body_bytes", "must be positive"));
    }

    for (field, transforms) in [
        ("rewrite.outbound", &config.rewrite.outbound),
        ("rewrite.inbound", &config.rewrite.inbound),
    ] {
        if let Err(e) = PayloadRewriter::new(transforms) {
            errors.push(ValidationError::new(field, e.to_string()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::rewrite::FieldTransform;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "localhost".into();
        config.upstream.url = "https://api.example.com".into();
        config.journal.console = false;
        config.journal.file = None;
        config
            .rewrite
            .inbound
            .push(FieldTransform::observe("choices[.x", serde_json::Value::Null));

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["listener.bind_address", "upstream.url", "journal", "rewrite.inbound"]
        );
    }

    #[test]
    fn accepts_bare_port_listen_address() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = ":8082".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_unparseable_upstream() {
        let mut config = ProxyConfig::default();
        config.upstream.url = "not a url".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "upstream.url");
    }
}
