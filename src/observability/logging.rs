//! Operational logging.
//!
//! `tracing` events go to stderr so stdout stays reserved for the journal.
//! `RUST_LOG` overrides the configured level.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the default filter directive for `level`.
pub fn default_filter(level: &str) -> String {
    let level = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    format!("intercept_proxy={level},tower_http={level},hyper=warn")
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(
            default_filter("DEBUG"),
            "intercept_proxy=debug,tower_http=debug,hyper=warn"
        );
        assert_eq!(
            default_filter("verbose"),
            "intercept_proxy=info,tower_http=info,hyper=warn"
        );
    }
}
