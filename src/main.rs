//! Intercepting reverse proxy.
//!
//! Forwards every request to a single upstream, rewriting JSON bodies in
//! both directions and journaling each exchange in full.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ http::forward ──▶ Upstream
//!                  │ session       │ admission gate
//!                  │ (id counter)  │ retry policy
//!                  │               │ rewrite (both directions)
//!                  ▼               ▼
//!             observability::journal (stdout + main.log)
//!
//!     lifecycle: Shutdown (Ctrl-C → exit 0), Supervisor (exhaustion → exit 1)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use intercept_proxy::config::{load_config, validate_config, ProxyConfig};
use intercept_proxy::http::{HttpServer, ServerError};
use intercept_proxy::lifecycle::Shutdown;
use intercept_proxy::observability::{logging, metrics, Journal};

#[derive(Debug, Parser)]
#[command(name = "intercept-proxy", version)]
#[command(about = "Intercepting reverse proxy with JSON rewriting and a request journal")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Listen address (`host:port` or `:port`), overrides listener.bind_address
    #[arg(long)]
    listen: Option<String>,

    /// Upstream base URL, overrides upstream.url
    #[arg(long)]
    target: Option<String>,

    /// More operational logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn log_level<'a>(&self, configured: &'a str) -> &'a str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => configured,
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => ProxyConfig::default(),
    };
    if let Some(listen) = &args.listen {
        config.listener.bind_address = listen.clone();
    }
    if let Some(target) = &args.target {
        config.upstream.url = target.clone();
    }

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("Invalid configuration: {}", error);
        }
        return ExitCode::FAILURE;
    }

    logging::init_tracing(args.log_level(&config.observability.log_level));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "intercept-proxy starting");

    let journal = match Journal::from_config(&config.journal) {
        Ok(journal) => journal,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open journal");
            return ExitCode::FAILURE;
        }
    };

    let bind_address = match config.listener.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(
                bind_address = %config.listener.bind_address,
                error = %e,
                "Invalid listen address"
            );
            return ExitCode::FAILURE;
        }
    };
    let listener = match TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(
                bind_address = %bind_address,
                error = %e,
                "Failed to bind listener"
            );
            return ExitCode::FAILURE;
        }
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = match HttpServer::new(config, journal) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build forwarding engine");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    match server.run(listener, shutdown.subscribe()).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(ServerError::Fatal(fatal)) => {
            tracing::error!(error = %fatal, "Exiting after fatal error");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
