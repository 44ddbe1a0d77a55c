//! flex-proxy: a content-modifying reverse proxy.
//!
//! ```text
//!     Client ──▶ listener ──▶ http server ──▶ orchestrator ──▶ forwarder ──▶ Downstream
//!                                               │    ▲
//!                                  parse/modify │    │ serialize
//!                                               ▼    │
//!                                        content + modifier scripts
//! ```
//!
//! Configuration comes from a TOML file (optional) with command-line
//! overrides for the host mapping and bind address.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use flex_proxy::config::{read_config, validate_config, ConfigError, ProxyConfig};
use flex_proxy::lifecycle::{shutdown_signal, Shutdown};
use flex_proxy::observability::{logging, metrics};
use flex_proxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "flex-proxy", version, about = "Content-modifying reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host (and optional port) clients address the proxy as.
    #[arg(long)]
    serving_host: Option<String>,

    #[arg(long)]
    serving_scheme: Option<String>,

    /// Origin host (and optional port) requests are forwarded to.
    #[arg(long)]
    downstream_host: Option<String>,

    #[arg(long)]
    downstream_scheme: Option<String>,

    /// Listen address, e.g. 0.0.0.0:8080.
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level when RUST_LOG is not set.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ProxyConfig) {
        let mapping = &mut config.host_mapping;
        if let Some(host) = self.serving_host {
            mapping.serving_host = host;
        }
        if let Some(scheme) = self.serving_scheme {
            mapping.serving_scheme = scheme;
        }
        if let Some(host) = self.downstream_host {
            mapping.downstream_host = host;
        }
        if let Some(scheme) = self.downstream_scheme {
            mapping.downstream_scheme = scheme;
        }
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut cli = Cli::parse();

    let mut config = match cli.config.take() {
        Some(path) => read_config(&path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_logging(&config.observability.log_level);
    tracing::info!("flex-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            tracing::error!(field = %error.field, message = %error.message, "Invalid configuration");
        }
        return Err(ConfigError::Validation(errors).into());
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        serving_host = %config.host_mapping.serving_host,
        downstream_host = %config.host_mapping.downstream_host,
        modifiers = config.modifiers.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config)?;

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
