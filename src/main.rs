use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatgate::clock::{Clock, SystemClock};
use chatgate::config::ChatGateConfig;
use chatgate::pipeline::RequestPipeline;
use chatgate::ratelimit::{InMemoryStore, RateLimitStore};
use chatgate::server::{spawn_sweeper, HttpServer};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Gated chat API server
#[derive(Parser, Debug)]
#[command(name = "chatgate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true);
    match args.log_format {
        LogFormat::Text => subscriber.with_target(false).init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Starting Chatgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ChatGateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }
    info!(
        http_addr = %config.server.http_addr,
        open_from = config.access_hours.start_hour,
        open_until = config.access_hours.end_hour,
        max_requests = config.rate_limiting.max_requests,
        window_secs = config.rate_limiting.window_secs,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store: Arc<dyn RateLimitStore> = Arc::new(InMemoryStore::new(clock.clone()));

    if config.server.sweep_interval_secs > 0 {
        spawn_sweeper(
            store.clone(),
            clock.clone(),
            Duration::from_secs(config.server.sweep_interval_secs),
        );
    }

    let pipeline = RequestPipeline::from_config(&config, store, clock)?;
    info!(gates = ?pipeline.gate_names(), "Request pipeline initialized");

    if config.server.trust_identity_headers {
        warn!("Trusting x-user identity headers; clients must not be able to set them");
    }
    let server = HttpServer::new(config.server.http_addr, Arc::new(pipeline))
        .trust_identity_headers(config.server.trust_identity_headers);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Chatgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
