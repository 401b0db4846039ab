//! scanpad receiver entrypoint.
//!
//! Serves the validation pages for web sessions and turns `/scan` callbacks
//! into signals the display loop polls for.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use scanpad_core::{load_metadata, FsSignalChannel, QrImager, StorageConfig};

mod http;
mod pages;
mod service;

use service::ReceiverService;

const MAX_PRUNE_INTERVAL_SECS: u64 = 60;
const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(name = "scanpad-receiver")]
#[command(about = "Receives scan callbacks and validates web sessions")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Base URL embedded in web session codes (defaults to the request Host)
    #[arg(long)]
    public_url: Option<String>,

    /// Directory shared with the display loop
    #[arg(long)]
    signal_dir: Option<PathBuf>,

    /// Accept `session_id=*` scans
    #[arg(long)]
    allow_wildcard: bool,

    /// Forget web sessions after this many seconds
    #[arg(long, default_value_t = 3600)]
    session_ttl_secs: u64,

    /// Metadata document for web sessions (path or file:// URI)
    #[arg(long)]
    metadata: Option<String>,
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    if let Err(err) = run(args).await {
        error!(error = %err, "Receiver stopped with an error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let signal_dir = args
        .signal_dir
        .unwrap_or_else(|| StorageConfig::default().signals_dir());
    let signals = FsSignalChannel::open(&signal_dir)?;
    let metadata = load_metadata(args.metadata.as_deref()).metadata;

    let service = Arc::new(
        ReceiverService::new(Arc::new(signals), Arc::new(QrImager::default()), metadata)
            .with_public_url(args.public_url)
            .with_wildcard(args.allow_wildcard),
    );

    spawn_pruner(service.clone(), args.session_ttl_secs);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .map_err(|err| format!("Failed to bind {}: {}", args.bind, err))?;
    let local = listener
        .local_addr()
        .map_err(|err| format!("Failed to read bound address: {}", err))?;
    info!(
        addr = %local,
        signal_dir = %signal_dir.display(),
        allow_wildcard = args.allow_wildcard,
        "scanpad receiver started"
    );

    axum::serve(listener, http::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| format!("Server error: {}", err))?;

    info!("scanpad receiver stopped");
    Ok(())
}

fn spawn_pruner(service: Arc<ReceiverService>, ttl_secs: u64) {
    let ttl = chrono::Duration::seconds(ttl_secs.min(MAX_SESSION_TTL_SECS) as i64);
    let every = Duration::from_secs((ttl_secs / 4).clamp(1, MAX_PRUNE_INTERVAL_SECS));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            service.prune(ttl);
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

fn init_logging() {
    let debug_enabled = env::var("SCANPAD_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
