//! Grotto RPC Server - JSON-RPC backend for the desktop shell.
//!
//! This binary provides a JSON-RPC 2.0 server that wraps the grotto-core
//! session engine, plus a server-sent-events stream per session.

mod handlers;
mod server;
mod wrapper;

use anyhow::Result;
use clap::Parser;
use grotto_core::{EngineConfig, GrottoApi};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "grotto-rpc")]
#[command(about = "JSON-RPC server for the Grotto session engine")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Data directory for workspaces (defaults to the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory scanned for .proto files (repeatable)
    #[arg(long = "proto-root")]
    proto_roots: Vec<PathBuf>,

    /// Seconds allowed for establishing a channel
    #[arg(long, default_value = "10")]
    connect_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Grotto RPC Server");

    let data_dir = match args.data_dir {
        Some(path) => path,
        None => EngineConfig::default_data_dir()
            .ok_or_else(|| anyhow::anyhow!("no platform data directory; pass --data-dir"))?,
    };
    info!("Data directory: {}", data_dir.display());

    let api = GrottoApi::builder(&data_dir)
        .auto_create_dirs(true)
        .with_search_roots(args.proto_roots)
        .with_connect_timeout(Duration::from_secs(args.connect_timeout_secs))
        .build()
        .await?;
    let api = Arc::new(api);

    let (addr, shutdown) = server::start_server(Arc::clone(&api), &args.host, args.port).await?;

    // Print port for the shell to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, exiting");
        }
        _ = shutdown.notified() => {
            info!("Shutdown requested over RPC, exiting");
        }
    }
    api.shutdown().await;

    Ok(())
}
