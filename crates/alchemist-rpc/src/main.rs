//! Alchemist RPC Server - JSON-RPC backend for Civitai image reproduction.
//!
//! Wraps the alchemist-core library behind a JSON-RPC 2.0 endpoint so a
//! front end can fetch metadata, resolve models, track downloads and build
//! workflows without linking the library.

use alchemist_core::{AlchemistApi, Settings};
use alchemist_rpc::{server, ProgressBoard};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "alchemist-rpc")]
#[command(about = "JSON-RPC server for Civitai Alchemist")]
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

    /// Civitai API key (overrides CIVITAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Models root in the ComfyUI layout (overrides MODELS_DIR)
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Where run documents are written (overrides ALCHEMIST_OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Alchemist RPC Server");

    let mut settings = Settings::from_env();
    if let Some(key) = args.api_key {
        settings.api_key = Some(key).filter(|k| !k.is_empty());
    }
    if let Some(dir) = args.models_dir {
        settings.models_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        settings.output_dir = dir;
    }

    info!("Models directory: {}", settings.models_dir.display());
    info!("Output directory: {}", settings.output_dir.display());
    if settings.api_key.is_none() {
        info!("No Civitai API key configured; calls must supply one");
    }

    let board = ProgressBoard::new();
    let api = AlchemistApi::builder()
        .api_key(settings.api_key.clone())
        .models_dir(&settings.models_dir)
        .output_dir(Some(settings.output_dir.clone()))
        .with_progress_sink(Arc::new(board.clone()))
        .build()?;

    let addr = server::start_server(api, board, &args.host, args.port).await?;

    // Read by the parent process to discover the port
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
