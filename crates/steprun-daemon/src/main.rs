//! steprun-daemon - Serves debug, autocorrect and status requests
//!
//! Requests arrive as length-prefixed MessagePack frames on a Unix socket.
//! Each debug request compiles and runs one program in its own workspace;
//! at most `max_concurrent` run at once.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use steprun_core::Harness;
use steprun_core::assist::{Assistant, NoAssistant};
use tokio::net::UnixListener;
use tracing_subscriber::EnvFilter;

mod config;
mod llm;
mod pool;
mod server;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "steprun-daemon")]
#[command(author, version, about = "Execution daemon for steprun")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "STEPRUN_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("steprun=info".parse()?))
        .init();

    let args = Args::parse();
    tracing::info!("steprun-daemon starting");

    // Load config
    let config = DaemonConfig::load(args.config.as_deref())?;
    tracing::info!(
        max_concurrent = config.max_concurrent,
        socket = ?config.socket_path,
        workspace_root = ?config.harness.workspace_root,
        assistant = config.assistant.is_some(),
        "configuration loaded"
    );

    let assistant: Box<dyn Assistant> = match config.assistant.clone() {
        Some(assistant) => Box::new(
            llm::ChatAssistant::new(assistant).context("failed to build assistant client")?,
        ),
        None => Box::new(NoAssistant),
    };

    // Create socket directory if needed
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    // Remove a socket left behind by an earlier run
    let _ = std::fs::remove_file(&config.socket_path);

    // Bind socket
    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("failed to bind {}", config.socket_path.display()))?;
    tracing::info!(socket = ?config.socket_path, "listening");

    let harness = Harness::new(config.harness.clone());
    let state = server::State {
        pool: pool::ExecutionPool::new(harness, config.max_concurrent),
        assistant,
    };

    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    let signals_handle = signals.handle();
    let shutdown = async move {
        if let Some(signal) = signals.next().await {
            tracing::info!(signal, "received signal");
        }
    };

    // Run server
    let outcome = server::run(listener, state, shutdown).await;

    signals_handle.close();
    let _ = std::fs::remove_file(&config.socket_path);
    outcome.context("server failed")
}
