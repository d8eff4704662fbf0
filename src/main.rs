#![forbid(unsafe_code)]

//! `forgelinkd` — persistent build worker daemon.
//!
//! Bootstraps configuration and tracing, derives the rendezvous identity
//! for this executable, then runs the worker server and the resolution
//! dispatch loop until a shutdown notice or an interrupt arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use forgelink::config::GlobalConfig;
use forgelink::handshake::{Handshake, HandshakeOptions};
use forgelink::worker::{
    dispatcher, CommandEngine, DirectoryResolver, NodeRegistry, NodeSender, ReferenceResolver,
    WorkerServer,
};
use forgelink::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "forgelinkd", about = "forge build worker daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the rendezvous marker directory.
    #[arg(long)]
    rendezvous_dir: Option<PathBuf>,

    /// Serve the low-priority worker identity.
    #[arg(long)]
    low_priority: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format);
    info!("forgelinkd bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.rendezvous_dir {
        config.rendezvous_dir = dir;
    }
    if args.low_priority {
        config.low_priority = true;
    }

    let worker_exe = std::env::current_exe()
        .map_err(|err| AppError::Config(format!("cannot locate worker exe: {err}")))?;
    let handshake = Handshake::compute(&HandshakeOptions::for_worker_exe(
        worker_exe,
        config.low_priority,
    ));

    let nodes = Arc::new(NodeRegistry::new());
    let sender: Arc<dyn NodeSender> = nodes.clone();
    let resolver: Arc<dyn ReferenceResolver> =
        Arc::new(DirectoryResolver::new(config.references_root.clone()));
    let (dispatch, dispatch_loop) = dispatcher(resolver, sender);
    let engine = Arc::new(CommandEngine::new(config.tool_path.clone()));

    let server = WorkerServer::new(
        handshake,
        config.rendezvous_dir.clone(),
        engine,
        dispatch,
        nodes,
    );

    let ct = CancellationToken::new();
    let dispatch_task = tokio::spawn(dispatch_loop.run(ct.clone()));

    let signal_ct = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            signal_ct.cancel();
        }
    });

    let result = server.run(ct.clone()).await;
    ct.cancel();
    let _ = dispatch_task.await;
    info!("forgelinkd stopped");
    result
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}
