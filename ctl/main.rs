#![forbid(unsafe_code)]

//! `forgelink` — build client CLI.
//!
//! Routes a build through the persistent worker daemon, launching it on
//! demand, or manages a running daemon (`shutdown`, `status`).
//!
//! Exit code: the build's own exit code on success; 64–67 for launch,
//! busy, connect, and unexpected failures respectively.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use forgelink::client::{BuildRequest, ClientSession, ExitOutcome, SessionOptions};
use forgelink::config::GlobalConfig;
use forgelink::handshake::sibling_worker_exe;
use forgelink::rendezvous::Discovery;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "forgelink", about = "forge build client", version, long_about = None)]
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

    /// Override the worker executable to launch.
    #[arg(long)]
    worker_exe: Option<PathBuf>,

    /// Use the low-priority worker identity.
    #[arg(long)]
    low_priority: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run a build through the persistent worker.
    Build {
        /// Arguments passed to the build tool.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Ask an idle worker to exit.
    Shutdown,
    /// Print discovery information for the worker identity.
    Status,
}

fn main() {
    let args = Cli::parse();
    init_tracing(args.log_format);

    let code = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime.block_on(run(args)),
        Err(err) => {
            eprintln!("forgelink: failed to build tokio runtime: {err}");
            67
        }
    };
    std::process::exit(code);
}

async fn run(args: Cli) -> i32 {
    let mut config = match GlobalConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("forgelink: {err}");
            return 64;
        }
    };
    if let Some(dir) = args.rendezvous_dir {
        config.rendezvous_dir = dir;
    }
    if args.low_priority {
        config.low_priority = true;
    }

    let worker_exe = match args.worker_exe.or(config.worker_exe.take()) {
        Some(exe) => exe,
        None => {
            let file_name = format!("forgelinkd{}", env::consts::EXE_SUFFIX);
            match sibling_worker_exe(&file_name) {
                Ok(exe) => exe,
                Err(err) => {
                    eprintln!("forgelink: {err}");
                    return 64;
                }
            }
        }
    };
    // Canonicalize so PATH-relative and absolute invocations agree on the
    // rendezvous identity; a not-yet-existing path stays as given.
    let worker_exe = worker_exe.canonicalize().unwrap_or(worker_exe);
    debug!(worker_exe = %worker_exe.display(), "worker identity");

    let mut options = SessionOptions::new(worker_exe, config.rendezvous_dir.clone());
    options.low_priority = config.low_priority;
    options.cold_connect_budget = Duration::from_millis(config.cold_connect_ms);
    options.warm_connect_budget = Duration::from_millis(config.warm_connect_ms);
    let session = ClientSession::new(options);

    match args.command {
        CliCommand::Status => {
            let discovery =
                Discovery::new(config.rendezvous_dir, session.handshake().clone());
            println!("channel:        {}", session.handshake().channel_name());
            println!("server running: {}", discovery.is_server_running());
            println!("server busy:    {}", discovery.is_server_busy());
            0
        }
        CliCommand::Shutdown => {
            let outcome = session.shutdown_server(interrupt_token()).await;
            outcome_code(outcome, None)
        }
        CliCommand::Build { args } => {
            let working_dir = env::current_dir()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_else(|_| String::from("."));
            let request = BuildRequest {
                args,
                env: env::vars().collect::<BTreeMap<_, _>>(),
                working_dir,
                culture: env::var("LC_ALL")
                    .or_else(|_| env::var("LANG"))
                    .unwrap_or_default(),
                telemetry: None,
            };
            let outcome = session.execute(request, interrupt_token()).await;
            outcome_code(outcome.outcome, outcome.result.map(|result| result.exit_code))
        }
    }
}

/// A token that fires on ctrl-c, driving cooperative build cancellation.
fn interrupt_token() -> CancellationToken {
    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ct.cancel();
        }
    });
    ct
}

fn outcome_code(outcome: ExitOutcome, build_exit: Option<i32>) -> i32 {
    match outcome {
        ExitOutcome::Success => build_exit.unwrap_or(0),
        ExitOutcome::LaunchError => {
            eprintln!("forgelink: worker launch failed");
            64
        }
        ExitOutcome::ServerBusy => {
            eprintln!("forgelink: server busy; try again or build without the server");
            65
        }
        ExitOutcome::UnableToConnect => {
            eprintln!("forgelink: unable to connect to the worker");
            66
        }
        ExitOutcome::Unexpected => {
            eprintln!("forgelink: unexpected failure talking to the worker");
            67
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}
