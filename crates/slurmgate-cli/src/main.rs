//! slurmgate: client for the interactive session gateway.
//!
//! Starts Slurm allocations, lists and closes them, attaches a local
//! terminal to them, and opens login shells on the frontend.

mod client;
mod commands;
mod config;
mod terminal;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use slurmgate_core::AllocRequest;
use tracing::error;

/// slurmgate: interactive Slurm sessions over WebSocket
#[derive(Parser)]
#[command(name = "slurmgate", version, about = "Interactive Slurm sessions over WebSocket")]
struct Cli {
    /// Gateway base URL (overrides the config file)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Bearer token
    #[arg(long, global = true, env = "SLURMGATE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Config file path [default: ~/.slurmgate/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive allocation and print its session ID
    Alloc {
        #[command(flatten)]
        request: AllocArgs,

        /// Attach to the new session right away
        #[arg(short, long)]
        attach: bool,
    },

    /// Attach to an allocation's terminal (Ctrl+] detaches)
    Attach {
        /// Session ID
        session: String,
    },

    /// Open a login shell on the frontend
    Shell,

    /// List your sessions
    Sessions,

    /// Close an allocation
    Close {
        /// Session ID
        session: String,
    },
}

#[derive(Args)]
struct AllocArgs {
    /// Job name
    #[arg(long = "task-name", short = 'J')]
    task_name: Option<String>,

    /// Partition to allocate from
    #[arg(long, short = 'p')]
    partition: Option<String>,

    /// Number of GPUs
    #[arg(long)]
    gpus: Option<u32>,

    /// CPUs per task
    #[arg(long)]
    cpus: Option<u32>,
}

impl From<AllocArgs> for AllocRequest {
    fn from(args: AllocArgs) -> Self {
        AllocRequest {
            task_name: args.task_name,
            partition: args.partition,
            gpu_count: args.gpus,
            cpu_count: args.cpus,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "slurmgate=debug,slurmgate_core=debug"
    } else {
        "slurmgate=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("slurmgate: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => dirs::home_dir()
            .unwrap_or_default()
            .join(".slurmgate")
            .join("config.toml"),
    };
    let cfg = config::Config::load(&config_path)?;
    let endpoint = config::Endpoint::resolve(&cfg, cli.server, cli.token)?;

    match cli.command {
        Command::Alloc { request, attach } => {
            commands::alloc::run(&endpoint, request.into(), attach).await
        }
        Command::Attach { session } => commands::sessions::attach(&endpoint, &session).await,
        Command::Shell => commands::shell::run(&endpoint).await,
        Command::Sessions => commands::sessions::list(&endpoint).await,
        Command::Close { session } => commands::sessions::close(&endpoint, &session).await,
    }
}
