//! slurmgate-server: interactive session gateway for a Slurm frontend.
//!
//! Launches login shells and `salloc` allocations under the requesting
//! user's account on a pseudo-terminal, and relays them over WebSocket.

mod auth;
mod config;
mod identity;
mod server;
mod session;
mod transport;

use clap::{Parser, Subcommand};
use config::{Overrides, ServerConfig};
use identity::SystemResolver;
use server::AppState;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// slurmgate-server: interactive session gateway
#[derive(Parser, Debug)]
#[command(name = "slurmgate-server", version, about = "Interactive session gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Listen address
    #[arg(long, global = true)]
    bind: Option<IpAddr>,

    /// Listen port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Seconds an exited session stays listed before eviction
    #[arg(long, global = true)]
    grace_period: Option<u64>,

    /// Config file path
    #[arg(long, global = true, default_value = "~/.slurmgate/server.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// Print a bearer token for a user, signed with the configured secret
    IssueToken {
        /// Username the token is issued to
        username: String,
        /// Lifetime in seconds (defaults to auth.token_ttl)
        #[arg(long)]
        ttl: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let overrides = Overrides {
        bind: cli.bind,
        port: cli.port,
        grace_period: cli.grace_period,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(server_config).await,
        Command::IssueToken { username, ttl } => issue_token(&server_config, &username, ttl),
    }
}

fn issue_token(config: &ServerConfig, username: &str, ttl: Option<u64>) {
    let Some(secret) = &config.token_secret else {
        error!("auth.token_secret is not configured; tokens would not survive a restart");
        std::process::exit(1);
    };
    let verifier = auth::TokenVerifier::new(secret.clone(), ttl.unwrap_or(config.token_ttl));
    println!("{}", verifier.issue(username));
}

async fn run_server(config: ServerConfig) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        grace_secs = config.grace_period.as_secs(),
        alloc_command = ?config.launch.alloc_command,
        "starting slurmgate-server"
    );

    let secret = match &config.token_secret {
        Some(secret) => secret.clone(),
        None => match slurmgate_core::generate_secret() {
            Ok(secret) => {
                warn!("auth.token_secret not set; using a random secret for this process");
                secret
            }
            Err(e) => {
                error!(error = %e, "failed to generate token secret");
                std::process::exit(1);
            }
        },
    };

    let listener = match tokio::net::TcpListener::bind(config.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %config.listen_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    let state = AppState::from_config(&config, secret, Arc::new(SystemResolver));
    let registry = state.service.registry().clone();
    if let Err(e) = server::serve(listener, state, shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    // Remaining terminals close with the process, hanging up their children.
    info!(sessions = registry.count().await, "slurmgate-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                info!("received shutdown signal");
                return;
            }
        };
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
    info!("received shutdown signal");
}
