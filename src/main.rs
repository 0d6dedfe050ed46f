//! # Context daemon CLI (`ctxd`)
//!
//! Starts, stops and supervises one context daemon per project root, and
//! runs the daemon itself in `serve` mode.
//!
//! ## Usage
//!
//! ```bash
//! ctxd --root ./my-project <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxd start [--port N]` | Spawn the daemon in the background (idempotent) |
//! | `ctxd stop` | Graceful stop, forced after the stop timeout |
//! | `ctxd restart [--port N]` | Stop, pause, start |
//! | `ctxd ensure [--port N]` | Make sure a healthy daemon serves the port |
//! | `ctxd status` | Report whether the recorded daemon is alive |
//! | `ctxd serve [--port N]` | Run the HTTP gateway in the foreground |
//! | `ctxd search "<query>"` | Rank the project's context locally, no daemon |
//! | `ctxd token` | Provision the auth token and print its path |
//!
//! Supervisor commands exit with status 1 when the operation fails.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use context_daemon::config::{self, Config};
use context_daemon::state::DaemonPaths;
use context_daemon::supervisor::{Outcome, Supervisor};
use context_daemon::{auth, search, server};

#[derive(Parser)]
#[command(
    name = "ctxd",
    about = "Local context daemon: ranks project logs, docs and code annotations over HTTP",
    version
)]
struct Cli {
    /// Project root the daemon serves. State lives in `<root>/.ctxd/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Path to a configuration file (TOML).
    ///
    /// Defaults to `<root>/.ctxd/config.toml`; a missing default file means
    /// built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the background.
    ///
    /// Does nothing if the recorded daemon is already alive. Fails if the
    /// port is held by another process.
    Start {
        #[arg(long)]
        port: Option<u16>,
    },

    /// Stop the daemon (SIGTERM, then SIGKILL after the stop timeout).
    Stop,

    /// Stop the daemon, pause briefly, and start it again.
    Restart {
        #[arg(long)]
        port: Option<u16>,
    },

    /// Make sure a healthy daemon is serving the port, starting one if needed.
    ///
    /// Only kills a process on the port if it fails the health check and is
    /// not the recorded daemon.
    Ensure {
        #[arg(long)]
        port: Option<u16>,
    },

    /// Report whether the recorded daemon is running.
    Status,

    /// Run the HTTP gateway in the foreground (what `start` spawns).
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },

    /// Search the project's context without a daemon.
    Search {
        /// Search query text.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Provision the auth token if needed and print the token file path.
    Token,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Project root not found: {}", cli.root.display()))?;
    let cfg = config::load_config(&root, cli.config.as_deref())?;

    let serving = matches!(cli.command, Commands::Serve { .. });
    init_tracing(if serving { &cfg.server.log_level } else { "warn" }, serving);

    let port = |flag: Option<u16>| flag.unwrap_or(cfg.server.port);

    match cli.command {
        Commands::Start { port: p } => report(supervisor(&root, &cfg, cli.config)?.start(port(p))),
        Commands::Stop => report(supervisor(&root, &cfg, cli.config)?.stop()),
        Commands::Restart { port: p } => {
            report(supervisor(&root, &cfg, cli.config)?.restart(port(p)))
        }
        Commands::Ensure { port: p } => report(supervisor(&root, &cfg, cli.config)?.ensure(port(p))),
        Commands::Status => report(supervisor(&root, &cfg, cli.config)?.status()),
        Commands::Serve { port: p } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
            if let Err(e) = runtime.block_on(server::run_server(&root, &cfg, port(p))) {
                tracing::error!(error = %e, "server failed");
                return Err(e);
            }
        }
        Commands::Search { query, limit } => {
            search::run_search(&root, &cfg, &query, limit)?;
        }
        Commands::Token => {
            let paths = DaemonPaths::new(&root);
            paths.ensure_dir()?;
            auth::ensure_token(&paths.token_file)?;
            println!("{}", paths.token_file.display());
        }
    }

    Ok(())
}

fn supervisor(root: &Path, cfg: &Config, config_path: Option<PathBuf>) -> Result<Supervisor> {
    let exe = std::env::current_exe().context("Failed to locate the ctxd executable")?;
    let config_path = match config_path {
        Some(path) => Some(
            path.canonicalize()
                .with_context(|| format!("Config file not found: {}", path.display()))?,
        ),
        None => None,
    };
    Ok(Supervisor::new(DaemonPaths::new(root), cfg, exe, config_path))
}

/// Prints the outcome; a failed outcome exits with status 1.
fn report(outcome: Outcome) {
    if outcome.success {
        println!("{outcome}");
    } else {
        eprintln!("Error: {outcome}");
        std::process::exit(1);
    }
}

fn init_tracing(default_level: &str, daemon: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!daemon)
        .with_target(false)
        .init();
}
