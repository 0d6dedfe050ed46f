//! Failure taxonomy for daemon lifecycle operations.
//!
//! These never escape the supervisor as panics or early returns: every
//! operation folds them into an [`Outcome`](crate::supervisor::Outcome) so
//! the CLI can print a readable message and pick an exit status.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("port {port} is already in use by another process")]
    PortInUse { port: u16 },

    #[error("failed to spawn daemon: {0}")]
    Spawn(#[source] io::Error),

    #[error("daemon started but immediately exited (pid {pid}); see {}", .log_file.display())]
    ExitedImmediately { pid: u32, log_file: PathBuf },

    #[error("failed to send {signal} to pid {pid}: {reason}")]
    Signal {
        pid: u32,
        signal: &'static str,
        reason: String,
    },

    #[error("pid file {} exists but holds no pid; another start may be in progress", .path.display())]
    PidFileContended { path: PathBuf },

    #[error("daemon state error: {0}")]
    State(String),

    #[error("daemon (pid {pid}) is running but not answering /health; run `ctxd restart`")]
    Unresponsive { pid: u32 },

    #[error("port {port} is held by a process that does not answer /health and could not be identified; not killing it")]
    UnidentifiedListener { port: u16 },
}

impl From<anyhow::Error> for DaemonError {
    fn from(err: anyhow::Error) -> Self {
        DaemonError::State(format!("{err:#}"))
    }
}
