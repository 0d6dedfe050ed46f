//! Project-local daemon state on disk.
//!
//! Everything the supervisor and the server share lives under
//! `<root>/.ctxd/`, so daemons for different projects never collide:
//!
//! | File | Contents |
//! |------|----------|
//! | `daemon.pid` | process id of the running server, plain text |
//! | `daemon.token` | random hex bearer secret, mode `0600` |
//! | `daemon.log` | append-only server stdout/stderr |

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const STATE_DIR_NAME: &str = ".ctxd";

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR_NAME)
}

/// How long an unparseable pid file is treated as a claim still being written.
pub const PID_CLAIM_WINDOW: Duration = Duration::from_secs(2);

/// What the pid file currently says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidRecord {
    Absent,
    Pid(u32),
    /// Present but holding no valid pid. `fresh` means it was modified
    /// within [`PID_CLAIM_WINDOW`].
    Malformed { fresh: bool },
}

/// Paths of the state files for one project root.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub root: PathBuf,
    pub dir: PathBuf,
    pub pid_file: PathBuf,
    pub token_file: PathBuf,
    pub log_file: PathBuf,
}

impl DaemonPaths {
    pub fn new(root: &Path) -> Self {
        let dir = state_dir(root);
        Self {
            root: root.to_path_buf(),
            pid_file: dir.join("daemon.pid"),
            token_file: dir.join("daemon.token"),
            log_file: dir.join("daemon.log"),
            dir,
        }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory: {}", self.dir.display()))
    }

    /// Returns the recorded pid, or `None` if the file is absent or unparseable.
    pub fn read_pid(&self) -> Option<u32> {
        match self.pid_record() {
            PidRecord::Pid(pid) => Some(pid),
            PidRecord::Absent | PidRecord::Malformed { .. } => None,
        }
    }

    /// Reads the pid file, telling a missing file from one without a pid.
    pub fn pid_record(&self) -> PidRecord {
        let raw = match fs::read_to_string(&self.pid_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return PidRecord::Absent,
            Err(e) => {
                tracing::warn!(path = %self.pid_file.display(), error = %e, "unreadable pid file");
                return PidRecord::Malformed { fresh: self.pid_file_is_fresh() };
            }
        };
        match raw.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => PidRecord::Pid(pid),
            _ => PidRecord::Malformed {
                fresh: self.pid_file_is_fresh(),
            },
        }
    }

    /// A claim creates the file before writing the pid; a file younger than
    /// [`PID_CLAIM_WINDOW`] may still be mid-claim.
    fn pid_file_is_fresh(&self) -> bool {
        fs::metadata(&self.pid_file)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age < PID_CLAIM_WINDOW)
    }

    /// Records `pid` only if no pid file exists yet.
    ///
    /// Returns `Ok(false)` when another supervisor got there first.
    pub fn claim_pid(&self, pid: u32) -> Result<bool> {
        self.ensure_dir()?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.pid_file)
        {
            Ok(mut file) => {
                file.write_all(pid.to_string().as_bytes())
                    .with_context(|| format!("Failed to write pid file: {}", self.pid_file.display()))?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to create pid file: {}", self.pid_file.display())),
        }
    }

    pub fn remove_pid(&self) {
        remove_if_exists(&self.pid_file);
    }

    /// Removes the pid file only if it still records `pid`.
    pub fn release_pid(&self, pid: u32) {
        if self.read_pid() == Some(pid) {
            self.remove_pid();
        }
    }

    pub fn remove_token(&self) {
        remove_if_exists(&self.token_file);
    }
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove state file"),
    }
}
