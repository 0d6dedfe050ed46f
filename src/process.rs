//! Operating-system plumbing behind the supervisor.
//!
//! The supervisor and the server are separate processes; they share only
//! the state files and OS signals. [`ProcessHost`] wraps every OS-facing
//! primitive the supervisor needs (liveness probe, signals, spawning, port
//! and health probes) so lifecycle policy can be tested against a fake.
//!
//! [`SystemHost`] is the real implementation. Signals and listener lookup
//! go through the `kill` and `lsof` utilities.

use serde::Deserialize;
use std::fs::OpenOptions;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::error::DaemonError;

/// Signals the supervisor sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `SIGTERM`, a request to shut down gracefully.
    Terminate,
    /// `SIGKILL`.
    Kill,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }

    fn kill_arg(self) -> &'static str {
        match self {
            Signal::Terminate => "-TERM",
            Signal::Kill => "-KILL",
        }
    }
}

/// What `GET /health` reports.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: String,
    pub port: u16,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Everything needed to launch the server-mode entry point.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub exe: PathBuf,
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub port: u16,
    pub log_file: PathBuf,
}

/// A process the supervisor just spawned.
pub trait SpawnedProcess {
    fn id(&self) -> u32;
    /// Non-blocking: has the process already exited?
    fn has_exited(&mut self) -> bool;
}

impl SpawnedProcess for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.try_wait(), Ok(Some(_)))
    }
}

pub trait ProcessHost {
    /// Signal-0 style probe: does `pid` still name a running process?
    fn is_alive(&self, pid: u32) -> bool;

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), DaemonError>;

    /// Launches the server detached from the caller, output appended to the log file.
    fn spawn_server(&self, request: &SpawnRequest) -> Result<Box<dyn SpawnedProcess>, DaemonError>;

    /// Is anything bound to `host:port`?
    fn port_in_use(&self, host: &str, port: u16) -> bool;

    /// Calls `GET /health`; `None` unless it answers 200 with `status == "ok"`.
    fn health(&self, host: &str, port: u16, timeout: Duration) -> Option<HealthReport>;

    /// Pid of the process listening on `port`, if it can be determined.
    fn listener_pid(&self, port: u16) -> Option<u32>;

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The real operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl ProcessHost for SystemHost {
    fn is_alive(&self, pid: u32) -> bool {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
            && !is_zombie(pid)
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), DaemonError> {
        let output = Command::new("kill")
            .arg(signal.kill_arg())
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DaemonError::Signal {
                pid,
                signal: signal.name(),
                reason: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DaemonError::Signal {
                pid,
                signal: signal.name(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn spawn_server(&self, request: &SpawnRequest) -> Result<Box<dyn SpawnedProcess>, DaemonError> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_file)
            .map_err(DaemonError::Spawn)?;
        let log_err = log.try_clone().map_err(DaemonError::Spawn)?;

        let mut cmd = Command::new(&request.exe);
        cmd.arg("--root").arg(&request.root);
        if let Some(config) = &request.config {
            cmd.arg("--config").arg(config);
        }
        cmd.arg("serve")
            .arg("--port")
            .arg(request.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // New process group: the daemon must not receive the terminal's
        // SIGINT when the invoking shell is interrupted.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(DaemonError::Spawn)?;
        Ok(Box::new(child))
    }

    fn port_in_use(&self, host: &str, port: u16) -> bool {
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                drop(listener);
                // A wildcard listener elsewhere may still accept on this address.
                resolve(host, port)
                    .map(|addr| TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok())
                    .unwrap_or(false)
            }
            Err(e) => {
                tracing::debug!(host, port, error = %e, "port probe bind failed");
                true
            }
        }
    }

    fn health(&self, host: &str, port: u16, timeout: Duration) -> Option<HealthReport> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .ok()?;
        let response = client
            .get(format!("http://{host}:{port}/health"))
            .send()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let report: HealthReport = response.json().ok()?;
        (report.status == "ok").then_some(report)
    }

    fn listener_pid(&self, port: u16) -> Option<u32> {
        let output = Command::new("lsof")
            .arg("-nP")
            .arg("-t")
            .arg(format!("-iTCP:{port}"))
            .arg("-sTCP:LISTEN")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(|line| line.trim().parse::<u32>().ok())
    }
}

/// An exited but unreaped process still answers `kill -0`.
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    (host, port).to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(SystemHost.is_alive(std::process::id()));
    }

    #[test]
    fn unreaped_child_is_not_alive() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        std::thread::sleep(Duration::from_millis(200));
        if std::path::Path::new("/proc").exists() {
            assert!(!SystemHost.is_alive(pid));
        }
        child.wait().unwrap();
    }

    #[test]
    fn bound_port_is_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(SystemHost.port_in_use("127.0.0.1", port));
        drop(listener);
        assert!(!SystemHost.port_in_use("127.0.0.1", port));
    }

    #[test]
    fn health_of_closed_port_is_none() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(SystemHost
            .health("127.0.0.1", port, Duration::from_millis(300))
            .is_none());
    }

    #[test]
    fn spawned_child_reports_exit() {
        let mut child: Box<dyn SpawnedProcess> = Box::new(Command::new("true").spawn().unwrap());
        let mut exited = false;
        for _ in 0..50 {
            if child.has_exited() {
                exited = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(exited);
    }
}
