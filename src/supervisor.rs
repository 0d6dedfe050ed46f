//! Daemon lifecycle: start, stop, restart, ensure, status.
//!
//! The goal of every operation is the same: make "my daemon is up, and only
//! mine" true, idempotently, from whatever state the machine is in.
//!
//! ```text
//! Stopped ──start──▶ Starting ──listener bound──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                       │                            ▲
//!                       └──spawn failed / exited─────┼──▶ Stopped
//!                                                    │
//!             ensure: healthy daemon found on port ──┘
//! ```
//!
//! Supervisor and server talk only through the state files in
//! [`DaemonPaths`] and OS signals. Every wait is bounded by the timings in
//! [`DaemonConfig`].
//!
//! The one policy rule worth memorising lives in [`Supervisor::ensure`]: a
//! process is only ever killed once it is proven unresponsive (no valid
//! `/health`) and proven not to be the daemon this supervisor recorded.

use std::fmt;
use std::path::PathBuf;

use crate::auth;
use crate::config::{Config, DaemonConfig};
use crate::error::DaemonError;
use crate::process::{ProcessHost, Signal, SpawnRequest, SystemHost};
use crate::state::{DaemonPaths, PidRecord};

/// Result of a lifecycle operation, suitable for printing as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    pub pid: Option<u32>,
}

impl Outcome {
    fn ok(message: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            success: true,
            message: message.into(),
            pid,
        }
    }

    fn failed(err: DaemonError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            pid: None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub struct Supervisor<H: ProcessHost = SystemHost> {
    paths: DaemonPaths,
    host_addr: String,
    timings: DaemonConfig,
    exe: PathBuf,
    config_path: Option<PathBuf>,
    host: H,
}

impl Supervisor<SystemHost> {
    /// A supervisor for the project at `paths.root`, spawning `exe` in server mode.
    pub fn new(paths: DaemonPaths, config: &Config, exe: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self::with_host(paths, config, exe, config_path, SystemHost)
    }
}

impl<H: ProcessHost> Supervisor<H> {
    pub fn with_host(
        paths: DaemonPaths,
        config: &Config,
        exe: PathBuf,
        config_path: Option<PathBuf>,
        host: H,
    ) -> Self {
        Self {
            paths,
            host_addr: config.server.host.clone(),
            timings: config.daemon.clone(),
            exe,
            config_path,
            host,
        }
    }

    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    /// The recorded pid if it answers the liveness probe.
    ///
    /// A pid file naming a dead process is deleted on the way, and so is one
    /// holding no pid, unless it is fresh enough to be a claim in progress.
    fn live_pid(&self) -> Option<u32> {
        match self.paths.pid_record() {
            PidRecord::Absent => None,
            PidRecord::Malformed { fresh: true } => {
                tracing::debug!(path = %self.paths.pid_file.display(), "pid file is being claimed");
                None
            }
            PidRecord::Malformed { fresh: false } => {
                tracing::info!(path = %self.paths.pid_file.display(), "removing malformed pid file");
                self.paths.remove_pid();
                None
            }
            PidRecord::Pid(pid) if self.host.is_alive(pid) => Some(pid),
            PidRecord::Pid(pid) => {
                tracing::info!(pid, "removing stale pid file");
                self.paths.remove_pid();
                None
            }
        }
    }

    pub fn status(&self) -> Outcome {
        match self.live_pid() {
            Some(pid) => Outcome::ok(format!("running (pid {pid})"), Some(pid)),
            None => Outcome::ok("not running", None),
        }
    }

    pub fn start(&self, port: u16) -> Outcome {
        match self.try_start(port) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(port, error = %e, "start failed");
                Outcome::failed(e)
            }
        }
    }

    fn try_start(&self, port: u16) -> Result<Outcome, DaemonError> {
        if let Some(pid) = self.live_pid() {
            return Ok(Outcome::ok(format!("already running (pid {pid})"), Some(pid)));
        }

        // Anything still in the pid file at this point is a claim being written.
        if matches!(self.paths.pid_record(), PidRecord::Malformed { .. }) {
            return Err(DaemonError::PidFileContended {
                path: self.paths.pid_file.clone(),
            });
        }

        if self.host.port_in_use(&self.host_addr, port) {
            return Err(DaemonError::PortInUse { port });
        }

        self.paths.ensure_dir()?;
        auth::ensure_token(&self.paths.token_file)?;

        let mut child = self.host.spawn_server(&SpawnRequest {
            exe: self.exe.clone(),
            root: self.paths.root.clone(),
            config: self.config_path.clone(),
            port,
            log_file: self.paths.log_file.clone(),
        })?;
        let pid = child.id();

        // Record before readiness so a concurrent start sees us.
        if !self.paths.claim_pid(pid)? {
            tracing::warn!(pid, "lost start race, terminating duplicate");
            if let Err(e) = self.host.signal(pid, Signal::Terminate) {
                tracing::warn!(error = %e, "failed to terminate duplicate daemon");
            }
            return match self.paths.read_pid() {
                Some(winner) => Ok(Outcome::ok(
                    format!("already running (pid {winner})"),
                    Some(winner),
                )),
                None => Err(DaemonError::PidFileContended {
                    path: self.paths.pid_file.clone(),
                }),
            };
        }

        let exited = |child: &mut Box<dyn crate::process::SpawnedProcess>| {
            child.has_exited() || !self.host.is_alive(pid)
        };

        if exited(&mut child) {
            self.paths.release_pid(pid);
            return Err(self.exited_immediately(pid));
        }

        self.host.sleep(self.timings.startup_grace());

        if exited(&mut child) {
            self.paths.release_pid(pid);
            return Err(self.exited_immediately(pid));
        }

        tracing::info!(pid, port, "daemon started");
        Ok(Outcome::ok(
            format!("started (pid {pid}) on port {port}"),
            Some(pid),
        ))
    }

    fn exited_immediately(&self, pid: u32) -> DaemonError {
        DaemonError::ExitedImmediately {
            pid,
            log_file: self.paths.log_file.clone(),
        }
    }

    /// Stops the recorded daemon: `SIGTERM`, bounded wait, then `SIGKILL`.
    ///
    /// Always runs to completion, and always leaves no pid or token file
    /// behind.
    pub fn stop(&self) -> Outcome {
        let Some(pid) = self.live_pid() else {
            self.forget();
            return Outcome::ok("not running", None);
        };

        if let Err(e) = self.host.signal(pid, Signal::Terminate) {
            tracing::warn!(pid, error = %e, "graceful signal failed");
        }

        let graceful = self.wait_for_exit(pid);
        if !graceful {
            tracing::warn!(pid, "daemon ignored SIGTERM, sending SIGKILL");
            if let Err(e) = self.host.signal(pid, Signal::Kill) {
                tracing::error!(pid, error = %e, "forced kill failed");
            }
        }

        self.forget();
        tracing::info!(pid, graceful, "daemon stopped");
        if graceful {
            Outcome::ok(format!("stopped (pid {pid})"), Some(pid))
        } else {
            Outcome::ok(format!("force-killed (pid {pid}) after grace period"), Some(pid))
        }
    }

    /// Polls liveness until the process is gone or the stop timeout passes.
    fn wait_for_exit(&self, pid: u32) -> bool {
        let poll = self.timings.poll_interval();
        let rounds = self.timings.stop_timeout().as_millis().div_ceil(poll.as_millis().max(1));
        for _ in 0..rounds {
            self.host.sleep(poll);
            if !self.host.is_alive(pid) {
                return true;
            }
        }
        false
    }

    fn forget(&self) {
        self.paths.remove_pid();
        self.paths.remove_token();
    }

    pub fn restart(&self, port: u16) -> Outcome {
        let stopped = self.stop();
        self.host.sleep(self.timings.restart_pause());
        let started = self.start(port);
        Outcome {
            success: started.success,
            message: format!("{}; {}", stopped.message, started.message),
            pid: started.pid,
        }
    }

    /// Makes the daemon healthy on `port`, starting it if needed.
    ///
    /// - Recorded, alive, and answering `/health`: nothing to do.
    /// - Port held by something that answers `/health`: a healthy daemon
    ///   without our bookkeeping. Left alone.
    /// - Port held by an unresponsive process whose pid differs from the
    ///   recorded one: terminated gracefully, then `start`.
    /// - Port held by an unresponsive process that is ours, or that cannot
    ///   be identified: reported, never killed.
    pub fn ensure(&self, port: u16) -> Outcome {
        match self.try_ensure(port) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(port, error = %e, "ensure failed");
                Outcome::failed(e)
            }
        }
    }

    fn try_ensure(&self, port: u16) -> Result<Outcome, DaemonError> {
        let timeout = self.timings.health_timeout();
        let recorded = self.live_pid();

        if let Some(pid) = recorded {
            if self.host.health(&self.host_addr, port, timeout).is_some() {
                return Ok(Outcome::ok(format!("healthy (pid {pid})"), Some(pid)));
            }
            tracing::warn!(pid, port, "recorded daemon is alive but unhealthy");
        }

        if self.host.port_in_use(&self.host_addr, port) {
            if recorded.is_none() {
                if let Some(report) = self.host.health(&self.host_addr, port, timeout) {
                    return Ok(Outcome::ok(
                        format!("healthy daemon already serving port {port} without a pid file; leaving it alone"),
                        report.pid,
                    ));
                }
            }

            match self.host.listener_pid(port) {
                Some(listener) if Some(listener) != recorded && listener != std::process::id() => {
                    tracing::warn!(pid = listener, port, "terminating unresponsive process on port");
                    self.host.signal(listener, Signal::Terminate)?;
                    self.wait_for_port_release(listener, port);
                }
                Some(listener) => return Err(DaemonError::Unresponsive { pid: listener }),
                None => return Err(DaemonError::UnidentifiedListener { port }),
            }
        } else if let Some(pid) = recorded {
            return Err(DaemonError::Unresponsive { pid });
        }

        Ok(self.start(port))
    }

    fn wait_for_port_release(&self, pid: u32, port: u16) {
        let poll = self.timings.poll_interval();
        let rounds = self.timings.stop_timeout().as_millis().div_ceil(poll.as_millis().max(1));
        for _ in 0..rounds {
            self.host.sleep(poll);
            if !self.host.is_alive(pid) && !self.host.port_in_use(&self.host_addr, port) {
                return;
            }
        }
        tracing::warn!(pid, port, "port not released within stop timeout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{HealthReport, SpawnedProcess};
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;
    use std::fs;
    use std::rc::Rc;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// In-memory OS: processes are pids in a set, signals are recorded.
    #[derive(Default)]
    struct FakeHost {
        alive: Rc<RefCell<HashSet<u32>>>,
        signals: RefCell<Vec<(u32, Signal)>>,
        spawned: Cell<u32>,
        next_pid: Cell<u32>,
        port_busy: Cell<bool>,
        healthy: Cell<bool>,
        listener: Cell<Option<u32>>,
        ignores_term: Cell<bool>,
        child_dies: Cell<bool>,
        /// Written to the pid file during the next spawn, as a concurrent
        /// `start` would.
        rival_claim: RefCell<Option<(PathBuf, String)>>,
    }

    struct FakeChild {
        pid: u32,
        alive: Rc<RefCell<HashSet<u32>>>,
    }

    impl SpawnedProcess for FakeChild {
        fn id(&self) -> u32 {
            self.pid
        }
        fn has_exited(&mut self) -> bool {
            !self.alive.borrow().contains(&self.pid)
        }
    }

    impl ProcessHost for FakeHost {
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.borrow().contains(&pid)
        }

        fn signal(&self, pid: u32, signal: Signal) -> Result<(), DaemonError> {
            self.signals.borrow_mut().push((pid, signal));
            if signal == Signal::Kill || !self.ignores_term.get() {
                self.alive.borrow_mut().remove(&pid);
                if self.listener.get() == Some(pid) {
                    self.listener.set(None);
                    self.port_busy.set(false);
                    self.healthy.set(false);
                }
            }
            Ok(())
        }

        fn spawn_server(&self, _req: &SpawnRequest) -> Result<Box<dyn SpawnedProcess>, DaemonError> {
            if let Some((pid_file, contents)) = self.rival_claim.borrow_mut().take() {
                std::fs::write(pid_file, &contents).unwrap();
                if let Ok(rival) = contents.parse::<u32>() {
                    self.alive.borrow_mut().insert(rival);
                }
            }
            let pid = self.next_pid.get().max(1000) + 1;
            self.next_pid.set(pid);
            self.spawned.set(self.spawned.get() + 1);
            if !self.child_dies.get() {
                self.alive.borrow_mut().insert(pid);
                self.port_busy.set(true);
                self.healthy.set(true);
                self.listener.set(Some(pid));
            }
            Ok(Box::new(FakeChild {
                pid,
                alive: self.alive.clone(),
            }))
        }

        fn port_in_use(&self, _host: &str, _port: u16) -> bool {
            self.port_busy.get()
        }

        fn health(&self, _host: &str, port: u16, _timeout: Duration) -> Option<HealthReport> {
            self.healthy.get().then(|| HealthReport {
                status: "ok".into(),
                port,
                pid: self.listener.get(),
                version: None,
            })
        }

        fn listener_pid(&self, _port: u16) -> Option<u32> {
            self.listener.get()
        }

        fn sleep(&self, _duration: Duration) {}
    }

    fn supervisor(tmp: &TempDir, host: FakeHost) -> Supervisor<FakeHost> {
        Supervisor::with_host(
            DaemonPaths::new(tmp.path()),
            &Config::default(),
            PathBuf::from("/bin/ctxd"),
            None,
            host,
        )
    }

    #[test]
    fn start_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, FakeHost::default());

        let first = sup.start(4242);
        assert!(first.success, "{first}");
        assert!(sup.paths().token_file.exists());

        let second = sup.start(4242);
        assert!(second.success);
        assert!(second.message.contains("already running"));
        assert_eq!(first.pid, second.pid);
        assert_eq!(sup.host.spawned.get(), 1);
    }

    fn write_pid_file(sup: &Supervisor<FakeHost>, contents: &str, age: Duration) {
        let paths = sup.paths();
        paths.ensure_dir().unwrap();
        fs::write(&paths.pid_file, contents).unwrap();
        fs::File::options()
            .write(true)
            .open(&paths.pid_file)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    #[test]
    fn malformed_pid_file_self_heals() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, FakeHost::default());

        write_pid_file(&sup, "garbage", Duration::from_secs(60));
        let out = sup.status();
        assert_eq!(out.message, "not running");
        assert!(!sup.paths().pid_file.exists());

        write_pid_file(&sup, "garbage", Duration::from_secs(60));
        let out = sup.start(4242);
        assert!(out.success, "{out}");
        assert!(out.message.starts_with("started"));
        assert!(sup.host.signals.borrow().is_empty());
        assert_eq!(sup.paths().read_pid(), out.pid);

        let again = sup.start(4242);
        assert!(again.message.contains("already running"));
        assert_eq!(sup.host.spawned.get(), 1);
    }

    #[test]
    fn fresh_empty_pid_file_blocks_start() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, FakeHost::default());
        write_pid_file(&sup, "", Duration::ZERO);

        let out = sup.start(4242);
        assert!(!out.success);
        assert!(out.message.contains("another start may be in progress"));
        assert_eq!(sup.host.spawned.get(), 0);
        assert!(sup.paths().pid_file.exists());
    }

    #[test]
    fn losing_start_race_defers_to_winner() {
        let tmp = TempDir::new().unwrap();
        let host = FakeHost::default();
        *host.rival_claim.borrow_mut() =
            Some((DaemonPaths::new(tmp.path()).pid_file, "777".to_string()));
        let sup = supervisor(&tmp, host);

        let out = sup.start(4242);
        assert!(out.success, "{out}");
        assert_eq!(out.pid, Some(777));
        assert_eq!(out.message, "already running (pid 777)");
        assert!(!out.message.contains("started"));
        assert_eq!(*sup.host.signals.borrow(), vec![(1001, Signal::Terminate)]);
        assert_eq!(sup.paths().read_pid(), Some(777));
    }

    #[test]
    fn losing_start_race_to_unreadable_claim_fails() {
        let tmp = TempDir::new().unwrap();
        let host = FakeHost::default();
        *host.rival_claim.borrow_mut() =
            Some((DaemonPaths::new(tmp.path()).pid_file, String::new()));
        let sup = supervisor(&tmp, host);

        let out = sup.start(4242);
        assert!(!out.success);
        assert_eq!(out.pid, None);
        assert!(out.message.contains("holds no pid"));
        assert_eq!(*sup.host.signals.borrow(), vec![(1001, Signal::Terminate)]);
    }

    #[test]
    fn start_fails_fast_on_busy_port() {
        let tmp = TempDir::new().unwrap();
        let host = FakeHost::default();
        host.port_busy.set(true);
        let sup = supervisor(&tmp, host);

        let out = sup.start(4242);
        assert!(!out.success);
        assert!(out.message.contains("already in use"));
        assert_eq!(sup.host.spawned.get(), 0);
    }

    #[test]
    fn start_rolls_back_when_child_exits() {
        let tmp = TempDir::new().unwrap();
        let host = FakeHost::default();
        host.child_dies.set(true);
        let sup = supervisor(&tmp, host);

        let out = sup.start(4242);
        assert!(!out.success);
        assert!(out.message.contains("immediately exited"));
        assert!(!sup.paths().pid_file.exists());
    }

    #[test]
    fn stale_pid_file_self_heals() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, FakeHost::default());
        sup.paths().claim_pid(31337).unwrap();

        let out = sup.status();
        assert!(out.success);
        assert_eq!(out.message, "not running");
        assert!(!sup.paths().pid_file.exists());
    }

    #[test]
    fn stop_escalates_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let host = FakeHost::default();
        host.ignores_term.set(true);
        let sup = supervisor(&tmp, host);
        let pid = sup.start(4242).pid.unwrap();

        let out = sup.stop();
        assert!(out.success);
        assert!(out.message.contains("force-killed"));
        assert_eq!(
            *sup.host.signals.borrow(),
            vec![(pid, Signal::Terminate), (pid, Signal::Kill)]
        );
        assert!(!sup.paths().pid_file.exists());
        assert!(!sup.paths().token_file.exists());
    }

    #[test]
    fn stop_graceful_and_not_running() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, FakeHost::default());
        assert_eq!(sup.stop().message, "not running");

        let pid = sup.start(4242).pid.unwrap();
        let out = sup.stop();
        assert!(out.message.starts_with("stopped"));
        assert_eq!(*sup.host.signals.borrow(), vec![(pid, Signal::Terminate)]);
        assert!(!sup.paths().token_file.exists());
    }

    #[test]
    fn restart_replaces_process() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, FakeHost::default());
        let old = sup.start(4242).pid.unwrap();
        let out = sup.restart(4242);
        assert!(out.success, "{out}");
        assert_ne!(out.pid, Some(old));
        assert_eq!(sup.host.spawned.get(), 2);
    }

    #[test]
    fn ensure_is_noop_when_healthy() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, FakeHost::default());
        sup.start(4242);
        let out = sup.ensure(4242);
        assert!(out.message.starts_with("healthy"));
        assert_eq!(sup.host.spawned.get(), 1);
    }

    #[test]
    fn ensure_leaves_healthy_unknown_daemon_alone() {
        let tmp = TempDir::new().unwrap();
        let host = FakeHost::default();
        host.alive.borrow_mut().insert(777);
        host.port_busy.set(true);
        host.healthy.set(true);
        host.listener.set(Some(777));
        let sup = supervisor(&tmp, host);

        let out = sup.ensure(4242);
        assert!(out.success);
        assert_eq!(out.pid, Some(777));
        assert!(sup.host.signals.borrow().is_empty());
        assert_eq!(sup.host.spawned.get(), 0);
    }

    #[test]
    fn ensure_replaces_unresponsive_foreign_listener() {
        let tmp = TempDir::new().unwrap();
        let host = FakeHost::default();
        host.alive.borrow_mut().insert(555);
        host.port_busy.set(true);
        host.listener.set(Some(555));
        let sup = supervisor(&tmp, host);

        let out = sup.ensure(4242);
        assert!(out.success, "{out}");
        assert_eq!(sup.host.signals.borrow()[0], (555, Signal::Terminate));
        assert_eq!(sup.host.spawned.get(), 1);
    }

    #[test]
    fn ensure_never_kills_unidentified_listener() {
        let tmp = TempDir::new().unwrap();
        let host = FakeHost::default();
        host.port_busy.set(true);
        let sup = supervisor(&tmp, host);

        let out = sup.ensure(4242);
        assert!(!out.success);
        assert!(out.message.contains("could not be identified"));
        assert!(sup.host.signals.borrow().is_empty());
    }

    #[test]
    fn ensure_never_kills_recorded_daemon() {
        let tmp = TempDir::new().unwrap();
        let sup = supervisor(&tmp, FakeHost::default());
        let pid = sup.start(4242).pid.unwrap();
        sup.host.healthy.set(false);

        let out = sup.ensure(4242);
        assert!(!out.success);
        assert!(out.message.contains("not answering /health"));
        assert!(sup.host.signals.borrow().is_empty());
        assert!(sup.host.is_alive(pid));
    }
}
