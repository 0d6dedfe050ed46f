//! TOML configuration for the daemon, its supervisor, and the source readers.
//!
//! The file lives at `<root>/.ctxd/config.toml` unless `--config` points
//! elsewhere. Every field has a default, so an empty (or absent) file yields
//! a working configuration.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 4242
//! log_level = "info"
//!
//! [daemon]
//! stop_timeout_ms = 3000
//!
//! [sources]
//! doc_dirs = ["docs", "notes"]
//! max_log_items = 50
//! ```

use anyhow::{bail, Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4242
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Timings used by the supervisor. All waits are bounded by these values.
#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    /// How long to wait for a graceful exit before sending `SIGKILL`.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Interval between liveness polls while stopping.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause after spawning so the listener can bind.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Pause between stop and start during a restart.
    #[serde(default = "default_restart_pause_ms")]
    pub restart_pause_ms: u64,
    /// Timeout for a single `GET /health` probe.
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            startup_grace_ms: default_startup_grace_ms(),
            restart_pause_ms: default_restart_pause_ms(),
            health_timeout_ms: default_health_timeout_ms(),
        }
    }
}

impl DaemonConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

fn default_stop_timeout_ms() -> u64 {
    3000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_startup_grace_ms() -> u64 {
    500
}
fn default_restart_pause_ms() -> u64 {
    500
}
fn default_health_timeout_ms() -> u64 {
    1000
}

/// Where the source readers look, and how much they may return.
///
/// Relative directories are resolved against the project root.
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_log_dirs")]
    pub log_dirs: Vec<PathBuf>,
    #[serde(default = "default_doc_dirs")]
    pub doc_dirs: Vec<PathBuf>,
    #[serde(default = "default_doc_globs")]
    pub doc_globs: Vec<String>,
    #[serde(default = "default_code_dirs")]
    pub code_dirs: Vec<PathBuf>,
    #[serde(default = "default_code_globs")]
    pub code_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_memory_dir")]
    pub memory_dir: PathBuf,
    #[serde(default = "default_max_log_items")]
    pub max_log_items: usize,
    #[serde(default = "default_max_doc_items")]
    pub max_doc_items: usize,
    #[serde(default = "default_max_code_items")]
    pub max_code_items: usize,
    #[serde(default = "default_max_memory_items")]
    pub max_memory_items: usize,
    /// Documents are truncated to this many characters.
    #[serde(default = "default_doc_char_limit")]
    pub doc_char_limit: usize,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            log_dirs: default_log_dirs(),
            doc_dirs: default_doc_dirs(),
            doc_globs: default_doc_globs(),
            code_dirs: default_code_dirs(),
            code_globs: default_code_globs(),
            exclude_globs: Vec::new(),
            memory_dir: default_memory_dir(),
            max_log_items: default_max_log_items(),
            max_doc_items: default_max_doc_items(),
            max_code_items: default_max_code_items(),
            max_memory_items: default_max_memory_items(),
            doc_char_limit: default_doc_char_limit(),
        }
    }
}

fn default_log_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from(".ctxd/logs"), PathBuf::from("logs")]
}
fn default_doc_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("docs")]
}
fn default_doc_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}
fn default_code_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("src")]
}
fn default_code_globs() -> Vec<String> {
    [
        "**/*.rs", "**/*.ts", "**/*.tsx", "**/*.js", "**/*.jsx", "**/*.py", "**/*.go",
        "**/*.java", "**/*.c", "**/*.h", "**/*.cpp", "**/*.rb", "**/*.sh",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_memory_dir() -> PathBuf {
    PathBuf::from(".ctxd/memory")
}
fn default_max_log_items() -> usize {
    50
}
fn default_max_doc_items() -> usize {
    50
}
fn default_max_code_items() -> usize {
    100
}
fn default_max_memory_items() -> usize {
    50
}
fn default_doc_char_limit() -> usize {
    2000
}

/// Default config location for a project root: `<root>/.ctxd/config.toml`.
pub fn default_config_path(root: &Path) -> PathBuf {
    crate::state::state_dir(root).join("config.toml")
}

/// Loads the configuration for `root`.
///
/// With `explicit == None` the default location is tried and a missing file
/// falls back to defaults. An explicitly given path must exist.
pub fn load_config(root: &Path, explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => read_config_file(path)?,
        None => {
            let path = default_config_path(root);
            if path.exists() {
                read_config_file(&path)?
            } else {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Config::default()
            }
        }
    };

    config.apply_env_overrides()?;
    validate(&config)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

impl Config {
    /// Applies `CTXD_HOST`, `CTXD_PORT`, and `CTXD_LOG_LEVEL`.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("CTXD_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("CTXD_PORT") {
            self.server.port = val
                .parse()
                .with_context(|| format!("CTXD_PORT is not a valid port: {val}"))?;
        }
        if let Ok(val) = std::env::var("CTXD_LOG_LEVEL") {
            self.server.log_level = val;
        }
        Ok(())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        bail!("server.port must be > 0");
    }

    if config.daemon.poll_interval_ms == 0 {
        bail!("daemon.poll_interval_ms must be > 0");
    }

    let sources = &config.sources;
    for (name, value) in [
        ("sources.max_log_items", sources.max_log_items),
        ("sources.max_doc_items", sources.max_doc_items),
        ("sources.max_code_items", sources.max_code_items),
        ("sources.max_memory_items", sources.max_memory_items),
        ("sources.doc_char_limit", sources.doc_char_limit),
    ] {
        if value == 0 {
            bail!("{} must be >= 1", name);
        }
    }

    for pattern in sources
        .doc_globs
        .iter()
        .chain(&sources.code_globs)
        .chain(&sources.exclude_globs)
    {
        Glob::new(pattern).with_context(|| format!("Invalid glob pattern: '{}'", pattern))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.server.port, 4242);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.daemon.stop_timeout_ms, 3000);
        assert_eq!(config.sources.doc_char_limit, 2000);
        validate(&config).unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 3402

[sources]
max_log_items = 20
doc_dirs = ["notes"]
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 3402);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.sources.max_log_items, 20);
        assert_eq!(config.sources.doc_dirs, vec![PathBuf::from("notes")]);
        assert_eq!(config.sources.max_code_items, 100);
        assert_eq!(config.daemon.poll_interval_ms, 100);
    }

    #[test]
    fn missing_default_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path(), None).unwrap();
        assert_eq!(config.sources.max_doc_items, 50);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(tmp.path(), Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn zero_cap_is_rejected() {
        let mut config = Config::default();
        config.sources.max_code_items = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_code_items"));
    }

    #[test]
    fn bad_glob_is_rejected() {
        let mut config = Config::default();
        config.sources.exclude_globs = vec!["a/[".to_string()];
        assert!(validate(&config).is_err());
    }
}
