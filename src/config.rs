//! Configuration file parser for ~/.config/feedwell/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged, since they are usually typos.
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Refresh interval in minutes. 0 = manual refresh only.
    pub refresh_interval_minutes: u64,

    /// Size of the refresh worker pool. `None` = available parallelism.
    pub workers: Option<usize>,

    /// Deadline for a single favicon lookup, in seconds.
    pub favicon_timeout_secs: u64,

    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("feedwell.db"),
            refresh_interval_minutes: 0,
            workers: None,
            favicon_timeout_secs: 30,
            http: HttpConfig::default(),
        }
    }
}

/// HTTP access layer settings. Durations are in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Value of the `User-Agent` header sent with every request.
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub tls_handshake_timeout_secs: u64,
    /// Longest wait for response headers once connected. Also bounds each
    /// stall while the body streams in.
    pub response_header_timeout_secs: u64,
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on every further retry.
    pub initial_backoff_secs: u64,
    /// Reuse connections across requests. Off by default: flaky servers
    /// tend to leave stale sockets behind.
    pub keep_alive: bool,
    /// Idle connections kept per host when `keep_alive` is on.
    pub max_idle_per_host: usize,
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("feedwell/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 60,
            connect_timeout_secs: 30,
            tls_handshake_timeout_secs: 20,
            response_header_timeout_secs: 20,
            max_attempts: 3,
            initial_backoff_secs: 2,
            keep_alive: false,
            max_idle_per_host: 10,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl HttpConfig {
    const KNOWN_KEYS: [&'static str; 10] = [
        "user_agent",
        "request_timeout_secs",
        "connect_timeout_secs",
        "tls_handshake_timeout_secs",
        "response_header_timeout_secs",
        "max_attempts",
        "initial_backoff_secs",
        "keep_alive",
        "max_idle_per_host",
        "max_body_bytes",
    ];
}

impl Config {
    const MAX_FILE_SIZE: u64 = 1024 * 1024;

    const KNOWN_KEYS: [&'static str; 5] = [
        "database_path",
        "refresh_interval_minutes",
        "workers",
        "favicon_timeout_secs",
        "http",
    ];

    /// Load configuration from a TOML file.
    ///
    /// A missing or blank file yields the defaults. Unknown keys, including
    /// ones inside `[http]`, are logged and otherwise ignored.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_capped(path, Self::MAX_FILE_SIZE)? else {
            tracing::debug!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            refresh_interval_minutes = config.refresh_interval_minutes,
            workers = config.worker_count(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Worker pool size: the configured value, else available parallelism, else 4.
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|n| *n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4)
    }

    pub fn favicon_timeout(&self) -> Duration {
        Duration::from_secs(self.favicon_timeout_secs)
    }
}

/// Read at most `limit` bytes of `path`. `None` when the file does not exist.
fn read_capped(path: &Path, limit: u64) -> Result<Option<String>, ConfigError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut content = String::new();
    file.take(limit + 1).read_to_string(&mut content)?;
    if content.len() as u64 > limit {
        return Err(ConfigError::TooLarge(format!(
            "{} exceeds {limit} bytes",
            path.display()
        )));
    }
    Ok(Some(content))
}

fn warn_unknown_keys(raw: &toml::Table) {
    for (key, value) in raw {
        if !Config::KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            continue;
        }
        let Some(http) = value.as_table().filter(|_| key == "http") else {
            continue;
        };
        for key in http.keys() {
            if !HttpConfig::KNOWN_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %format!("http.{key}"), "Unknown key in config file, ignoring");
            }
        }
    }
}

/// `$HOME/.config/feedwell`, or the current directory when `HOME` is unset.
pub fn default_data_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".config").join("feedwell"),
        Err(_) => PathBuf::from("."),
    }
}

// ============================================================================
// Tests
// ============================================================================
