//! Agent configuration: defaults, TOML file, environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use moorline_core::Transience;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_POLL_MAX_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_POLL_INCREMENT_SECS: u64 = 10;
pub const DEFAULT_HEARTBEAT_GRACE_SECS: u64 = 300;
pub const DEFAULT_MAX_RECORDS_PER_FETCH: u32 = 1000;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("configuration invalid: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}

/// Agent configuration. All values are read-only after startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Exchange; all API paths are relative to it. Required.
    pub exchange_url: String,
    /// Directory holding the agent's durable state.
    pub data_dir: PathBuf,
    pub poll: PollConfig,
    /// Seconds of consecutive fetch failures before the heartbeat is
    /// declared failed. `0` falls back to the maximum poll interval.
    pub heartbeat_grace_secs: u64,
    /// Page size for one change-feed fetch.
    pub max_records_per_fetch: u32,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange_url: String::new(),
            data_dir: PathBuf::from("."),
            poll: PollConfig::default(),
            heartbeat_grace_secs: DEFAULT_HEARTBEAT_GRACE_SECS,
            max_records_per_fetch: DEFAULT_MAX_RECORDS_PER_FETCH,
            http: HttpConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Starting (and minimum) seconds between change-feed polls.
    pub interval_secs: u64,
    /// Ceiling for the adaptive interval.
    pub max_interval_secs: u64,
    /// Step added each time the interval grows.
    pub increment_secs: u64,
    /// When false, the interval never grows; resets still apply.
    pub dynamic: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_interval_secs: DEFAULT_POLL_MAX_INTERVAL_SECS,
            increment_secs: DEFAULT_POLL_INCREMENT_SECS,
            dynamic: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Transport-error retries before a call is given up.
    pub retry_count: u32,
    pub retry_interval_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 20,
            read_timeout_secs: 30,
            retry_count: 5,
            retry_interval_secs: 10,
        }
    }
}

impl Config {
    /// Load from a TOML file, apply `MOORLINE_*` environment overrides, and
    /// validate.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load if the file exists, otherwise start from defaults plus
    /// environment overrides. Parse failures are logged and fall back to
    /// defaults.
    pub fn load_or_default(path: &Path) -> Config {
        if path.exists() {
            match Config::load(path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("config load failed, using defaults: {e}"),
            }
        }
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "exchange_url is required".to_string(),
            });
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "poll.interval_secs must be at least 1".to_string(),
            });
        }
        if self.poll.max_interval_secs < self.poll.interval_secs {
            return Err(ConfigError::Invalid {
                reason: "poll.max_interval_secs must not be below poll.interval_secs".to_string(),
            });
        }
        if self.max_records_per_fetch == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_records_per_fetch must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Exchange base URL with a guaranteed trailing slash, so relative API
    /// paths can be appended directly.
    pub fn normalized_exchange_url(&self) -> String {
        let trimmed = self.exchange_url.trim();
        if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        }
    }

    /// Effective heartbeat grace: configured value, or the maximum poll
    /// interval when unset.
    pub fn effective_heartbeat_grace_secs(&self) -> u64 {
        if self.heartbeat_grace_secs == 0 {
            self.poll.max_interval_secs
        } else {
            self.heartbeat_grace_secs
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("moorline.db")
    }
}

/// Write the config atomically (temp file + rename).
pub fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let write_err = |reason: String| ConfigError::Write {
        path: path.to_path_buf(),
        reason,
    };
    let dir = path
        .parent()
        .ok_or_else(|| write_err("path has no parent directory".to_string()))?;
    fs::create_dir_all(dir).map_err(|e| write_err(e.to_string()))?;
    let contents = toml::to_string_pretty(config).map_err(|e| write_err(e.to_string()))?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_err(e.to_string()))?;
    fs::write(temp.path(), contents.as_bytes()).map_err(|e| write_err(e.to_string()))?;
    temp.persist(path).map_err(|e| write_err(e.to_string()))?;
    Ok(())
}

fn apply_env_overrides(config: &mut Config) {
    if let Some(url) = env_string("MOORLINE_EXCHANGE_URL") {
        config.exchange_url = url;
    }
    if let Some(dir) = env_string("MOORLINE_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(value) = env_u64("MOORLINE_POLL_INTERVAL_SECS") {
        config.poll.interval_secs = value;
    }
    if let Some(value) = env_u64("MOORLINE_POLL_MAX_INTERVAL_SECS") {
        config.poll.max_interval_secs = value;
    }
    if let Some(value) = env_u64("MOORLINE_POLL_INCREMENT_SECS") {
        config.poll.increment_secs = value;
    }
    if let Some(value) = env_bool("MOORLINE_DYNAMIC_POLL") {
        config.poll.dynamic = value;
    }
    if let Some(value) = env_u64("MOORLINE_HEARTBEAT_GRACE_SECS") {
        config.heartbeat_grace_secs = value;
    }
    if let Some(value) = env_u64("MOORLINE_MAX_RECORDS_PER_FETCH") {
        config.max_records_per_fetch = value.min(u64::from(u32::MAX)) as u32;
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%name, %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    Some(!matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "n" | "off"
    ))
}
