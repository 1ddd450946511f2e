//! Configuration file parser for ~/.config/rssagg/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys do not fail the load: each one is logged as a warning and
//! its value is otherwise ignored.
//!
//! Command-line flags and `RSSAGG_*` environment variables override file
//! values; the binary applies them before calling [`Config::scraper_config`].
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;
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

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Fetch concurrency must be a positive integer")]
    InvalidConcurrency,

    #[error("Fetch interval must be at least one second")]
    InvalidInterval,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. `None` = `rssagg.db` in the config directory.
    pub database_path: Option<String>,

    /// Feeds selected per tick, and the cap on concurrently running workers.
    pub concurrency: u64,

    /// Seconds between ticks.
    pub interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            concurrency: 10,
            interval_secs: 60,
        }
    }
}

/// Validated, immutable settings for the scrape scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScraperConfig {
    pub concurrency: NonZeroUsize,
    pub interval: Duration,
}

impl ScraperConfig {
    pub fn new(concurrency: usize, interval: Duration) -> Result<Self, ConfigError> {
        let concurrency = NonZeroUsize::new(concurrency).ok_or(ConfigError::InvalidConcurrency)?;
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(Self {
            concurrency,
            interval,
        })
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → warning per key, value ignored
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["database_path", "concurrency", "interval_secs"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            concurrency = config.concurrency,
            interval_secs = config.interval_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Validate the scheduler settings.
    pub fn scraper_config(&self) -> Result<ScraperConfig, ConfigError> {
        let concurrency =
            usize::try_from(self.concurrency).map_err(|_| ConfigError::InvalidConcurrency)?;
        ScraperConfig::new(concurrency, Duration::from_secs(self.interval_secs))
    }
}

// ============================================================================
// Tests
// ============================================================================
