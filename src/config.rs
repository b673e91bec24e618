//! Configuration file parser for `rss-seed.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Subscription list aggregated when no other URL is configured.
pub const DEFAULT_OPML_URL: &str = "https://gist.githubusercontent.com/emschwartz/e6d2bf860ccc367fe37ff953ba6de66b/raw/hn-popular-blogs-2025.opml";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Settings for one aggregation run.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// URL of the OPML subscription document.
    pub opml_url: String,

    /// Maximum number of feeds taken from the subscription list, in document order.
    pub max_feeds: usize,

    /// Maximum number of entries taken from each feed, in document order.
    pub items_per_feed: usize,

    /// Maximum number of entries in the aggregate output.
    pub max_items: usize,

    /// Per-request timeout in seconds, covering connect, headers and body.
    pub fetch_timeout_secs: u64,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,

    /// Feeds fetched at the same time. 1 fetches strictly one after another.
    pub max_concurrent_fetches: usize,

    /// Destination of the JSON artifact.
    pub output_path: PathBuf,

    /// Static page whose seed block is refreshed, if it exists.
    pub index_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            opml_url: DEFAULT_OPML_URL.to_string(),
            max_feeds: 36,
            items_per_feed: 3,
            max_items: 40,
            fetch_timeout_secs: 15,
            user_agent: "RSS Builder/1.0".to_string(),
            max_concurrent_fetches: 8,
            output_path: PathBuf::from("rss.json"),
            index_path: PathBuf::from("index.html"),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] = &[
        "opml_url",
        "max_feeds",
        "items_per_feed",
        "max_items",
        "fetch_timeout_secs",
        "user_agent",
        "max_concurrent_fetches",
        "output_path",
        "index_path",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
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
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text. Blank text yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            opml_url = %config.opml_url,
            max_feeds = config.max_feeds,
            max_items = config.max_items,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Per-request timeout as a [`Duration`].
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
