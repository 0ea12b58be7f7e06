//! Configuration file parser for ~/.config/autosync/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`,
//! which has no sources and therefore imports nothing. Unknown top-level keys
//! are accepted but logged as likely typos.
//!
//! A loaded `Config` is immutable and is handed to each pipeline run by
//! reference; no component reads settings from anywhere else.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::content::{Provider, TransformRules};

/// Environment variable that overrides `[ai] api_key`.
pub const AI_KEY_ENV: &str = "AUTOSYNC_AI_API_KEY";
/// Environment variable that overrides `[target] application_password`.
pub const TARGET_PASSWORD_ENV: &str = "AUTOSYNC_TARGET_PASSWORD";

/// Polling intervals below this are clamped up.
pub const MIN_INTERVAL_SECS: u64 = 5;

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

/// One remote REST endpoint to poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// REST root of the remote site, e.g. `https://example.com/wp-json`.
    pub url: String,
    /// Category assigned to posts imported from this source.
    pub category_id: Option<u64>,
}

impl SourceConfig {
    /// The URL as used for fetching: trimmed, trailing slashes removed.
    /// `None` for blank entries.
    pub fn normalized_url(&self) -> Option<String> {
        let url = self.url.trim().trim_end_matches('/');
        if url.is_empty() {
            None
        } else {
            Some(url.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Attach a featured image to each imported post.
    pub fetch_featured: bool,
    /// Operator-chosen image used verbatim for every post instead of
    /// deriving one from the remote post.
    pub custom_url: Option<String>,
    /// Allow image downloads from loopback and private addresses.
    pub allow_private_hosts: bool,
    /// Where downloads are staged before upload. Defaults to the system
    /// temp directory.
    pub staging_dir: Option<PathBuf>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            fetch_featured: true,
            custom_url: None,
            allow_private_hosts: false,
            staging_dir: None,
        }
    }
}

impl ImageConfig {
    /// The override URL, if one is configured and non-blank.
    pub fn custom_url(&self) -> Option<&str> {
        self.custom_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

/// `[ai]` table. `Debug` masks the API key.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    pub provider: Option<Provider>,
    /// Provider credential. `AUTOSYNC_AI_API_KEY` takes precedence.
    pub api_key: Option<String>,
    /// Model name; each provider has its own default.
    pub model: Option<String>,
    /// Override for the provider's API root.
    pub base_url: Option<String>,
    pub title_instruction: String,
    pub description_instruction: String,
}

impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("enabled", &self.enabled)
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("title_instruction", &self.title_instruction)
            .field("description_instruction", &self.description_instruction)
            .finish()
    }
}

/// Ledger storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// Append-only text file.
    #[default]
    File,
    /// SQLite database keyed by remote id and slug base.
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Ledger location. Defaults to a file in the config directory.
    pub path: Option<PathBuf>,
}

impl LedgerConfig {
    pub fn resolve_path(&self, base_dir: &Path) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => match self.backend {
                LedgerBackend::File => base_dir.join("imported-urls.txt"),
                LedgerBackend::Sqlite => base_dir.join("ledger.db"),
            },
        }
    }
}

/// `[target]` table: the WordPress site posts are published to.
/// `Debug` masks the application password.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Site root, e.g. `https://my-site.example`.
    pub base_url: String,
    pub username: String,
    /// WordPress application password. `AUTOSYNC_TARGET_PASSWORD` takes precedence.
    pub application_password: Option<String>,
    pub author_id: Option<u64>,
    /// Status given to new posts.
    pub post_status: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            application_password: None,
            author_id: None,
            post_status: "publish".to_string(),
        }
    }
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field(
                "application_password",
                &self.application_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("author_id", &self.author_id)
            .field("post_status", &self.post_status)
            .finish()
    }
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between scheduled runs (minimum 5).
    pub interval_seconds: u64,
    /// Verbose pipeline logging when `RUST_LOG` is unset.
    pub debug: bool,
    /// Sources in processing order.
    pub sources: Vec<SourceConfig>,
    pub rules: TransformRules,
    pub images: ImageConfig,
    pub ai: AiConfig,
    pub ledger: LedgerConfig,
    pub target: TargetConfig,
    /// Refuse to start a run while another one holds the run lock.
    pub run_lock: bool,
    /// Age after which an abandoned run lock is taken over.
    pub run_lock_ttl_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            debug: false,
            sources: Vec::new(),
            rules: TransformRules::default(),
            images: ImageConfig::default(),
            ai: AiConfig::default(),
            ledger: LedgerConfig::default(),
            target: TargetConfig::default(),
            run_lock: false,
            run_lock_ttl_seconds: 600,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "interval_seconds",
        "debug",
        "sources",
        "rules",
        "images",
        "ai",
        "ledger",
        "target",
        "run_lock",
        "run_lock_ttl_seconds",
    ];

    /// Load configuration from a TOML file and apply environment overrides.
    ///
    /// - Missing file → defaults
    /// - Empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
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
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        if config.interval_seconds < MIN_INTERVAL_SECS {
            tracing::warn!(
                interval_seconds = config.interval_seconds,
                minimum = MIN_INTERVAL_SECS,
                "Polling interval below minimum, clamping"
            );
        }
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            ledger = ?config.ledger.backend,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Overlays secrets from the environment. Non-empty variables win over
    /// file values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(AI_KEY_ENV) {
            self.ai.api_key = Some(key);
        }
        if let Some(password) = non_empty(TARGET_PASSWORD_ENV) {
            self.target.application_password = Some(password);
        }
    }

    /// Scheduling interval, clamped to [`MIN_INTERVAL_SECS`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(MIN_INTERVAL_SECS))
    }

    /// Sources with blank URLs dropped and URLs normalized, in config order.
    pub fn active_sources(&self) -> Vec<(String, Option<u64>)> {
        self.sources
            .iter()
            .filter_map(|s| s.normalized_url().map(|url| (url, s.category_id)))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
