//! # Sync Configuration
//!
//! Configuration management for the share engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DOCSHARE_SERVER_URL=https://share.example.com                      │
//! │     DOCSHARE_API_KEY=...                                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/docshare/config.toml (Linux)                             │
//! │     ~/Library/Application Support/com.docshare.docshare/config.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [server]
//! url = "https://share.example.com"
//! api_key = "sk-..."
//! request_timeout_secs = 120
//!
//! [upload]
//! retries = 5
//! base_delay_ms = 400
//! max_delay_ms = 2000
//! max_chunk_concurrency = 4
//! max_asset_concurrency = 6
//!
//! [scheduler]
//! enabled = true
//! visible_min_secs = 180
//! hidden_min_secs = 600
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use docshare_core::{ChunkLimits, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_CHUNK_SIZE};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Server Settings
// =============================================================================

/// Where the share server lives and how to authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL, e.g. `https://share.example.com`.
    #[serde(default)]
    pub url: Option<String>,

    /// Sent as `X-Api-Key` on every request.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Upload Settings
// =============================================================================

/// Chunk transfer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Attempts per chunk request (including the first).
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Upper bound on in-flight chunks per asset.
    #[serde(default = "default_chunk_concurrency")]
    pub max_chunk_concurrency: usize,

    /// Upper bound on assets uploaded side by side.
    #[serde(default = "default_asset_concurrency")]
    pub max_asset_concurrency: usize,

    /// Rounds of targeted missing-chunk recovery per asset.
    #[serde(default = "default_missing_chunk_rounds")]
    pub missing_chunk_retry_limit: u32,

    /// Chunk bounds used when the server advertises none.
    #[serde(default = "default_min_chunk")]
    pub default_min_chunk_size: u64,

    #[serde(default = "default_max_chunk")]
    pub default_max_chunk_size: u64,
}

fn default_retries() -> u32 {
    5
}
fn default_base_delay() -> u64 {
    400
}
fn default_max_delay() -> u64 {
    2000
}
fn default_chunk_concurrency() -> usize {
    4
}
fn default_asset_concurrency() -> usize {
    6
}
fn default_missing_chunk_rounds() -> u32 {
    docshare_core::UPLOAD_MISSING_CHUNK_RETRY_LIMIT
}
fn default_min_chunk() -> u64 {
    DEFAULT_MIN_CHUNK_SIZE
}
fn default_max_chunk() -> u64 {
    DEFAULT_MAX_CHUNK_SIZE
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            retries: default_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_chunk_concurrency: default_chunk_concurrency(),
            max_asset_concurrency: default_asset_concurrency(),
            missing_chunk_retry_limit: default_missing_chunk_rounds(),
            default_min_chunk_size: default_min_chunk(),
            default_max_chunk_size: default_max_chunk(),
        }
    }
}

impl UploadSettings {
    /// Fallback chunk bounds for [`ChunkLimits::negotiate`].
    pub fn default_chunk_limits(&self) -> ChunkLimits {
        ChunkLimits {
            min: self.default_min_chunk_size,
            max: self.default_max_chunk_size,
        }
    }
}

// =============================================================================
// Scheduler Settings
// =============================================================================

/// Background reconciliation delays.
///
/// ```text
///            min          max
///  visible   3 min  ───►  3 h      ×1.6 per unchanged cycle
///  hidden   10 min  ───►  3 h      reset to min on change/failure
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_visible_min")]
    pub visible_min_secs: u64,

    #[serde(default = "default_range_max")]
    pub visible_max_secs: u64,

    #[serde(default = "default_hidden_min")]
    pub hidden_min_secs: u64,

    #[serde(default = "default_range_max")]
    pub hidden_max_secs: u64,

    #[serde(default = "default_growth")]
    pub growth_factor: f64,

    /// Upper bound of the random delay added to every cycle.
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_visible_min() -> u64 {
    180
}
fn default_hidden_min() -> u64 {
    600
}
fn default_range_max() -> u64 {
    3 * 60 * 60
}
fn default_growth() -> f64 {
    1.6
}
fn default_jitter() -> u64 {
    60
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            enabled: true,
            visible_min_secs: default_visible_min(),
            visible_max_secs: default_range_max(),
            hidden_min_secs: default_hidden_min(),
            hidden_max_secs: default_range_max(),
            growth_factor: default_growth(),
            jitter_secs: default_jitter(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub upload: UploadSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (config.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// Credentials are optional here; operations that need them fail with
    /// [`SyncError::MissingCredentials`] at call time.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref raw) = self.server.url {
            if !raw.starts_with("http://") && !raw.starts_with("https://") {
                return Err(SyncError::InvalidUrl(format!(
                    "Server URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
            url::Url::parse(raw)?;
        }

        if self.server.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        let upload = &self.upload;
        if upload.retries == 0 {
            return Err(SyncError::InvalidConfig("retries must be at least 1".into()));
        }
        if upload.base_delay_ms > upload.max_delay_ms {
            return Err(SyncError::InvalidConfig(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                upload.base_delay_ms, upload.max_delay_ms
            )));
        }
        if upload.max_chunk_concurrency == 0 || upload.max_asset_concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "concurrency limits must be greater than 0".into(),
            ));
        }
        upload
            .default_chunk_limits()
            .validate()
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        let scheduler = &self.scheduler;
        if scheduler.visible_min_secs > scheduler.visible_max_secs
            || scheduler.hidden_min_secs > scheduler.hidden_max_secs
        {
            return Err(SyncError::InvalidConfig(
                "scheduler minimum delay exceeds maximum".into(),
            ));
        }
        if scheduler.growth_factor.is_nan() || scheduler.growth_factor <= 1.0 {
            return Err(SyncError::InvalidConfig(
                "growth_factor must be greater than 1".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DOCSHARE_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.url = Some(url);
        }

        if let Ok(key) = std::env::var("DOCSHARE_API_KEY") {
            debug!("Overriding API key from environment");
            self.server.api_key = Some(key);
        }

        if let Ok(timeout) = std::env::var("DOCSHARE_REQUEST_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(t) => self.server.request_timeout_secs = t,
                Err(_) => warn!(value = %timeout, "Ignoring invalid DOCSHARE_REQUEST_TIMEOUT_SECS"),
            }
        }

        if let Ok(value) = std::env::var("DOCSHARE_MAX_CHUNK_CONCURRENCY") {
            if let Ok(n) = value.parse::<usize>() {
                self.upload.max_chunk_concurrency = n;
            }
        }

        if let Ok(value) = std::env::var("DOCSHARE_MAX_ASSET_CONCURRENCY") {
            if let Ok(n) = value.parse::<usize>() {
                self.upload.max_asset_concurrency = n;
            }
        }

        if let Ok(value) = std::env::var("DOCSHARE_SCHEDULER_ENABLED") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.scheduler.enabled = true,
                "0" | "false" | "no" | "off" => self.scheduler.enabled = false,
                _ => warn!(value = %value, "Unknown DOCSHARE_SCHEDULER_ENABLED value"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "docshare", "docshare")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns true if both the server URL and API key are set.
    pub fn has_credentials(&self) -> bool {
        self.server.url.as_deref().is_some_and(|u| !u.trim().is_empty())
            && self.server.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}
