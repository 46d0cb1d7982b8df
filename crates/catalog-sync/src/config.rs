use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use catalog_sync_core::mapper::known_aliases;
use catalog_sync_core::store::PruneMode;

use crate::error::ConfigError;

pub const API_KEY_ENV: &str = "CATSYNC_API_KEY";
pub const API_SECRET_ENV: &str = "CATSYNC_API_SECRET";
pub const BASE_URL_ENV: &str = "CATSYNC_BASE_URL";

/// Ten years.
pub const MAX_LOOKBACK_HOURS: i64 = 87_600;
/// Thirty days.
pub const MAX_STALE_RUN_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_records_path")]
    pub records_path: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_page_ceiling")]
    pub page_ceiling: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Field set requested from upstream. Defaults to every alias the mapper
    /// reads; empty means "let upstream decide", which also keeps unmapped
    /// fields in `raw_metadata`.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
}

fn default_records_path() -> String {
    "items".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_page_ceiling() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_page_delay_ms() -> u64 {
    200
}
fn default_fields() -> Vec<String> {
    known_aliases().into_iter().map(String::from).collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Label stored on every catalog row and run; one upstream per label.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_prune_missing")]
    pub prune_missing: PruneMode,
    #[serde(default = "default_lookback_hours")]
    pub incremental_lookback_hours: i64,
    #[serde(default = "default_stale_run_after_secs")]
    pub stale_run_after_secs: u64,
    #[serde(default = "default_max_error_summary")]
    pub max_error_summary: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            prune_missing: default_prune_missing(),
            incremental_lookback_hours: default_lookback_hours(),
            stale_run_after_secs: default_stale_run_after_secs(),
            max_error_summary: default_max_error_summary(),
        }
    }
}

fn default_source() -> String {
    "erp".to_string()
}
fn default_batch_size() -> usize {
    50
}
fn default_batch_pause_ms() -> u64 {
    100
}
fn default_prune_missing() -> PruneMode {
    PruneMode::Deactivate
}
fn default_lookback_hours() -> i64 {
    24
}
fn default_stale_run_after_secs() -> u64 {
    6 * 60 * 60
}
fn default_max_error_summary() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7350".to_string()
}

/// Upstream API credentials. Only ever read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read `CATSYNC_API_KEY` / `CATSYNC_API_SECRET`. Blank counts as missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |name: &'static str| -> Result<String, ConfigError> {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        };
        Ok(Self {
            api_key: read(API_KEY_ENV)?,
            api_secret: read(API_SECRET_ENV)?,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(url) = std::env::var(BASE_URL_ENV) {
        if !url.trim().is_empty() {
            config.upstream.base_url = url.trim().to_string();
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let base_url = &config.upstream.base_url;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::InvalidEndpoint {
            url: base_url.clone(),
            reason: "must start with http:// or https://".to_string(),
        }
        .into());
    }

    if config.upstream.page_size == 0 || config.upstream.page_size > 1000 {
        anyhow::bail!("upstream.page_size must be in [1, 1000]");
    }
    if config.upstream.page_ceiling == 0 {
        anyhow::bail!("upstream.page_ceiling must be > 0");
    }
    if config.upstream.timeout_secs == 0 {
        anyhow::bail!("upstream.timeout_secs must be > 0");
    }

    if config.sync.source.trim().is_empty() {
        anyhow::bail!("sync.source must not be empty");
    }
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }
    if !(1..=MAX_LOOKBACK_HOURS).contains(&config.sync.incremental_lookback_hours) {
        anyhow::bail!(
            "sync.incremental_lookback_hours must be in [1, {}]",
            MAX_LOOKBACK_HOURS
        );
    }
    if !(1..=MAX_STALE_RUN_SECS).contains(&config.sync.stale_run_after_secs) {
        anyhow::bail!(
            "sync.stale_run_after_secs must be in [1, {}]",
            MAX_STALE_RUN_SECS
        );
    }

    Ok(())
}
