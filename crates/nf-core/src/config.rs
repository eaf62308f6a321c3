//! Environment Configuration Loader
//!
//! Loads environment variables from the canonical location:
//! `/etc/nodeforge/environment`, then builds the typed [`EngineConfig`] that
//! every nodeforge component is constructed from.
//!
//! ## Usage
//!
//! Call `load_environment()` early in main() before reading any config:
//!
//! ```rust
//! use nf_core::config::{load_environment, EngineConfig};
//!
//! load_environment();
//! let config = EngineConfig::from_env().expect("valid configuration");
//! assert!(config.lazy_load.max_cache_size > 0);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/nodeforge/environment";

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/nodeforge/environment", "/etc/nodeforge.env", ".env"];

/// Load environment variables from the canonical configuration file.
///
/// This function:
/// 1. Checks `NF_ENV_FILE` if set
/// 2. Checks `/etc/nodeforge/environment` (system-wide)
/// 3. Falls back to `.env` in current directory (development)
///
/// Existing environment variables are never overridden. Returns the path that
/// was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("NF_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                        let shown = if key.contains("KEY") || key.contains("TOKEN") {
                            "***"
                        } else {
                            value.as_str()
                        };
                        debug!("Loaded: {}={}", key, shown);
                    } else {
                        skipped_count += 1;
                        debug!("Skipped (already set): {}", key);
                    }
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );

            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse a single environment line into key-value pair.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    // KEY=VALUE, KEY="VALUE", KEY='VALUE'
    let mut parts = line.splitn(2, '=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get a configuration value with a default.
pub fn get_config(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an optional configuration value.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a boolean configuration value.
pub fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

/// Get an integer configuration value.
pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get a float configuration value.
pub fn get_config_float(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_config_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(get_config_int(key, default as i64).max(0) as u64)
}

fn get_config_usize(key: &str, default: usize) -> usize {
    get_config_int(key, default as i64).max(0) as usize
}

/// Whether cache entries are refreshed proactively or only on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WarmingStrategy {
    #[default]
    Lazy,
    Eager,
}

impl std::str::FromStr for WarmingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lazy" => Ok(WarmingStrategy::Lazy),
            "eager" => Ok(WarmingStrategy::Eager),
            other => Err(Error::config(format!("unknown warming strategy '{}'", other))),
        }
    }
}

impl std::fmt::Display for WarmingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarmingStrategy::Lazy => write!(f, "lazy"),
            WarmingStrategy::Eager => write!(f, "eager"),
        }
    }
}

/// Discovery cache settings
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// TTL applied when a write does not override it
    pub default_ttl: Duration,
    /// Maximum resident records across all resource classes
    pub max_size: usize,
    /// Run the maintenance task (cleanup, and refresh under eager warming)
    pub background_refresh: bool,
    pub warming_strategy: WarmingStrategy,
    /// Period of the maintenance task
    pub cleanup_interval: Duration,
    /// Fraction of a record's TTL before expiry in which eager warming re-fetches it
    pub refresh_ahead_ratio: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_size: 1000,
            background_refresh: true,
            warming_strategy: WarmingStrategy::Lazy,
            cleanup_interval: Duration::from_secs(300),
            refresh_ahead_ratio: 0.2,
        }
    }
}

/// Tier-2 (materialized tool) cache settings
#[derive(Debug, Clone)]
pub struct LazyLoadSettings {
    pub max_cache_size: usize,
    /// Fraction of `max_cache_size` above which a load triggers cleanup
    pub cleanup_threshold: f64,
    /// Fraction of `max_cache_size` removed per cleanup
    pub eviction_fraction: f64,
}

impl Default for LazyLoadSettings {
    fn default() -> Self {
        Self {
            max_cache_size: 1000,
            cleanup_threshold: 0.8,
            eviction_fraction: 0.2,
        }
    }
}

/// Schema generation settings
#[derive(Debug, Clone)]
pub struct SchemaSettings {
    pub token_optimized: bool,
    pub include_optional: bool,
    pub max_depth: usize,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            token_optimized: false,
            include_optional: true,
            max_depth: 3,
        }
    }
}

/// Remote automation engine connection settings
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5678".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache: CacheSettings,
    pub lazy_load: LazyLoadSettings,
    pub schema: SchemaSettings,
    pub source: SourceSettings,
    /// TTL for memoized tool selections, usually shorter than discovery data
    pub selection_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            lazy_load: LazyLoadSettings::default(),
            schema: SchemaSettings::default(),
            source: SourceSettings::default(),
            selection_ttl: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Build the configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();

        let warming_strategy = match get_config_opt("NF_CACHE_WARMING_STRATEGY") {
            Some(value) => value.parse()?,
            None => defaults.cache.warming_strategy,
        };

        let config = Self {
            cache: CacheSettings {
                default_ttl: get_config_secs("NF_CACHE_DEFAULT_TTL_SECS", 3600),
                max_size: get_config_usize("NF_CACHE_MAX_SIZE", defaults.cache.max_size),
                background_refresh: get_config_bool(
                    "NF_CACHE_BACKGROUND_REFRESH",
                    defaults.cache.background_refresh,
                ),
                warming_strategy,
                cleanup_interval: get_config_secs("NF_CACHE_CLEANUP_INTERVAL_SECS", 300),
                refresh_ahead_ratio: get_config_float(
                    "NF_CACHE_REFRESH_AHEAD_RATIO",
                    defaults.cache.refresh_ahead_ratio,
                ),
            },
            lazy_load: LazyLoadSettings {
                max_cache_size: get_config_usize(
                    "NF_LAZY_MAX_CACHE_SIZE",
                    defaults.lazy_load.max_cache_size,
                ),
                cleanup_threshold: get_config_float(
                    "NF_LAZY_CLEANUP_THRESHOLD",
                    defaults.lazy_load.cleanup_threshold,
                ),
                eviction_fraction: defaults.lazy_load.eviction_fraction,
            },
            schema: SchemaSettings {
                token_optimized: get_config_bool(
                    "NF_SCHEMA_TOKEN_OPTIMIZED",
                    defaults.schema.token_optimized,
                ),
                include_optional: get_config_bool(
                    "NF_SCHEMA_INCLUDE_OPTIONAL",
                    defaults.schema.include_optional,
                ),
                max_depth: get_config_usize("NF_SCHEMA_MAX_DEPTH", defaults.schema.max_depth),
            },
            source: SourceSettings {
                base_url: get_config("N8N_API_URL", &defaults.source.base_url),
                api_key: get_config_opt("N8N_API_KEY"),
                timeout: get_config_secs("NF_SOURCE_TIMEOUT_SECS", 30),
                max_retries: get_config_int("NF_SOURCE_MAX_RETRIES", 3).max(0) as u32,
            },
            selection_ttl: get_config_secs("NF_SELECTION_TTL_SECS", 300),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the caches unusable
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(Error::config("cache max_size must be greater than zero"));
        }
        if self.cache.default_ttl.is_zero() || self.selection_ttl.is_zero() {
            return Err(Error::config("cache TTLs must be greater than zero"));
        }
        if self.cache.cleanup_interval.is_zero() {
            return Err(Error::config("cleanup_interval must be greater than zero"));
        }
        if !(0.0..1.0).contains(&self.cache.refresh_ahead_ratio) {
            return Err(Error::config("refresh_ahead_ratio must be in [0, 1)"));
        }
        if self.lazy_load.max_cache_size == 0 {
            return Err(Error::config("lazy-load max_cache_size must be greater than zero"));
        }
        let threshold = self.lazy_load.cleanup_threshold;
        if threshold.is_nan() || threshold <= 0.0 || threshold > 1.0 {
            return Err(Error::config("cleanup_threshold must be in (0, 1]"));
        }
        let fraction = self.lazy_load.eviction_fraction;
        if fraction.is_nan() || fraction <= 0.0 || fraction > 1.0 {
            return Err(Error::config("eviction_fraction must be in (0, 1]"));
        }
        Ok(())
    }
}
