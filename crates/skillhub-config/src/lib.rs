//! # skillhub-config
//!
//! TOML-backed configuration for the federation core: the proxy HTTP
//! client timeout and negative-cache TTL, the `proxy_sync` worker's
//! dynamic knobs, and the rate limiter's per-(scope, kind) limits.
//!
//! Shaped after the teacher's `ShipperConfig` (`serde` defaults, a
//! `validate()` pass, `load_from_file`): one `SkillHubConfig` struct with
//! nested tables, each field individually defaulted so a config file only
//! needs to mention what it overrides.
//!
//! The sync worker re-reads its knobs every tick (spec §4.7), so this
//! crate also exposes a small [`ConfigProvider`] trait — a `current()`
//! snapshot — rather than handing the worker a raw file path, matching
//! the spec's "Config Provider" component boundary.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skillhub_ratelimit::RateLimitConfig;
use skillhub_types::ProxySyncConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `[proxy]` — the HTTP client timeout and negative-cache TTL used by the
/// proxy fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub negative_ttl: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            negative_ttl: Duration::from_secs(300),
        }
    }
}

/// `[proxy_sync]` — the sync worker's dynamic knobs, re-read every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySyncFileConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub startup_delay: Duration,
    pub page_size: u32,
    pub concurrency: u32,
}

impl Default for ProxySyncFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3600),
            startup_delay: Duration::from_secs(10),
            page_size: 100,
            concurrency: 4,
        }
    }
}

impl ProxySyncFileConfig {
    pub fn to_domain(&self) -> ProxySyncConfig {
        ProxySyncConfig {
            enabled: self.enabled,
            interval: self.interval,
            startup_delay: self.startup_delay,
            page_size: self.page_size,
            concurrency: self.concurrency,
        }
        .normalized()
    }
}

/// `[rate_limit]` — defaults match the spec exactly: `1 min / 120 / 600 /
/// 30 / 120`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitFileConfig {
    pub window_secs: u64,
    pub read_ip: u64,
    pub read_key: u64,
    pub write_ip: u64,
    pub write_key: u64,
}

impl Default for RateLimitFileConfig {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            window_secs: defaults.window_secs,
            read_ip: defaults.read_ip,
            read_key: defaults.read_key,
            write_ip: defaults.write_ip,
            write_key: defaults.write_key,
        }
    }
}

impl RateLimitFileConfig {
    pub fn to_domain(&self) -> RateLimitConfig {
        RateLimitConfig {
            window_secs: self.window_secs,
            read_ip: self.read_ip,
            read_key: self.read_key,
            write_ip: self.write_ip,
            write_key: self.write_key,
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SkillHubConfig {
    pub proxy: ProxyConfig,
    pub proxy_sync: ProxySyncFileConfig,
    pub rate_limit: RateLimitFileConfig,
}

impl SkillHubConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "proxy.timeout must be greater than 0".to_string(),
            ));
        }
        if self.proxy.negative_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "proxy.negative_ttl must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot read by the sync worker and the admission path. The worker
/// calls [`ConfigProvider::proxy_sync`] once per tick (spec §4.7: "on each
/// tick, re-read config") rather than caching the value across ticks.
pub trait ConfigProvider: Send + Sync {
    fn proxy_sync(&self) -> ProxySyncConfig;
    fn proxy(&self) -> ProxyConfig;
    fn rate_limit(&self) -> RateLimitConfig;
}

/// A [`ConfigProvider`] backed by an in-memory, reloadable
/// [`SkillHubConfig`]. `reload` re-reads the backing file and swaps the
/// snapshot under a single `RwLock`, so a running sync worker observes the
/// new knobs on its next tick without restarting.
pub struct FileConfigProvider {
    path: Option<std::path::PathBuf>,
    current: RwLock<SkillHubConfig>,
}

impl FileConfigProvider {
    pub fn from_config(config: SkillHubConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(config),
        }
    }

    pub fn load(path: impl Into<std::path::PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = SkillHubConfig::load_from_file(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(config),
        })
    }

    /// Re-reads the backing file (a no-op if this provider was constructed
    /// from an in-memory config rather than a path) and swaps the
    /// snapshot.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let config = SkillHubConfig::load_from_file(path)?;
        *self
            .current
            .write()
            .expect("config provider rwlock poisoned") = config;
        Ok(())
    }
}

impl ConfigProvider for FileConfigProvider {
    fn proxy_sync(&self) -> ProxySyncConfig {
        self.current
            .read()
            .expect("config provider rwlock poisoned")
            .proxy_sync
            .to_domain()
    }

    fn proxy(&self) -> ProxyConfig {
        self.current
            .read()
            .expect("config provider rwlock poisoned")
            .proxy
            .clone()
    }

    fn rate_limit(&self) -> RateLimitConfig {
        self.current
            .read()
            .expect("config provider rwlock poisoned")
            .rate_limit
            .to_domain()
    }
}
