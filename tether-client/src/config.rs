//! Configuration loading for the tether client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tether_cache::CacheConfig;
use tether_core::{ConfigError, ResourceClass};
use tether_session::RefreshPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TetherConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub session_path: PathBuf,
    pub login_route: String,
    pub refresh: RefreshConfig,
    pub cache: CacheSection,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    pub threshold_secs: u64,
    pub min_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    pub default_stale_after_ms: u64,
    /// Optional per-class overrides, keyed by resource class name.
    #[serde(default)]
    pub stale_after_ms: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub filter: String,
    pub json: bool,
}

impl TetherConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TetherConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.api_base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.session_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "session_path",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.login_route.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "login_route",
                reason: "must start with '/'".to_string(),
            });
        }
        if self.refresh.threshold_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "refresh.threshold_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.refresh.min_delay_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "refresh.min_delay_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.default_stale_after_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.default_stale_after_ms",
                reason: "must be > 0".to_string(),
            });
        }
        for (class, stale_after_ms) in &self.cache.stale_after_ms {
            if ResourceClass::parse(class).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "cache.stale_after_ms",
                    reason: format!("unknown resource class '{}'", class),
                });
            }
            if *stale_after_ms == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "cache.stale_after_ms",
                    reason: format!("'{}' must be > 0", class),
                });
            }
        }
        if self.log.filter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "log.filter",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::new()
            .with_threshold(Duration::from_secs(self.refresh.threshold_secs))
            .with_min_delay(Duration::from_secs(self.refresh.min_delay_secs))
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.cache.stale_after_ms.iter().fold(
            CacheConfig::new().with_stale_after(Duration::from_millis(
                self.cache.default_stale_after_ms,
            )),
            |config, (class, ms)| match ResourceClass::parse(class) {
                Some(class) => config.with_class_stale_after(class, Duration::from_millis(*ms)),
                None => config,
            },
        )
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("TETHER_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
