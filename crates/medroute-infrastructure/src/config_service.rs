//! Configuration service implementation.
//!
//! Loads [`EngineConfig`] from `config.toml` (`~/.config/medroute/config.toml`
//! by default), then applies environment overrides.

use crate::paths::MedroutePaths;
use medroute_core::config::EngineConfig;
use medroute_core::error::{MedrouteError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Environment variables that override file values.
pub const ENV_RELEVANCE_THRESHOLD: &str = "SESSION_RELEVANCE_THRESHOLD";
pub const ENV_MAX_MEMORY_SESSIONS: &str = "MEDROUTE_MAX_MEMORY_SESSIONS";
pub const ENV_MAX_AGE_DAYS: &str = "MEDROUTE_MAX_AGE_DAYS";
pub const ENV_VECTOR_FIELD: &str = "AZURE_SEARCH_VECTOR_FIELD";

/// Configuration service that loads and caches the engine configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    path: Option<PathBuf>,
    /// Cached configuration loaded from file.
    config: Arc<RwLock<Option<EngineConfig>>>,
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigService {
    /// Creates a service reading the default config file location.
    pub fn new() -> Self {
        Self {
            path: MedroutePaths::config_file().ok(),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Creates a service reading `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading it on first access.
    ///
    /// A missing or unreadable file yields defaults (plus env overrides).
    pub fn get_config(&self) -> EngineConfig {
        {
            let read_lock = self.config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(ref cached) = *read_lock {
                return cached.clone();
            }
        }

        let mut loaded = match &self.path {
            Some(path) => Self::load_file(path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "Falling back to default config: {}", e);
                EngineConfig::default()
            }),
            None => EngineConfig::default(),
        };
        apply_env_overrides(&mut loaded, |name| std::env::var(name).ok());

        let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = Some(loaded.clone());
        loaded
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = None;
    }

    /// Reads a config file. A missing file is not an error.
    pub fn load_file(path: &Path) -> Result<EngineConfig> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &EngineConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&config.relevance_threshold) {
        return Err(MedrouteError::config(format!(
            "relevance_threshold must be within [0, 1], got {}",
            config.relevance_threshold
        )));
    }
    if config.retry.max_attempts == 0 {
        return Err(MedrouteError::config("retry.max_attempts must be at least 1"));
    }
    if !config.retry.multiplier.is_finite() || config.retry.multiplier < 1.0 {
        return Err(MedrouteError::config(format!(
            "retry.multiplier must be a finite number of at least 1, got {}",
            config.retry.multiplier
        )));
    }
    if config.retry.max_delay_ms == 0 {
        return Err(MedrouteError::config("retry.max_delay_ms must be at least 1"));
    }
    Ok(())
}

/// Applies environment overrides through `lookup`.
///
/// Values that fail to parse are ignored with a warning.
pub fn apply_env_overrides(config: &mut EngineConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(ENV_RELEVANCE_THRESHOLD) {
        match raw.trim().parse::<f64>() {
            Ok(value) if (0.0..=1.0).contains(&value) => config.relevance_threshold = value,
            _ => tracing::warn!(value = %raw, "Ignoring invalid {}", ENV_RELEVANCE_THRESHOLD),
        }
    }
    if let Some(raw) = lookup(ENV_MAX_MEMORY_SESSIONS) {
        match raw.trim().parse::<usize>() {
            Ok(value) => config.max_memory_sessions = value,
            Err(_) => tracing::warn!(value = %raw, "Ignoring invalid {}", ENV_MAX_MEMORY_SESSIONS),
        }
    }
    if let Some(raw) = lookup(ENV_MAX_AGE_DAYS) {
        match raw.trim().parse::<u32>() {
            Ok(value) => config.max_age_days = value,
            Err(_) => tracing::warn!(value = %raw, "Ignoring invalid {}", ENV_MAX_AGE_DAYS),
        }
    }
    if let Some(raw) = lookup(ENV_VECTOR_FIELD) {
        let raw = raw.trim();
        if !raw.is_empty() {
            config.vector_field = raw.to_string();
        }
    }
}
