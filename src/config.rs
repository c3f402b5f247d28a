//! Configuration loading
//!
//! Handles loading configuration from defaults, a TOML file, and environment
//! variables, merged in that order with Figment.

use crate::budget::BudgetConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{Error, Result};
use crate::router::RouterConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable prefix (e.g. `AI_ROUTER_ROUTER__PRIMARY`)
const CONFIG_ENV_PREFIX: &str = "AI_ROUTER";

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub router: RouterConfig,
    pub budget: BudgetConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Configuration loader service
#[derive(Clone, Default)]
pub struct ConfigLoader {
    /// Configuration file path
    config_path: Option<PathBuf>,

    /// Environment prefix
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration file path
    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the environment variable prefix
    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Load configuration from all sources
    ///
    /// Sources are merged in this order (later sources override earlier):
    /// 1. Default values from `AppConfig::default()`
    /// 2. TOML configuration file (if it exists)
    /// 3. Environment variables with prefix; a double underscore separates
    ///    nesting levels (e.g. `AI_ROUTER_ROUTER__PRIMARY`,
    ///    `AI_ROUTER_BUDGET__MONTHLY_BUDGET_USD`)
    pub fn load(&self) -> Result<AppConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if let Some(config_path) = &self.config_path {
            if config_path.exists() {
                figment = figment.merge(Toml::file(config_path));
                info!(path = %config_path.display(), "configuration file loaded");
            } else {
                debug!(path = %config_path.display(), "configuration file not found, using defaults");
            }
        }

        let prefix = self
            .env_prefix
            .clone()
            .unwrap_or_else(|| CONFIG_ENV_PREFIX.to_string());
        figment = figment.merge(Env::prefixed(&format!("{prefix}_")).split("__"));

        let config: AppConfig = figment
            .extract()
            .map_err(|e| Error::config(format!("failed to extract configuration: {e}")))?;

        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, config: &AppConfig, path: P) -> Result<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| Error::config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| Error::config(format!("failed to write config file: {e}")))?;
        Ok(())
    }
}

/// Validate loaded configuration values
fn validate_config(config: &AppConfig) -> Result<()> {
    if config.router.primary.is_empty() {
        return Err(Error::config("router.primary cannot be empty"));
    }
    if config.router.fallback.as_deref() == Some(config.router.primary.as_str()) {
        return Err(Error::config(
            "router.fallback must differ from router.primary",
        ));
    }
    if config.router.timeout_ms == 0 {
        return Err(Error::config("router.timeout_ms must be positive"));
    }
    if config.circuit_breaker.failure_threshold == 0 {
        return Err(Error::config(
            "circuit_breaker.failure_threshold must be positive",
        ));
    }
    if config.circuit_breaker.success_threshold == 0 {
        return Err(Error::config(
            "circuit_breaker.success_threshold must be positive",
        ));
    }
    if config.circuit_breaker.reset_timeout_ms == 0 {
        return Err(Error::config(
            "circuit_breaker.reset_timeout_ms must be positive",
        ));
    }
    if config.budget.monthly_budget_usd < 0.0 {
        return Err(Error::config("budget.monthly_budget_usd cannot be negative"));
    }
    if config.budget.alert_threshold <= 0.0 {
        return Err(Error::config("budget.alert_threshold must be positive"));
    }
    Ok(())
}
