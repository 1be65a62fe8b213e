//! Dashboard configuration.
//!
//! Stored as TOML at `~/.config/evdash/config.toml` (or XDG equivalent).
//! A missing file yields the defaults below.
//!
//! # Example Configuration
//!
//! ```toml
//! database = "/var/lib/evdash/events.db"
//! environment = "testing"
//! game_name = "The Experience"
//! events = ["gameStarted", "experienceStarted"]
//! lookback_months = 1
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analytics::query::{DEFAULT_EVENTS, DEFAULT_GAME, Environment, EventQueries};

/// Errors that can occur when loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Effective dashboard settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Path of the SQLite events database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Environment label, ASCII letters only.
    pub environment: String,
    pub game_name: String,
    /// Event names the dashboard tracks.
    pub events: Vec<String>,
    /// Trailing window for session-duration queries.
    pub lookback_months: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            database: None,
            environment: "testing".to_string(),
            game_name: DEFAULT_GAME.to_string(),
            events: DEFAULT_EVENTS.iter().map(|e| e.to_string()).collect(),
            lookback_months: 1,
        }
    }
}

impl DashboardConfig {
    /// Load configuration from the default location.
    ///
    /// Returns the defaults if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the default configuration file path.
    ///
    /// - Primary: `$XDG_CONFIG_HOME/evdash/config.toml`
    /// - Fallback: platform-specific config dir
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config).join("evdash").join("config.toml"));
        }

        dirs::config_dir()
            .map(|p| p.join("evdash").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Environment::parse(&self.environment)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.game_name.trim().is_empty() {
            return Err(ConfigError::Validation("game_name cannot be empty".into()));
        }

        if self.events.is_empty() {
            return Err(ConfigError::Validation(
                "at least one event name is required".into(),
            ));
        }

        if self.events.iter().any(|e| e.trim().is_empty()) {
            return Err(ConfigError::Validation("event names cannot be empty".into()));
        }

        if self.lookback_months == 0 {
            return Err(ConfigError::Validation(
                "lookback_months must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Build the query builders for this configuration.
    pub fn queries(&self) -> Result<EventQueries, ConfigError> {
        self.validate()?;
        let environment = Environment::parse(&self.environment)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(EventQueries {
            environment,
            game_name: self.game_name.clone(),
            events: self.events.clone(),
            lookback_months: self.lookback_months,
        })
    }
}
