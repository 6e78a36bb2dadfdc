//! Configuration for the alert service.

use crate::alert::{DEFAULT_PRIORITY, DEFAULT_USER};
use crate::manager::AlertStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Persisted state settings.
    pub store: StoreConfig,
    /// Defaults applied to alerts created through the host bridge.
    pub alerts: AlertDefaults,
    /// Log filter settings.
    pub logging: LoggingConfig,
}

/// Where and how alert state is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// State file path (None = `alert_dirs::alerts_state_file()`).
    pub state_file: Option<PathBuf>,
    /// Save after every mutation, not only at shutdown.
    pub write_through: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            write_through: true,
        }
    }
}

impl StoreConfig {
    /// The resolved state file path.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(crate::alert_dirs::alerts_state_file)
    }

    /// A store bound to [`StoreConfig::state_path`].
    #[must_use]
    pub fn open(&self) -> AlertStore {
        AlertStore::new(self.state_path())
    }
}

/// Defaults for new alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertDefaults {
    /// Priority when a request does not set one (1-10).
    pub priority: u8,
    /// User recorded when a request does not name one.
    pub user: String,
}

impl Default for AlertDefaults {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            user: DEFAULT_USER.to_owned(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
        }
    }
}

impl AlertsConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value is out of range.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::AlertError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise use defaults.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AlertError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::alert_dirs::config_file()
    }

    fn validate(&self) -> crate::error::Result<()> {
        if !(1..=10).contains(&self.alerts.priority) {
            return Err(crate::error::AlertError::Config(format!(
                "alerts.priority {} is outside 1-10",
                self.alerts.priority
            )));
        }
        if self.alerts.user.trim().is_empty() {
            return Err(crate::error::AlertError::Config(
                "alerts.user must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}
