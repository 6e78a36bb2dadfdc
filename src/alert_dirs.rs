//! Centralized filesystem paths for the alert service.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Config | `~/Library/Application Support/fae-alerts/` | `~/.config/fae-alerts/` |
//! | Data | `~/Library/Application Support/fae-alerts/` | `~/.local/share/fae-alerts/` |
//!
//! # Environment Overrides
//!
//! - `FAE_ALERTS_CONFIG_DIR` overrides [`config_dir`]
//! - `FAE_ALERTS_DATA_DIR` overrides [`data_dir`]

use std::path::PathBuf;

const APP_DIR: &str = "fae-alerts";

/// Application config directory, holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FAE_ALERTS_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/fae-alerts-config"))
}

/// Application data directory, holding persisted alert state.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FAE_ALERTS_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/fae-alerts-data"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Persisted alert state (`data_dir()/alerts.json`).
#[must_use]
pub fn alerts_state_file() -> PathBuf {
    data_dir().join("alerts.json")
}
