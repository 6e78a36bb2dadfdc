//! On-disk alert state.
//!
//! The state file is a JSON object with exactly two keys, `missed` and
//! `pending`, each mapping alert id to its [`AlertRecord`]. Active alerts
//! are never written. Saves go through a temp file and a rename so a crash
//! mid-write leaves the previous state intact.
//!
//! Records that a load could not decode are set aside in a sibling
//! `<name>.rejected.json` file of the same shape before the state file is
//! rewritten without them.

use crate::alert::AlertRecord;
use crate::error::{AlertError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted pending and missed alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedAlerts {
    #[serde(default)]
    pub missed: BTreeMap<String, AlertRecord>,
    #[serde(default)]
    pub pending: BTreeMap<String, AlertRecord>,
}

/// File-backed alert state store.
#[derive(Debug, Clone)]
pub struct AlertStore {
    path: PathBuf,
}

impl AlertStore {
    /// Store bound to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform default location.
    #[must_use]
    pub fn at_default_path() -> Self {
        Self::new(crate::alert_dirs::alerts_state_file())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file. A missing file is an empty state.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Persistence`] when the file exists but cannot
    /// be read or parsed.
    pub fn load(&self) -> Result<PersistedAlerts> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no alert state at {}", self.path.display());
                return Ok(PersistedAlerts::default());
            }
            Err(e) => {
                return Err(AlertError::Persistence(format!(
                    "cannot read alert state {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            AlertError::Persistence(format!(
                "cannot parse alert state {}: {e}",
                self.path.display()
            ))
        })
    }

    /// Atomically replace the state file.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Persistence`] when the directory, temp file or
    /// rename fails.
    pub fn save(&self, state: &PersistedAlerts) -> Result<()> {
        write_atomic(&self.path, state)
    }

    /// Sidecar holding records a load could not decode.
    #[must_use]
    pub fn rejected_path(&self) -> PathBuf {
        self.path.with_extension("rejected.json")
    }

    /// Merge `rejected` into the sidecar file, keeping earlier entries
    /// unless the same id is rejected again.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Persistence`] when the existing sidecar cannot
    /// be parsed or the new one cannot be written.
    pub fn set_aside(&self, rejected: &PersistedAlerts) -> Result<()> {
        let path = self.rejected_path();
        let mut merged = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<PersistedAlerts>(&bytes).map_err(|e| {
                AlertError::Persistence(format!(
                    "cannot parse rejected alerts {}: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedAlerts::default(),
            Err(e) => {
                return Err(AlertError::Persistence(format!(
                    "cannot read rejected alerts {}: {e}",
                    path.display()
                )));
            }
        };
        merged.missed.extend(
            rejected
                .missed
                .iter()
                .map(|(id, record)| (id.clone(), record.clone())),
        );
        merged.pending.extend(
            rejected
                .pending
                .iter()
                .map(|(id, record)| (id.clone(), record.clone())),
        );
        write_atomic(&path, &merged)?;
        warn!(
            missed = rejected.missed.len(),
            pending = rejected.pending.len(),
            "undecodable alerts set aside in {}",
            path.display()
        );
        Ok(())
    }

    /// Delete the state file if present.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AlertError::Persistence(format!(
                "cannot delete alert state: {e}"
            ))),
        }
    }
}

fn write_atomic(path: &Path, state: &PersistedAlerts) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AlertError::Persistence(format!("cannot create alert state dir: {e}")))?;
    }

    let json = serde_json::to_vec_pretty(state)
        .map_err(|e| AlertError::Persistence(format!("cannot serialize alert state: {e}")))?;

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)
        .map_err(|e| AlertError::Persistence(format!("cannot write alert state: {e}")))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| AlertError::Persistence(format!("cannot finalize alert state: {e}")))?;
    Ok(())
}
