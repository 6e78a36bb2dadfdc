//! The three alert state sets and their status lookup.

use crate::alert::Alert;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which state set an alert is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Registered with the scheduler, not yet due.
    Pending,
    /// Fired and awaiting disposition.
    Active,
    /// Fired but never acknowledged, or lapsed during downtime.
    Missed,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Missed => write!(f, "missed"),
        }
    }
}

/// Pending, active and missed alerts keyed by id.
///
/// Returned by the manager as a detached copy; mutating it never affects
/// the manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertSnapshot {
    pub pending: BTreeMap<String, Alert>,
    pub active: BTreeMap<String, Alert>,
    pub missed: BTreeMap<String, Alert>,
}

impl AlertSnapshot {
    /// Status of `id`, checking active, then missed, then pending.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<AlertStatus> {
        if self.active.contains_key(id) {
            Some(AlertStatus::Active)
        } else if self.missed.contains_key(id) {
            Some(AlertStatus::Missed)
        } else if self.pending.contains_key(id) {
            Some(AlertStatus::Pending)
        } else {
            None
        }
    }

    /// The alert for `id` in the set [`AlertSnapshot::status`] reports.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<(AlertStatus, &Alert)> {
        self.active
            .get(id)
            .map(|a| (AlertStatus::Active, a))
            .or_else(|| self.missed.get(id).map(|a| (AlertStatus::Missed, a)))
            .or_else(|| self.pending.get(id).map(|a| (AlertStatus::Pending, a)))
    }

    /// Every set that currently holds `id`.
    #[must_use]
    pub fn memberships(&self, id: &str) -> Vec<AlertStatus> {
        let mut found = Vec::new();
        if self.pending.contains_key(id) {
            found.push(AlertStatus::Pending);
        }
        if self.active.contains_key(id) {
            found.push(AlertStatus::Active);
        }
        if self.missed.contains_key(id) {
            found.push(AlertStatus::Missed);
        }
        found
    }

    /// All entries with their status, in set then id order.
    pub fn iter(&self) -> impl Iterator<Item = (AlertStatus, &Alert)> {
        self.pending
            .values()
            .map(|a| (AlertStatus::Pending, a))
            .chain(self.active.values().map(|a| (AlertStatus::Active, a)))
            .chain(self.missed.values().map(|a| (AlertStatus::Missed, a)))
    }

    /// Total entries across all sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len() + self.active.len() + self.missed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
