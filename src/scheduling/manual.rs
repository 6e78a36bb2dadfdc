//! In-memory adapter fired explicitly by the caller.

use super::{FireEvent, SchedulingAdapter};
use crate::alert::AlertRecord;
use crate::error::Result;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Registration {
    at: DateTime<FixedOffset>,
    token: u64,
    record: AlertRecord,
}

#[derive(Debug, Default)]
struct Registry {
    entries: BTreeMap<String, Registration>,
    scheduled_total: usize,
    cancelled_total: usize,
    last_token: u64,
}

/// Adapter that records registrations and fires them only on request.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    registry: Mutex<Registry>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instant registered for `id`, if any.
    #[must_use]
    pub fn registered_at(&self, id: &str) -> Option<DateTime<FixedOffset>> {
        self.lock().entries.get(id).map(|entry| entry.at)
    }

    /// Ids with a live registration, in id order.
    #[must_use]
    pub fn registered_ids(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total `schedule_at` calls accepted so far.
    #[must_use]
    pub fn scheduled_total(&self) -> usize {
        self.lock().scheduled_total
    }

    /// Total `cancel` calls that removed a registration.
    #[must_use]
    pub fn cancelled_total(&self) -> usize {
        self.lock().cancelled_total
    }

    /// Remove and return every registration due at `now`, earliest first.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<FireEvent> {
        let mut registry = self.lock();
        let due_ids: Vec<String> = registry
            .entries
            .iter()
            .filter(|(_, entry)| entry.at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut due: Vec<(DateTime<FixedOffset>, FireEvent)> = due_ids
            .into_iter()
            .filter_map(|id| {
                registry.entries.remove(&id).map(|entry| {
                    (
                        entry.at,
                        FireEvent {
                            id,
                            token: entry.token,
                            record: entry.record,
                        },
                    )
                })
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));
        due.into_iter().map(|(_, event)| event).collect()
    }

    /// Remove and return the registration for `id` regardless of its instant.
    pub fn take(&self, id: &str) -> Option<FireEvent> {
        self.lock().entries.remove(id).map(|entry| FireEvent {
            id: id.to_owned(),
            token: entry.token,
            record: entry.record,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SchedulingAdapter for ManualScheduler {
    fn schedule_at(
        &self,
        at: DateTime<FixedOffset>,
        id: &str,
        record: AlertRecord,
    ) -> Result<u64> {
        let mut registry = self.lock();
        if registry.entries.contains_key(id) {
            tracing::warn!(alert_id = %id, "replacing a live registration without cancel");
        }
        registry.last_token += 1;
        let token = registry.last_token;
        registry
            .entries
            .insert(id.to_owned(), Registration { at, token, record });
        registry.scheduled_total += 1;
        Ok(token)
    }

    fn cancel(&self, id: &str) {
        let mut registry = self.lock();
        if registry.entries.remove(id).is_some() {
            registry.cancelled_total += 1;
        }
    }
}
