//! Alert lifecycle manager.
//!
//! Owns the pending, active and missed sets, registers fires with a
//! [`SchedulingAdapter`], and keeps the on-disk state in step. Every
//! mutation and every read happens under one manager-wide lock; reads hand
//! back detached copies.
//!
//! Per alert id the lifecycle is `pending -> active -> missed | dismissed`,
//! with `pending -> removed`. When a recurring alert fires, its following
//! occurrence is registered again under the same id in the same critical
//! section that moves the fired occurrence to active.

pub mod state;
pub mod store;

pub use state::{AlertSnapshot, AlertStatus};
pub use store::{AlertStore, PersistedAlerts};

use crate::alert::Alert;
use crate::clock::{Clock, SystemClock};
use crate::error::{AlertError, Result};
use crate::scheduling::{FireEvent, SchedulingAdapter};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Callback invoked once per fired occurrence, after the alert is active.
pub type ExpiredCallback = Box<dyn Fn(&Alert) + Send + Sync>;

/// Why a persisted alert was not restored at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No occurrence remains (one-shot already past, or past `end_repeat`).
    Exhausted,
    /// The persisted record could not be decoded.
    Undecodable(String),
    /// The scheduling adapter refused the registration.
    Unschedulable(String),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "no occurrence left"),
            Self::Undecodable(e) => write!(f, "undecodable record: {e}"),
            Self::Unschedulable(e) => write!(f, "scheduler refused: {e}"),
        }
    }
}

/// A persisted alert that did not make it back into pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedAlert {
    pub id: String,
    pub reason: DropReason,
}

/// Outcome of [`AlertManager::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Ids re-registered into pending.
    pub rescheduled: Vec<String>,
    /// Pending ids that lapsed during downtime and were moved to missed.
    pub lapsed: Vec<String>,
    /// Ids restored from the persisted missed set.
    pub restored_missed: Vec<String>,
    /// Alerts left out, with the reason.
    pub dropped: Vec<DroppedAlert>,
}

/// The three sets plus the token of each pending id's live registration.
#[derive(Default)]
struct LiveState {
    sets: AlertSnapshot,
    registrations: HashMap<String, u64>,
}

/// Coordinates alert state, scheduling and persistence.
pub struct AlertManager {
    state: Mutex<LiveState>,
    scheduler: Arc<dyn SchedulingAdapter>,
    store: Option<AlertStore>,
    write_through: bool,
    clock: Arc<dyn Clock>,
    on_expired: ExpiredCallback,
}

impl AlertManager {
    /// Create an in-memory manager driving `scheduler`.
    pub fn new(scheduler: Arc<dyn SchedulingAdapter>, on_expired: ExpiredCallback) -> Self {
        Self {
            state: Mutex::new(LiveState::default()),
            scheduler,
            store: None,
            write_through: true,
            clock: Arc::new(SystemClock),
            on_expired,
        }
    }

    /// Persist to `store` on load, shutdown and (by default) every change.
    pub fn with_store(mut self, store: AlertStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Toggle saving after each mutation. Load and shutdown always save.
    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register `alert` for its next occurrence and record it pending.
    ///
    /// # Errors
    ///
    /// [`AlertError::NoValidExpiration`] when the alert has no occurrence
    /// left; [`AlertError::Scheduler`] or [`AlertError::Channel`] when the
    /// adapter refuses the registration.
    pub fn add(&self, alert: Alert) -> Result<String> {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let id = self.schedule_locked(&mut state, alert, now)?;
        self.persist_locked(&state.sets);
        Ok(id)
    }

    /// Cancel and forget a pending alert. Returns `false` if `id` was not pending.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.lock_state();
        if state.sets.pending.remove(id).is_none() {
            warn!(alert_id = %id, "remove ignored: alert is not pending");
            return false;
        }
        state.registrations.remove(id);
        self.scheduler.cancel(id);
        info!(alert_id = %id, "pending alert removed");
        self.persist_locked(&state.sets);
        true
    }

    /// Current status of `id`.
    #[must_use]
    pub fn get_status(&self, id: &str) -> Option<AlertStatus> {
        self.lock_state().sets.status(id)
    }

    /// Handle a registered instant arriving.
    ///
    /// Only the live registration for `event.id` counts: an event whose
    /// token was superseded by `remove`, a re-`add` or `shutdown` is
    /// dropped, as is one whose record names another id or cannot be
    /// decoded. Otherwise the occurrence moves to active, the following
    /// occurrence is registered when there is one, state is saved, and the
    /// expiration callback runs outside the lock. Returns the fired alert.
    pub fn on_fire(&self, event: &FireEvent) -> Option<Alert> {
        let id = event.id.as_str();
        let mut alert = match Alert::from_record(&event.record) {
            Ok(alert) => alert,
            Err(e) => {
                error!(alert_id = %id, "dropping fire with undecodable record: {e}");
                return None;
            }
        };
        if alert.id() != id {
            error!(
                alert_id = %id,
                record_id = %alert.id(),
                "dropping fire whose record names another alert"
            );
            return None;
        }

        let fired = {
            let mut state = self.lock_state();
            if state.registrations.get(id) != Some(&event.token) {
                debug!(alert_id = %id, token = event.token, "ignoring stale fire");
                return None;
            }
            state.registrations.remove(id);
            if state.sets.pending.remove(id).is_none() {
                error!(alert_id = %id, "fired alert was not pending");
            }
            let fired = alert.clone();
            state.sets.active.insert(id.to_owned(), fired.clone());
            info!(alert_id = %id, name = %fired.name(), "alert expired");

            // Strictly after the occurrence that just fired.
            let after = self
                .clock
                .now()
                .max(fired.stored_expiration().with_timezone(&Utc) + Duration::seconds(1));
            if alert.next_expiration_at(after).is_some() {
                match self.schedule_locked(&mut state, alert, after) {
                    Ok(_) => {}
                    Err(AlertError::NoValidExpiration(_)) => {
                        debug!(alert_id = %id, "recurrence exhausted");
                    }
                    Err(e) => {
                        error!(alert_id = %id, "cannot schedule next occurrence: {e}");
                    }
                }
            } else {
                debug!(alert_id = %id, "no further occurrences");
            }

            self.persist_locked(&state.sets);
            fired
        };

        (self.on_expired)(&fired);
        Some(fired)
    }

    /// Move an active alert to missed. Returns `false` if `id` was not active.
    pub fn make_missed(&self, id: &str) -> bool {
        let mut state = self.lock_state();
        let Some(alert) = state.sets.active.remove(id) else {
            error!(alert_id = %id, "make_missed ignored: alert is not active");
            return false;
        };
        if state.sets.missed.insert(id.to_owned(), alert).is_some() {
            debug!(alert_id = %id, "later occurrence replaces earlier missed entry");
        }
        info!(alert_id = %id, "alert marked missed");
        self.persist_locked(&state.sets);
        true
    }

    /// Acknowledge an active alert. Returns `false` if `id` was not active.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut state = self.lock_state();
        if state.sets.active.remove(id).is_none() {
            error!(alert_id = %id, "dismiss ignored: alert is not active");
            return false;
        }
        info!(alert_id = %id, "alert dismissed");
        true
    }

    /// Forget a missed alert. Returns `false` if `id` was not missed.
    pub fn clear_missed(&self, id: &str) -> bool {
        let mut state = self.lock_state();
        if state.sets.missed.remove(id).is_none() {
            warn!(alert_id = %id, "clear_missed ignored: alert is not missed");
            return false;
        }
        self.persist_locked(&state.sets);
        true
    }

    /// Forget every missed alert. Returns how many were cleared.
    pub fn clear_all_missed(&self) -> usize {
        let mut state = self.lock_state();
        let cleared = state.sets.missed.len();
        if cleared > 0 {
            state.sets.missed.clear();
            self.persist_locked(&state.sets);
        }
        cleared
    }

    /// Copy of the pending set.
    #[must_use]
    pub fn pending(&self) -> BTreeMap<String, Alert> {
        self.lock_state().sets.pending.clone()
    }

    /// Copy of the active set.
    #[must_use]
    pub fn active(&self) -> BTreeMap<String, Alert> {
        self.lock_state().sets.active.clone()
    }

    /// Copy of the missed set.
    #[must_use]
    pub fn missed(&self) -> BTreeMap<String, Alert> {
        self.lock_state().sets.missed.clone()
    }

    /// Copy of all three sets, taken atomically.
    #[must_use]
    pub fn snapshot(&self) -> AlertSnapshot {
        self.lock_state().sets.clone()
    }

    /// Copy of the alert for `id` with its status.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<(AlertStatus, Alert)> {
        self.lock_state()
            .sets
            .get(id)
            .map(|(status, alert)| (status, alert.clone()))
    }

    /// Copies of every alert owned by `user`.
    #[must_use]
    pub fn alerts_for_user(&self, user: &str) -> Vec<(AlertStatus, Alert)> {
        self.lock_state()
            .sets
            .iter()
            .filter(|(_, alert)| alert.user() == user)
            .map(|(status, alert)| (status, alert.clone()))
            .collect()
    }

    /// Restore persisted state and re-register pending alerts.
    ///
    /// Pending alerts whose stored instant passed while the process was
    /// down become missed, once, with no catch-up of skipped occurrences.
    /// Recurring ones among them are also registered for their next future
    /// occurrence. Alerts with nothing left to fire are reported in
    /// [`LoadReport::dropped`]. Undecodable records are set aside in
    /// [`AlertStore::rejected_path`] before the state file is rewritten.
    ///
    /// # Errors
    ///
    /// [`AlertError::Persistence`] when the state file cannot be read,
    /// parsed, or rewritten, or the undecodable records cannot be set aside.
    pub fn load(&self) -> Result<LoadReport> {
        let Some(store) = &self.store else {
            return Ok(LoadReport::default());
        };
        let persisted = store.load()?;
        let now = self.clock.now();
        let mut report = LoadReport::default();
        let mut rejected = PersistedAlerts::default();

        let mut state = self.lock_state();

        for (key, record) in persisted.missed {
            match Alert::from_stored(&key, &record) {
                Ok(alert) => {
                    let id = alert.id().to_owned();
                    state.sets.missed.insert(id.clone(), alert);
                    report.restored_missed.push(id);
                }
                Err(e) => {
                    warn!(alert_id = %key, "setting aside undecodable missed alert: {e}");
                    report.dropped.push(DroppedAlert {
                        id: key.clone(),
                        reason: DropReason::Undecodable(e.to_string()),
                    });
                    rejected.missed.insert(key, record);
                }
            }
        }

        let mut candidates = Vec::new();
        for (key, record) in persisted.pending {
            let alert = match Alert::from_stored(&key, &record) {
                Ok(alert) => alert,
                Err(e) => {
                    warn!(alert_id = %key, "setting aside undecodable pending alert: {e}");
                    report.dropped.push(DroppedAlert {
                        id: key.clone(),
                        reason: DropReason::Undecodable(e.to_string()),
                    });
                    rejected.pending.insert(key, record);
                    continue;
                }
            };
            let id = alert.id().to_owned();

            if alert.is_expired_at(now) {
                info!(alert_id = %id, "alert lapsed while offline; marking missed");
                state.sets.missed.insert(id.clone(), alert.clone());
                report.lapsed.push(id.clone());
                if !alert.is_recurring() {
                    continue;
                }
            }
            candidates.push((id, alert));
        }

        for (id, alert) in candidates {
            match self.schedule_locked(&mut state, alert, now) {
                Ok(id) => report.rescheduled.push(id),
                Err(AlertError::NoValidExpiration(_)) => {
                    info!(alert_id = %id, "alert has run its course; not rescheduled");
                    report.dropped.push(DroppedAlert {
                        id,
                        reason: DropReason::Exhausted,
                    });
                }
                Err(e) => {
                    error!(alert_id = %id, "cannot reschedule persisted alert: {e}");
                    report.dropped.push(DroppedAlert {
                        id,
                        reason: DropReason::Unschedulable(e.to_string()),
                    });
                }
            }
        }

        if !rejected.missed.is_empty() || !rejected.pending.is_empty() {
            store.set_aside(&rejected)?;
        }
        store.save(&persisted_from(&state.sets))?;
        info!(
            rescheduled = report.rescheduled.len(),
            lapsed = report.lapsed.len(),
            missed = state.sets.missed.len(),
            dropped = report.dropped.len(),
            "alert state loaded from {}",
            store.path().display()
        );
        Ok(report)
    }

    /// Convert unacknowledged active alerts to missed, stop all timers, and
    /// write the final state.
    ///
    /// # Errors
    ///
    /// [`AlertError::Persistence`] when the final write fails; in-memory
    /// state has already transitioned.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.lock_state();

        let active = std::mem::take(&mut state.sets.active);
        let converted = active.len();
        for (id, alert) in active {
            state.sets.missed.insert(id, alert);
        }
        for id in state.sets.pending.keys() {
            self.scheduler.cancel(id);
        }
        state.registrations.clear();

        info!(
            pending = state.sets.pending.len(),
            missed = state.sets.missed.len(),
            converted,
            "alert manager shutting down"
        );

        match &self.store {
            Some(store) => store.save(&persisted_from(&state.sets)),
            None => Ok(()),
        }
    }

    /// Feed adapter fire events into [`AlertManager::on_fire`] until the
    /// channel closes.
    pub fn spawn_fire_loop(
        self: &Arc<Self>,
        mut fire_rx: mpsc::UnboundedReceiver<FireEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = fire_rx.recv().await {
                manager.on_fire(&event);
            }
            debug!("fire channel closed; stopping fire loop");
        })
    }

    fn schedule_locked(
        &self,
        state: &mut LiveState,
        mut alert: Alert,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let id = alert.id().to_owned();
        let Some(at) = alert.next_expiration_at(now) else {
            return Err(AlertError::NoValidExpiration(format!(
                "alert {id} has no occurrence at or after {now}"
            )));
        };

        if state.sets.pending.remove(&id).is_some() {
            debug!(alert_id = %id, "replacing pending registration");
            state.registrations.remove(&id);
            self.scheduler.cancel(&id);
        }
        let token = self.scheduler.schedule_at(at, &id, alert.to_record())?;
        state.registrations.insert(id.clone(), token);
        state.sets.pending.insert(id.clone(), alert);
        info!(alert_id = %id, at = %at, "alert scheduled");
        Ok(id)
    }

    fn persist_locked(&self, sets: &AlertSnapshot) {
        if !self.write_through {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&persisted_from(sets)) {
            error!("cannot persist alert state: {e}");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn persisted_from(sets: &AlertSnapshot) -> PersistedAlerts {
    PersistedAlerts {
        missed: sets
            .missed
            .iter()
            .map(|(id, alert)| (id.clone(), alert.to_record()))
            .collect(),
        pending: sets
            .pending
            .iter()
            .map(|(id, alert)| (id.clone(), alert.to_record()))
            .collect(),
    }
}
