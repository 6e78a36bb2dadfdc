//! Shared helpers for integration tests.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use fae_alerts::Alert;
use fae_alerts::clock::{Clock, ManualClock};
use fae_alerts::manager::{AlertManager, AlertStore};
use fae_alerts::scheduling::ManualScheduler;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed starting instant shared by the restart scenarios.
pub(crate) fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T08:00:00+00:00")
        .expect("valid instant")
        .with_timezone(&Utc)
}

pub(crate) fn at(offset: Duration) -> DateTime<FixedOffset> {
    (t0() + offset).fixed_offset()
}

/// One manager "process" over a shared state file.
pub(crate) struct Process {
    pub manager: AlertManager,
    pub scheduler: Arc<ManualScheduler>,
    pub clock: Arc<ManualClock>,
    pub fired: Arc<AtomicUsize>,
}

impl Process {
    /// Start a manager whose clock reads `now`, persisting to `store`.
    pub(crate) fn start(store: &AlertStore, now: DateTime<Utc>) -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let clock = Arc::new(ManualClock::new(now));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let manager = AlertManager::new(
            scheduler.clone(),
            Box::new(move |_: &Alert| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .with_store(store.clone())
        .with_clock(clock.clone());
        Self {
            manager,
            scheduler,
            clock,
            fired,
        }
    }

    /// Deliver every registration due at the current clock reading.
    pub(crate) fn fire_due(&self) -> usize {
        let events = self.scheduler.fire_due(self.clock.now());
        let count = events.len();
        for event in events {
            self.manager.on_fire(&event);
        }
        count
    }

    pub(crate) fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Read the state file as raw JSON.
pub(crate) fn raw_state(store: &AlertStore) -> serde_json::Value {
    let bytes = std::fs::read(store.path()).expect("read state file");
    serde_json::from_slice(&bytes).expect("parse state file")
}
