//! Adapter backed by one tokio task per registration.
//!
//! Each registration sleeps until its instant, clears itself from the
//! registry, and sends a [`FireEvent`] on the channel handed to
//! [`TokioScheduler::new`]. Cancelling aborts the sleeping task.

use super::{FireEvent, SchedulingAdapter};
use crate::alert::AlertRecord;
use crate::error::{AlertError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Registration {
    token: u64,
    handle: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<String, Registration>>>;

/// Live-process adapter using tokio timers.
pub struct TokioScheduler {
    runtime: Handle,
    fire_tx: mpsc::UnboundedSender<FireEvent>,
    timers: Registry,
    next_token: AtomicU64,
}

impl TokioScheduler {
    /// Create an adapter on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Scheduler`] when called outside a runtime.
    pub fn new(fire_tx: mpsc::UnboundedSender<FireEvent>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AlertError::Scheduler(format!("no tokio runtime available: {e}")))?;
        Ok(Self::with_handle(runtime, fire_tx))
    }

    /// Create an adapter that spawns its timers on `runtime`.
    #[must_use]
    pub fn with_handle(runtime: Handle, fire_tx: mpsc::UnboundedSender<FireEvent>) -> Self {
        Self {
            runtime,
            fire_tx,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        }
    }

    /// Number of registrations still waiting to fire.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Returns `true` if `id` has a live registration.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        lock(&self.timers).contains_key(id)
    }
}

impl SchedulingAdapter for TokioScheduler {
    fn schedule_at(
        &self,
        at: DateTime<FixedOffset>,
        id: &str,
        record: AlertRecord,
    ) -> Result<u64> {
        if self.fire_tx.is_closed() {
            return Err(AlertError::Channel(
                "fire channel closed; cannot register timer".to_owned(),
            ));
        }

        let delay = (at.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or_default();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        // Hold the registry across spawn + insert so a zero-delay timer
        // cannot clear itself before it is recorded.
        let mut timers = lock(&self.timers);

        let registry = Arc::clone(&self.timers);
        let fire_tx = self.fire_tx.clone();
        let owned_id = id.to_owned();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut timers = lock(&registry);
                match timers.get(&owned_id) {
                    Some(live) if live.token == token => {
                        timers.remove(&owned_id);
                    }
                    _ => return,
                }
            }

            let event = FireEvent {
                id: owned_id,
                token,
                record,
            };
            if fire_tx.send(event).is_err() {
                debug!("fire channel closed before delivery");
            }
        });

        if let Some(previous) = timers.insert(id.to_owned(), Registration { token, handle }) {
            warn!(alert_id = %id, "replacing a live timer without cancel");
            previous.handle.abort();
        }
        debug!(alert_id = %id, token, delay_secs = delay.as_secs(), "timer registered");
        Ok(token)
    }

    fn cancel(&self, id: &str) {
        if let Some(registration) = lock(&self.timers).remove(id) {
            registration.handle.abort();
            debug!(alert_id = %id, "timer cancelled");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, registration) in lock(&self.timers).drain() {
            registration.handle.abort();
        }
    }
}

fn lock(
    timers: &Mutex<HashMap<String, Registration>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
    timers.lock().unwrap_or_else(|e| e.into_inner())
}
