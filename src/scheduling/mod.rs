//! Boundary to the external timer service.
//!
//! The manager never touches a timer directly. It registers one-shot fires
//! through a [`SchedulingAdapter`] and receives them back as [`FireEvent`]s.
//! Two adapters ship with the crate: [`TokioScheduler`] for live processes
//! and [`ManualScheduler`] for tests and hosts that drive time themselves.

pub mod manual;
pub mod tokio_timer;

pub use manual::ManualScheduler;
pub use tokio_timer::TokioScheduler;

use crate::alert::AlertRecord;
use crate::error::Result;
use chrono::{DateTime, FixedOffset};

/// A registered instant arriving, delivered once per registration.
#[derive(Debug, Clone, PartialEq)]
pub struct FireEvent {
    /// Alert id the registration was made for.
    pub id: String,
    /// Token returned by the `schedule_at` call that made the registration.
    pub token: u64,
    /// The record passed to [`SchedulingAdapter::schedule_at`].
    pub record: AlertRecord,
}

/// One-shot timer registration keyed by alert id.
///
/// Callers never register an id that is already registered without
/// cancelling it first. A fire that was already handed off when `cancel`
/// ran can still arrive; its token no longer matches the live one.
pub trait SchedulingAdapter: Send + Sync {
    /// Register a fire for `id` at `at`, carrying `record` back unchanged.
    ///
    /// Returns a token unique per adapter; the matching [`FireEvent`]
    /// carries it.
    fn schedule_at(
        &self,
        at: DateTime<FixedOffset>,
        id: &str,
        record: AlertRecord,
    ) -> Result<u64>;

    /// Drop the registration for `id` if there is one. Never fails.
    fn cancel(&self, id: &str);
}
