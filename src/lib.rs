//! Fae alerts: lifecycle engine for alarms, timers and reminders.
//!
//! Alerts move through three sets:
//! **pending** (registered with a scheduler, waiting for their instant),
//! **active** (fired, not yet acknowledged) and
//! **missed** (fired and never acknowledged).
//!
//! # Architecture
//!
//! - **Alert model** ([`alert`]): recurrence, next-occurrence computation
//!   and the serialized record shape
//! - **Manager** ([`manager`]): the three sets, lifecycle transitions and
//!   persistence across restarts
//! - **Scheduling** ([`scheduling`]): the adapter seam, a tokio timer
//!   implementation and a manual one for deterministic tests
//! - **Host bridge** ([`host`]): newline-delimited JSON commands and
//!   `alert.expired` events over stdin/stdout

pub mod alert;
pub mod alert_dirs;
pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod scheduling;

pub use alert::{Alert, AlertBuilder, AlertKind, AlertRecord, Recurrence};
pub use config::AlertsConfig;
pub use error::{AlertError, Result};
pub use manager::{AlertManager, AlertStatus, LoadReport};
pub use scheduling::{FireEvent, ManualScheduler, SchedulingAdapter, TokioScheduler};
