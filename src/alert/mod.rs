//! Alert records and their recurrence cursor.
//!
//! An [`Alert`] is immutable apart from its next-expiration cursor, which
//! [`Alert::next_expiration_at`] advances lazily through the alert's
//! [`Recurrence`]. All instants carry a UTC offset and whole-second
//! precision.

pub mod record;
pub mod recurrence;

pub use record::AlertRecord;
pub use recurrence::Recurrence;

use crate::error::{AlertError, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved context key holding the alert id.
pub const ALERT_ID_KEY: &str = "ident";

/// Reserved context key holding the owning user.
pub const USER_KEY: &str = "user";

/// User assumed when the context names none.
pub const DEFAULT_USER: &str = "local";

/// Priority given to alerts that do not set one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// What kind of alert this is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Alarm,
    Timer,
    Reminder,
    #[default]
    Unknown,
}

impl AlertKind {
    /// Integer used in serialized records.
    #[must_use]
    pub fn as_wire(self) -> i32 {
        match self {
            Self::Alarm => 0,
            Self::Timer => 1,
            Self::Reminder => 2,
            Self::Unknown => 99,
        }
    }

    /// Decode a record integer. Unrecognized values become [`AlertKind::Unknown`].
    #[must_use]
    pub fn from_wire(raw: i32) -> Self {
        match raw {
            0 => Self::Alarm,
            1 => Self::Timer,
            2 => Self::Reminder,
            _ => Self::Unknown,
        }
    }

    /// Label used when the caller supplies an empty name.
    #[must_use]
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Alarm => "alarm",
            Self::Timer => "timer",
            Self::Reminder => "reminder",
            Self::Unknown => "alert",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_name())
    }
}

/// A schedulable notification intent, possibly recurring.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    id: String,
    kind: AlertKind,
    name: String,
    priority: u8,
    next_expiration: DateTime<FixedOffset>,
    recurrence: Recurrence,
    end_repeat: Option<DateTime<FixedOffset>>,
    audio_file: Option<String>,
    script_reference: Option<String>,
    context: BTreeMap<String, serde_json::Value>,
}

impl Alert {
    /// Start building an alert that first expires at `expiration`.
    pub fn builder(expiration: impl Into<DateTime<FixedOffset>>) -> AlertBuilder {
        AlertBuilder::new(expiration.into())
    }

    /// Rebuild an alert from its serialized record.
    pub fn from_record(record: &AlertRecord) -> Result<Self> {
        let next_expiration = parse_instant(&record.next_expiration_time)?;
        let end_repeat = record.end_repeat.as_deref().map(parse_instant).transpose()?;
        let recurrence =
            Recurrence::from_wire(record.repeat_frequency, record.repeat_days.clone())?;
        check_priority(record.priority)?;

        let mut context = record.context.clone();
        let id = ensure_identity(&mut context)?;

        Ok(Self {
            id,
            kind: AlertKind::from_wire(record.alert_type),
            name: record.alert_name.clone(),
            priority: record.priority,
            next_expiration,
            recurrence,
            end_repeat,
            audio_file: record.audio_file.clone(),
            script_reference: record.script_filename.clone(),
            context,
        })
    }

    /// Rebuild an alert stored under `id`, using `id` as the identity when
    /// the record's context carries none.
    pub fn from_stored(id: &str, record: &AlertRecord) -> Result<Self> {
        match record.context.get(ALERT_ID_KEY) {
            None | Some(serde_json::Value::Null) => {
                let mut keyed = record.clone();
                keyed.context.insert(
                    ALERT_ID_KEY.to_owned(),
                    serde_json::Value::String(id.to_owned()),
                );
                Self::from_record(&keyed)
            }
            Some(_) => Self::from_record(record),
        }
    }

    /// Serialize into the stable record form.
    #[must_use]
    pub fn to_record(&self) -> AlertRecord {
        AlertRecord {
            next_expiration_time: format_instant(&self.next_expiration),
            alert_type: self.kind.as_wire(),
            priority: self.priority,
            repeat_frequency: self.recurrence.frequency_secs(),
            repeat_days: self.recurrence.day_list(),
            end_repeat: self.end_repeat.as_ref().map(format_instant),
            alert_name: self.name.clone(),
            audio_file: self.audio_file.clone(),
            script_filename: self.script_reference.clone(),
            context: self.context.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> AlertKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub fn recurrence(&self) -> &Recurrence {
        &self.recurrence
    }

    #[must_use]
    pub fn end_repeat(&self) -> Option<DateTime<FixedOffset>> {
        self.end_repeat
    }

    #[must_use]
    pub fn audio_file(&self) -> Option<&str> {
        self.audio_file.as_deref()
    }

    #[must_use]
    pub fn script_reference(&self) -> Option<&str> {
        self.script_reference.as_deref()
    }

    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    /// Owning user from the context.
    #[must_use]
    pub fn user(&self) -> &str {
        self.context
            .get(USER_KEY)
            .and_then(serde_json::Value::as_str)
            .unwrap_or(DEFAULT_USER)
    }

    /// Returns `true` when the alert has a repeat mode.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_recurring()
    }

    /// The stored cursor, without any recurrence recompute.
    #[must_use]
    pub fn stored_expiration(&self) -> DateTime<FixedOffset> {
        self.next_expiration
    }

    /// Next due instant as of the current wall clock.
    pub fn next_expiration(&mut self) -> Option<DateTime<FixedOffset>> {
        self.next_expiration_at(Utc::now())
    }

    /// Next due instant as of `now`.
    ///
    /// A past cursor is advanced through the recurrence and written back.
    /// Returns `None` once the alert has no occurrence left, either because
    /// it was one-shot or because the candidate passes `end_repeat`; the
    /// stored cursor is left untouched in that case.
    pub fn next_expiration_at(&mut self, now: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
        let now = now.with_timezone(self.next_expiration.offset());
        let candidate = self.recurrence.advance(self.next_expiration, now)?;
        if self.end_repeat.is_some_and(|end| candidate > end) {
            return None;
        }
        self.next_expiration = candidate;
        Some(candidate)
    }

    /// Returns `true` when the stored cursor is at or before the current time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns `true` when the stored cursor is at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.next_expiration <= now
    }

    /// Signed time from `now` until the stored cursor.
    #[must_use]
    pub fn time_to_expiration_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.next_expiration.with_timezone(&Utc) - now
    }
}

/// Builder for [`Alert`]; validation happens in [`AlertBuilder::build`].
#[derive(Debug, Clone)]
pub struct AlertBuilder {
    expiration: DateTime<FixedOffset>,
    name: String,
    kind: AlertKind,
    priority: u8,
    recurrence: Recurrence,
    end_repeat: Option<DateTime<FixedOffset>>,
    audio_file: Option<String>,
    script_reference: Option<String>,
    context: BTreeMap<String, serde_json::Value>,
}

impl AlertBuilder {
    fn new(expiration: DateTime<FixedOffset>) -> Self {
        Self {
            expiration,
            name: String::new(),
            kind: AlertKind::default(),
            priority: DEFAULT_PRIORITY,
            recurrence: Recurrence::NoRepeat,
            end_repeat: None,
            audio_file: None,
            script_reference: None,
            context: BTreeMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(mut self, kind: AlertKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn end_repeat(mut self, end: impl Into<DateTime<FixedOffset>>) -> Self {
        self.end_repeat = Some(end.into());
        self
    }

    pub fn audio_file(mut self, path: impl Into<String>) -> Self {
        self.audio_file = Some(path.into());
        self
    }

    pub fn script_reference(mut self, reference: impl Into<String>) -> Self {
        self.script_reference = Some(reference.into());
        self
    }

    /// Replace the whole context map.
    pub fn context(mut self, context: BTreeMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    /// Set one context entry.
    pub fn context_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Use a caller-chosen id instead of a generated one.
    pub fn id(self, id: impl Into<String>) -> Self {
        self.context_value(ALERT_ID_KEY, serde_json::Value::String(id.into()))
    }

    /// Set the owning user.
    pub fn user(self, user: impl Into<String>) -> Self {
        self.context_value(USER_KEY, serde_json::Value::String(user.into()))
    }

    /// Validate and normalize into an [`Alert`].
    pub fn build(self) -> Result<Alert> {
        check_priority(self.priority)?;
        self.recurrence.validate()?;

        let expiration = self.expiration.trunc_subsecs(0);
        let end_repeat = self.end_repeat.map(|end| end.trunc_subsecs(0));
        if let Some(end) = end_repeat.filter(|end| *end <= expiration) {
            return Err(AlertError::InvalidAlert(format!(
                "end_repeat {} is not after expiration {}",
                format_instant(&end),
                format_instant(&expiration)
            )));
        }

        let mut context = self.context;
        let id = ensure_identity(&mut context)?;

        let name = if self.name.trim().is_empty() {
            self.kind.default_name().to_owned()
        } else {
            self.name
        };

        Ok(Alert {
            id,
            kind: self.kind,
            name,
            priority: self.priority,
            next_expiration: expiration,
            recurrence: self.recurrence,
            end_repeat,
            audio_file: self.audio_file,
            script_reference: self.script_reference,
            context,
        })
    }
}

/// Parse an RFC 3339 instant, rejecting text without a UTC offset.
pub fn parse_instant(raw: &str) -> Result<DateTime<FixedOffset>> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(instant) => Ok(instant.trunc_subsecs(0)),
        Err(e) => {
            if raw.trim().parse::<NaiveDateTime>().is_ok() {
                Err(AlertError::InvalidAlert(format!(
                    "instant '{raw}' has no UTC offset"
                )))
            } else {
                Err(AlertError::InvalidAlert(format!(
                    "cannot parse instant '{raw}': {e}"
                )))
            }
        }
    }
}

fn format_instant(instant: &DateTime<FixedOffset>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn check_priority(priority: u8) -> Result<()> {
    if (1..=10).contains(&priority) {
        Ok(())
    } else {
        Err(AlertError::InvalidAlert(format!(
            "priority {priority} is outside 1-10"
        )))
    }
}

/// Read the id from the context, generating and storing one when absent.
fn ensure_identity(context: &mut BTreeMap<String, serde_json::Value>) -> Result<String> {
    match context.get(ALERT_ID_KEY) {
        Some(serde_json::Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        None | Some(serde_json::Value::Null) => {
            let id = uuid::Uuid::new_v4().to_string();
            context.insert(
                ALERT_ID_KEY.to_owned(),
                serde_json::Value::String(id.clone()),
            );
            Ok(id)
        }
        Some(other) => Err(AlertError::InvalidAlert(format!(
            "context key '{ALERT_ID_KEY}' must be a non-empty string, got {other}"
        ))),
    }
}
