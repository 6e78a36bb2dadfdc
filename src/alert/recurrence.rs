//! Recurrence rules and the next-occurrence calculator.
//!
//! A [`Recurrence`] is a closed set of repeat modes. The calculator in
//! [`Recurrence::advance`] moves a past cursor forward to the first
//! occurrence at or after `now`; it never looks at `end_repeat`, which the
//! owning [`Alert`](super::Alert) applies afterwards.

use crate::error::{AlertError, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const SECS_PER_DAY: i64 = 86_400;

/// How an alert repeats after its first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recurrence {
    /// Exactly one occurrence.
    #[default]
    NoRepeat,
    /// Repeat every `secs` seconds.
    Frequency {
        /// Whole seconds between occurrences; always non-zero.
        secs: u64,
    },
    /// Repeat on the given weekdays (0 = Monday .. 6 = Sunday) at the
    /// original wall-clock time.
    Weekdays {
        /// Non-empty set of weekday numbers.
        days: BTreeSet<u8>,
    },
}

impl Recurrence {
    /// Repeat at a fixed interval, truncated to whole seconds.
    pub fn every(interval: std::time::Duration) -> Result<Self> {
        let secs = interval.as_secs();
        if secs == 0 {
            return Err(AlertError::InvalidAlert(
                "repeat frequency must be at least one second".to_owned(),
            ));
        }
        Ok(Self::Frequency { secs })
    }

    /// Repeat on the given weekday numbers (0 = Monday).
    pub fn on_days(days: impl IntoIterator<Item = u8>) -> Result<Self> {
        let days: BTreeSet<u8> = days.into_iter().collect();
        if days.is_empty() {
            return Err(AlertError::InvalidAlert(
                "repeat days must name at least one weekday".to_owned(),
            ));
        }
        if let Some(bad) = days.iter().find(|d| **d > 6) {
            return Err(AlertError::InvalidAlert(format!(
                "repeat day {bad} is outside 0-6"
            )));
        }
        Ok(Self::Weekdays { days })
    }

    /// Repeat on the given chrono weekdays.
    pub fn on_weekdays(days: impl IntoIterator<Item = Weekday>) -> Result<Self> {
        Self::on_days(days.into_iter().map(weekday_number))
    }

    /// Re-check a value that may have been built from the enum variants
    /// directly rather than through the constructors.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::NoRepeat => Ok(()),
            Self::Frequency { secs } => {
                Self::every(std::time::Duration::from_secs(*secs)).map(|_| ())
            }
            Self::Weekdays { days } => Self::on_days(days.iter().copied()).map(|_| ()),
        }
    }

    /// Build from the wire pair, rejecting records that set both.
    pub(crate) fn from_wire(frequency: Option<u64>, days: Option<Vec<u8>>) -> Result<Self> {
        let days = days.filter(|d| !d.is_empty());
        match (frequency, days) {
            (Some(_), Some(_)) => Err(AlertError::InvalidAlert(
                "repeat_frequency and repeat_days are mutually exclusive".to_owned(),
            )),
            (Some(secs), None) => Self::every(std::time::Duration::from_secs(secs)),
            (None, Some(days)) => Self::on_days(days),
            (None, None) => Ok(Self::NoRepeat),
        }
    }

    /// Wire representation of the frequency, if any.
    pub(crate) fn frequency_secs(&self) -> Option<u64> {
        match self {
            Self::Frequency { secs } => Some(*secs),
            _ => None,
        }
    }

    /// Wire representation of the weekday set, if any.
    pub(crate) fn day_list(&self) -> Option<Vec<u8>> {
        match self {
            Self::Weekdays { days } => Some(days.iter().copied().collect()),
            _ => None,
        }
    }

    /// Returns `true` for every mode except [`Recurrence::NoRepeat`].
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::NoRepeat)
    }

    /// First occurrence at or after `now`, starting from `cursor`.
    ///
    /// A cursor that is not in the past is returned unchanged.
    #[must_use]
    pub fn advance(
        &self,
        cursor: DateTime<FixedOffset>,
        now: DateTime<FixedOffset>,
    ) -> Option<DateTime<FixedOffset>> {
        if cursor >= now {
            return Some(cursor);
        }

        match self {
            Self::NoRepeat => None,
            Self::Frequency { secs } => {
                let step = i64::try_from(*secs).ok()?;
                let behind = (now - cursor).num_seconds();
                // Round up so the result lands at or after `now`; `now`
                // may carry sub-second precision the cursor does not.
                let mut ticks = behind.div_euclid(step) + 1;
                if behind.rem_euclid(step) == 0 && cursor + Duration::seconds(behind) >= now {
                    ticks -= 1;
                }
                cursor.checked_add_signed(Duration::seconds(step.checked_mul(ticks)?))
            }
            Self::Weekdays { days } => {
                let whole_days = (now - cursor).num_seconds() / SECS_PER_DAY;
                let mut candidate = cursor.checked_add_signed(Duration::days(whole_days))?;
                // Bounded: at most one extra day to pass `now`, then a week.
                for _ in 0..=8 {
                    if candidate >= now && days.contains(&weekday_number(candidate.weekday())) {
                        return Some(candidate);
                    }
                    candidate = candidate.checked_add_signed(Duration::days(1))?;
                }
                None
            }
        }
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRepeat => write!(f, "once"),
            Self::Frequency { secs } => {
                if *secs >= 3600 && secs % 3600 == 0 {
                    write!(f, "every {} hours", secs / 3600)
                } else if *secs >= 60 && secs % 60 == 0 {
                    write!(f, "every {} minutes", secs / 60)
                } else {
                    write!(f, "every {secs} seconds")
                }
            }
            Self::Weekdays { days } => {
                let names: Vec<&str> = days.iter().map(|d| day_name(*d)).collect();
                write!(f, "on {}", names.join(", "))
            }
        }
    }
}

/// Weekday number with Monday = 0.
#[must_use]
pub fn weekday_number(day: Weekday) -> u8 {
    // num_days_from_monday is always 0..=6
    day.num_days_from_monday() as u8
}

fn day_name(day: u8) -> &'static str {
    match day {
        0 => "Mon",
        1 => "Tue",
        2 => "Wed",
        3 => "Thu",
        4 => "Fri",
        5 => "Sat",
        _ => "Sun",
    }
}
