//! Recurrence rule expansion.
//!
//! # Responsibility
//! - Turn a recurring action into the ordered list of dates it is due on
//!   within an inclusive range.
//!
//! # Invariants
//! - Expansion is pure: same inputs, same output, no I/O.
//! - Output is strictly increasing.
//! - Empty weekday sets for WEEKLY/BIWEEKLY produce an empty output, not an
//!   error; callers surface that as [`ExpansionWarning::ZeroInstances`].

use crate::model::action::{Frequency, RecurringAction};
use crate::model::{epoch_days, weekday_index};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

/// Which weeks count as "on" for BIWEEKLY rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BiweeklyAnchor {
    /// Even `floor(epoch_days / 7)` weeks. Two actions created on different
    /// dates always agree on which week is on.
    #[default]
    UnixEpoch,
    /// Even 7-day blocks counted from this date.
    Date(NaiveDate),
}

impl BiweeklyAnchor {
    /// Whether `date` falls in an "on" week.
    pub fn is_on_week(self, date: NaiveDate) -> bool {
        let days = match self {
            Self::UnixEpoch => epoch_days(date),
            Self::Date(anchor) => date.signed_duration_since(anchor).num_days(),
        };
        days.div_euclid(7).rem_euclid(2) == 0
    }
}

/// Non-fatal expansion outcome the caller must surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpansionWarning {
    /// The rule matched no date in the requested range.
    ZeroInstances {
        action_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    },
}

/// Stateless expander parameterized by the biweekly anchor policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecurrenceExpander {
    anchor: BiweeklyAnchor,
}

impl RecurrenceExpander {
    pub fn new(anchor: BiweeklyAnchor) -> Self {
        Self { anchor }
    }

    pub fn anchor(&self) -> BiweeklyAnchor {
        self.anchor
    }

    /// Due dates of `action` within `[from, to]`, ascending.
    pub fn expand(&self, action: &RecurringAction, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        if from > to {
            return Vec::new();
        }

        if action.frequency == Frequency::OneTime {
            let date = action
                .specific_date
                .filter(|date| (from..=to).contains(date))
                .unwrap_or(from);
            return vec![date];
        }

        from.iter_days()
            .take_while(|day| *day <= to)
            .filter(|day| self.matches(action, *day))
            .collect()
    }

    /// Whether a single day satisfies a repeating rule.
    fn matches(&self, action: &RecurringAction, day: NaiveDate) -> bool {
        let on_assigned_weekday = || action.assigned_days.contains(&weekday_index(day));
        match action.frequency {
            Frequency::Daily => true,
            Frequency::Weekly => on_assigned_weekday(),
            Frequency::Biweekly => on_assigned_weekday() && self.anchor.is_on_week(day),
            Frequency::Monthly => {
                let target = action.assigned_days.first().copied().unwrap_or(1);
                day.day() == u32::from(target)
            }
            Frequency::OneTime => false,
        }
    }
}

/// Number of days in `[from, to]`, zero when reversed.
pub fn inclusive_day_count(from: NaiveDate, to: NaiveDate) -> i64 {
    if from > to {
        0
    } else {
        (to - from + Duration::days(1)).num_days()
    }
}
