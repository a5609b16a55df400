//! Recurring action model.
//!
//! # Responsibility
//! - Define the recurrence rule a participant commits to.
//! - Convert untyped payloads into a validated [`ActionDraft`].
//!
//! # Invariants
//! - `frequency` is always one of the closed [`Frequency`] variants; unknown
//!   strings are rejected, never defaulted.
//! - WEEKLY/BIWEEKLY `assigned_days` entries are weekday indices `0..=6`.
//! - MONTHLY uses `assigned_days[0]` as a day of month `1..=31`.

use crate::error::ValidationError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Recurrence rule of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    OneTime,
}

impl Frequency {
    /// Storage and wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::OneTime => "one_time",
        }
    }

    /// Whether the rule selects days through `assigned_days` weekdays.
    pub fn uses_weekdays(self) -> bool {
        matches!(self, Self::Weekly | Self::Biweekly)
    }
}

impl Display for Frequency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "one_time" | "onetime" => Ok(Self::OneTime),
            _ => Err(ValidationError::UnknownFrequency(value.to_string())),
        }
    }
}

/// Persisted recurring action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecurringAction {
    pub id: i64,
    pub participant_id: i64,
    /// Foreign key into the goal tree owned by the approval workflow.
    pub goal_id: Option<i64>,
    pub description: String,
    pub frequency: Frequency,
    pub assigned_days: Vec<u8>,
    pub specific_date: Option<NaiveDate>,
    pub requires_evidence: bool,
    pub active: bool,
}

/// Validated input for creating a recurring action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDraft {
    pub participant_id: i64,
    pub goal_id: Option<i64>,
    pub description: String,
    pub frequency: Frequency,
    pub assigned_days: Vec<u8>,
    pub specific_date: Option<NaiveDate>,
    pub requires_evidence: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawActionPayload {
    description: Option<String>,
    frequency: Option<String>,
    #[serde(default, alias = "assigned_days")]
    assigned_days: Vec<i64>,
    #[serde(default, alias = "specific_date")]
    specific_date: Option<String>,
    #[serde(default, alias = "requires_evidence")]
    requires_evidence: bool,
    #[serde(default, alias = "goal_id")]
    goal_id: Option<i64>,
}

impl ActionDraft {
    /// Converts an untyped JSON payload into a validated draft.
    ///
    /// # Errors
    /// - `MissingField` when `description` or `frequency` is absent.
    /// - `UnknownFrequency` for frequency strings outside the closed set.
    /// - `InvalidWeekday` / `InvalidMonthDay` / `InvalidDate` for bad values.
    pub fn from_json(
        participant_id: i64,
        payload: &serde_json::Value,
    ) -> Result<Self, ValidationError> {
        let raw: RawActionPayload = serde_json::from_value(payload.clone()).map_err(|err| {
            ValidationError::InvalidField {
                field: "payload",
                message: err.to_string(),
            }
        })?;

        let description = raw
            .description
            .ok_or(ValidationError::MissingField("description"))?;
        let frequency: Frequency = raw
            .frequency
            .ok_or(ValidationError::MissingField("frequency"))?
            .parse()?;
        let specific_date = raw
            .specific_date
            .map(|value| parse_iso_date(&value))
            .transpose()?;

        let mut assigned_days = Vec::with_capacity(raw.assigned_days.len());
        for day in raw.assigned_days {
            let converted = u8::try_from(day).map_err(|_| match frequency {
                Frequency::Monthly => ValidationError::InvalidMonthDay(day),
                _ => ValidationError::InvalidWeekday(day),
            })?;
            assigned_days.push(converted);
        }

        let draft = Self {
            participant_id,
            goal_id: raw.goal_id,
            description,
            frequency,
            assigned_days,
            specific_date,
            requires_evidence: raw.requires_evidence,
        };
        draft.validate()?;
        Ok(draft)
    }

    /// Checks field-level invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::MissingField("description"));
        }
        match self.frequency {
            Frequency::Weekly | Frequency::Biweekly => {
                if let Some(day) = self.assigned_days.iter().find(|day| **day > 6) {
                    return Err(ValidationError::InvalidWeekday(i64::from(*day)));
                }
            }
            Frequency::Monthly => {
                if let Some(day) = self.assigned_days.first() {
                    if !(1..=31).contains(day) {
                        return Err(ValidationError::InvalidMonthDay(i64::from(*day)));
                    }
                }
            }
            Frequency::Daily | Frequency::OneTime => {}
        }
        Ok(())
    }
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_iso_date(value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(value.to_string()))
}
