//! Mentor calendar model: availability templates, exceptions and claims.
//!
//! # Responsibility
//! - Represent the two independent calendars (discipline, mentorship) a
//!   mentor publishes.
//! - Represent every reservation of mentor time as one [`CalendarClaim`],
//!   whatever path created it.
//!
//! # Invariants
//! - `TimeOfDay` is minute precision and always below 24:00.
//! - A window's `start_time` is strictly before its `end_time`.
//! - At most one non-cancelled claim exists per `(mentor_id, scheduled_at)`.

use crate::error::ValidationError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

static HH_MM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("valid HH:MM regex"));

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Which of the mentor's two calendars a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Mandatory check-in calls; never blocked by exceptions.
    Discipline,
    /// Paid sessions; blocked during availability exceptions.
    Mentorship,
}

impl CallType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discipline => "discipline",
            Self::Mentorship => "mentorship",
        }
    }
}

impl Display for CallType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "discipline" => Ok(Self::Discipline),
            "mentorship" => Ok(Self::Mentorship),
            _ => Err(ValidationError::UnknownCallType(value.to_string())),
        }
    }
}

/// Mentor-local wall-clock time, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        Self::from_minutes(hour.checked_mul(60)?.checked_add(minute)?)
            .filter(|_| minute < 60)
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        if minutes < MINUTES_PER_DAY {
            u16::try_from(minutes).ok().map(Self)
        } else {
            None
        }
    }

    /// Minutes since midnight.
    pub fn minutes(self) -> u32 {
        u32::from(self.0)
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.minutes() / 60, self.minutes() % 60, 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidTimeOfDay(value.to_string());
        let caps = HH_MM_RE.captures(value.trim()).ok_or_else(invalid)?;
        let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
        let minute: u32 = caps[2].parse().map_err(|_| invalid())?;
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl Display for TimeOfDay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes() / 60, self.minutes() % 60)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Recurring weekly availability of one mentor for one call type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityWindow {
    pub id: i64,
    pub mentor_id: i64,
    /// Sunday = 0.
    pub day_of_week: u8,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub call_type: CallType,
    pub active: bool,
}

impl AvailabilityWindow {
    pub fn length_minutes(&self) -> u32 {
        self.end_time.minutes().saturating_sub(self.start_time.minutes())
    }
}

/// Input for publishing a new availability window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAvailabilityWindow {
    pub mentor_id: i64,
    pub day_of_week: u8,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub call_type: CallType,
}

impl NewAvailabilityWindow {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.day_of_week > 6 {
            return Err(ValidationError::InvalidWeekday(i64::from(self.day_of_week)));
        }
        if self.start_time >= self.end_time {
            return Err(ValidationError::EmptyWindow {
                start: self.start_time.to_string(),
                end: self.end_time.to_string(),
            });
        }
        Ok(())
    }
}

/// One bookable unit of a mentor calendar on a concrete date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Slot {
    /// Whether `[from, to)` intersects this slot.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        from < self.ends_at && self.starts_at < to
    }
}

/// Closed date interval during which a mentor takes no mentorship sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityException {
    pub id: i64,
    pub mentor_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
}

impl AvailabilityException {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Which external path created a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimSource {
    /// Direct slot reservation (`reserve`).
    Booking,
    /// Mentorship request carrying an explicit time.
    Request,
}

impl ClaimSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::Request => "request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "booking" => Some(Self::Booking),
            "request" => Some(Self::Request),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Missed,
}

impl ClaimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Missed => "missed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "missed" => Some(Self::Missed),
            _ => None,
        }
    }

    /// Still waiting for the session to happen.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Unmarked,
    Attended,
    Missed,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unmarked => "unmarked",
            Self::Attended => "attended",
            Self::Missed => "missed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unmarked" => Some(Self::Unmarked),
            "attended" => Some(Self::Attended),
            "missed" => Some(Self::Missed),
            _ => None,
        }
    }
}

/// One reservation of mentor time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarClaim {
    pub id: i64,
    pub source: ClaimSource,
    pub mentor_id: i64,
    pub participant_id: i64,
    pub enrollment_id: Option<i64>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub call_type: CallType,
    pub status: ClaimStatus,
    pub attendance: AttendanceStatus,
    pub topic: Option<String>,
}

/// A claim created through the reservation path.
pub type Booking = CalendarClaim;

impl CalendarClaim {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// Insert shape shared by both reservation paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimDraft {
    pub source: ClaimSource,
    pub mentor_id: i64,
    pub participant_id: i64,
    pub enrollment_id: Option<i64>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub call_type: CallType,
    pub status: ClaimStatus,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Held,
    Released,
}

impl HoldStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Released => "released",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "held" => Some(Self::Held),
            "released" => Some(Self::Released),
            _ => None,
        }
    }
}

/// Funds held against a mentorship claim until the session settles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundHold {
    pub id: i64,
    pub claim_id: Option<i64>,
    pub participant_id: i64,
    pub mentor_id: i64,
    pub base_price: i64,
    pub multiplier: f64,
    pub amount: i64,
    pub status: HoldStatus,
}

#[cfg(test)]
mod tests {
    use super::{CallType, NewAvailabilityWindow, TimeOfDay};
    use crate::error::ValidationError;

    #[test]
    fn time_of_day_parses_and_formats_hh_mm() {
        let time: TimeOfDay = "09:30".parse().unwrap();
        assert_eq!(time.minutes(), 570);
        assert_eq!(time.to_string(), "09:30");
        assert_eq!("23:59".parse::<TimeOfDay>().unwrap().minutes(), 1439);
    }

    #[test]
    fn time_of_day_rejects_malformed_values() {
        for value in ["24:00", "9:30", "09:60", "0930", ""] {
            assert!(
                matches!(
                    value.parse::<TimeOfDay>(),
                    Err(ValidationError::InvalidTimeOfDay(_))
                ),
                "`{value}` should be rejected"
            );
        }
    }

    #[test]
    fn call_type_rejects_unknown_values() {
        assert_eq!("MENTORSHIP".parse::<CallType>().unwrap(), CallType::Mentorship);
        assert!("coaching".parse::<CallType>().is_err());
    }

    #[test]
    fn window_requires_start_before_end() {
        let window = NewAvailabilityWindow {
            mentor_id: 1,
            day_of_week: 1,
            start_time: "11:00".parse().unwrap(),
            end_time: "09:00".parse().unwrap(),
            call_type: CallType::Mentorship,
        };
        assert!(matches!(
            window.validate(),
            Err(ValidationError::EmptyWindow { .. })
        ));
    }
}
