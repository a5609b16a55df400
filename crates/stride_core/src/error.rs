//! Engine error taxonomy.
//!
//! # Responsibility
//! - Classify every service failure as validation, conflict, state or
//!   persistence.
//! - Give each failure a stable machine-readable code next to its
//!   human-readable message.
//!
//! # Invariants
//! - Codes are `<class>.<reason>` and never change once published.
//! - Only persistence failures report `is_retryable() == true`.

use crate::db::DbError;
use crate::repo::RepoError;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type returned by engine services.
pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse failure class, used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input, rejected before any persistence.
    Validation,
    /// Expected business conflict; the caller must choose differently.
    Conflict,
    /// Caller acted on an entity in the wrong lifecycle state.
    State,
    /// Storage engine failure.
    Persistence,
}

/// Malformed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownFrequency(String),
    UnknownCallType(String),
    InvalidWeekday(i64),
    InvalidMonthDay(i64),
    InvalidTimeOfDay(String),
    InvalidDate(String),
    EmptyWindow { start: String, end: String },
    MissingField(&'static str),
    InvalidField { field: &'static str, message: String },
    InvalidDateRange { from: NaiveDate, to: NaiveDate },
    ZeroGranularity,
    SlotInPast(DateTime<Utc>),
    SlotOutsideAvailability(DateTime<Utc>),
    BlankReason,
    ConfirmationMismatch,
    EvidenceRequired(i64),
}

impl ValidationError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownFrequency(_) => "validation.unknown_frequency",
            Self::UnknownCallType(_) => "validation.unknown_call_type",
            Self::InvalidWeekday(_) => "validation.invalid_weekday",
            Self::InvalidMonthDay(_) => "validation.invalid_month_day",
            Self::InvalidTimeOfDay(_) => "validation.invalid_time_of_day",
            Self::InvalidDate(_) => "validation.invalid_date",
            Self::EmptyWindow { .. } => "validation.empty_window",
            Self::MissingField(_) => "validation.missing_field",
            Self::InvalidField { .. } => "validation.invalid_field",
            Self::InvalidDateRange { .. } => "validation.invalid_date_range",
            Self::ZeroGranularity => "validation.zero_granularity",
            Self::SlotInPast(_) => "validation.slot_in_past",
            Self::SlotOutsideAvailability(_) => "validation.slot_outside_availability",
            Self::BlankReason => "validation.blank_reason",
            Self::ConfirmationMismatch => "validation.confirmation_mismatch",
            Self::EvidenceRequired(_) => "validation.evidence_required",
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownFrequency(value) => write!(f, "unknown frequency `{value}`"),
            Self::UnknownCallType(value) => write!(f, "unknown call type `{value}`"),
            Self::InvalidWeekday(value) => write!(f, "weekday index {value} is outside 0..=6"),
            Self::InvalidMonthDay(value) => write!(f, "day of month {value} is outside 1..=31"),
            Self::InvalidTimeOfDay(value) => {
                write!(f, "time of day `{value}` is not in HH:MM format")
            }
            Self::InvalidDate(value) => write!(f, "date `{value}` is not in YYYY-MM-DD format"),
            Self::EmptyWindow { start, end } => {
                write!(f, "window start {start} must be before end {end}")
            }
            Self::MissingField(field) => write!(f, "missing required field `{field}`"),
            Self::InvalidField { field, message } => write!(f, "invalid `{field}`: {message}"),
            Self::InvalidDateRange { from, to } => {
                write!(f, "date range start {from} is after end {to}")
            }
            Self::ZeroGranularity => write!(f, "slot granularity must be at least one minute"),
            Self::SlotInPast(at) => write!(f, "slot {at} is not in the future"),
            Self::SlotOutsideAvailability(at) => {
                write!(f, "slot {at} does not match the mentor's availability")
            }
            Self::BlankReason => write!(f, "a non-empty reason is required"),
            Self::ConfirmationMismatch => write!(f, "confirmation text does not match"),
            Self::EvidenceRequired(id) => write!(f, "task instance {id} requires evidence"),
        }
    }
}

impl Error for ValidationError {}

/// Expected, user-facing reservation conflicts. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    SlotAlreadyTaken {
        mentor_id: i64,
        scheduled_at: DateTime<Utc>,
    },
    SameWeekdayNotAllowed {
        weekday: Weekday,
    },
    WeeklyLimitReached {
        limit: u32,
    },
}

impl ConflictError {
    fn code(&self) -> &'static str {
        match self {
            Self::SlotAlreadyTaken { .. } => "conflict.slot_already_taken",
            Self::SameWeekdayNotAllowed { .. } => "conflict.same_weekday_not_allowed",
            Self::WeeklyLimitReached { .. } => "conflict.weekly_limit_reached",
        }
    }
}

impl Display for ConflictError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SlotAlreadyTaken {
                mentor_id,
                scheduled_at,
            } => write!(f, "mentor {mentor_id} is already booked at {scheduled_at}"),
            Self::SameWeekdayNotAllowed { weekday } => write!(
                f,
                "a session is already booked on {weekday} this week; pick another day"
            ),
            Self::WeeklyLimitReached { limit } => {
                write!(f, "weekly limit of {limit} sessions reached")
            }
        }
    }
}

impl Error for ConflictError {}

/// Caller-side lifecycle mistakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    InvalidExtension {
        current_end: NaiveDate,
        requested_end: NaiveDate,
    },
    EnrollmentNotActive {
        enrollment_id: i64,
        status: &'static str,
    },
    NoActiveEnrollment {
        participant_id: i64,
        mentor_id: i64,
    },
    NoActiveCycle {
        participant_id: i64,
    },
    NotFound {
        entity: &'static str,
        id: i64,
    },
    InvalidTransition {
        entity: &'static str,
        id: i64,
        from: &'static str,
        to: &'static str,
    },
    SessionNotYetHeld {
        claim_id: i64,
    },
    PostponeLimitReached {
        instance_id: i64,
        limit: u32,
    },
    CycleAlreadyActive {
        participant_id: i64,
        cycle_id: i64,
    },
    EnrollmentAlreadyOpen {
        participant_id: i64,
    },
}

impl StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidExtension { .. } => "state.invalid_extension",
            Self::EnrollmentNotActive { .. } => "state.enrollment_not_active",
            Self::NoActiveEnrollment { .. } => "state.no_active_enrollment",
            Self::NoActiveCycle { .. } => "state.no_active_cycle",
            Self::NotFound { .. } => "state.not_found",
            Self::InvalidTransition { .. } => "state.invalid_transition",
            Self::SessionNotYetHeld { .. } => "state.session_not_yet_held",
            Self::PostponeLimitReached { .. } => "state.postpone_limit_reached",
            Self::CycleAlreadyActive { .. } => "state.cycle_already_active",
            Self::EnrollmentAlreadyOpen { .. } => "state.enrollment_already_open",
        }
    }
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidExtension {
                current_end,
                requested_end,
            } => write!(
                f,
                "new end date {requested_end} must be after current end date {current_end}"
            ),
            Self::EnrollmentNotActive {
                enrollment_id,
                status,
            } => write!(f, "enrollment {enrollment_id} is {status}, expected active"),
            Self::NoActiveEnrollment {
                participant_id,
                mentor_id,
            } => write!(
                f,
                "participant {participant_id} has no active enrollment with mentor {mentor_id}"
            ),
            Self::NoActiveCycle { participant_id } => {
                write!(f, "participant {participant_id} has no active cycle")
            }
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidTransition {
                entity,
                id,
                from,
                to,
            } => write!(f, "{entity} {id} cannot move from {from} to {to}"),
            Self::SessionNotYetHeld { claim_id } => {
                write!(f, "session {claim_id} has not happened yet")
            }
            Self::PostponeLimitReached { instance_id, limit } => write!(
                f,
                "task instance {instance_id} was already postponed {limit} times"
            ),
            Self::CycleAlreadyActive {
                participant_id,
                cycle_id,
            } => write!(
                f,
                "participant {participant_id} already has active cycle {cycle_id}"
            ),
            Self::EnrollmentAlreadyOpen { participant_id } => write!(
                f,
                "participant {participant_id} already has an open enrollment"
            ),
        }
    }
}

impl Error for StateError {}

/// Top-level service error.
#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    Conflict(ConflictError),
    State(StateError),
    Persistence(RepoError),
}

impl EngineError {
    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::Conflict(_) => ErrorClass::Conflict,
            Self::State(_) => ErrorClass::State,
            Self::Persistence(_) => ErrorClass::Persistence,
        }
    }

    /// Stable machine-readable code, e.g. `conflict.slot_already_taken`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(err) => err.code(),
            Self::Conflict(err) => err.code(),
            Self::State(err) => err.code(),
            Self::Persistence(RepoError::Db(err)) if err.is_busy() => "persistence.lock_timeout",
            Self::Persistence(RepoError::Db(DbError::UnsupportedSchemaVersion { .. })) => {
                "persistence.unsupported_schema"
            }
            Self::Persistence(RepoError::Db(_)) => "persistence.storage",
            Self::Persistence(RepoError::InvalidData(_)) => "persistence.invalid_data",
            Self::Persistence(RepoError::NotFound { .. }) => "persistence.not_found",
        }
    }

    /// Whether an idempotent caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(RepoError::Db(_)))
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Conflict(err) => write!(f, "{err}"),
            Self::State(err) => write!(f, "{err}"),
            Self::Persistence(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Conflict(err) => Some(err),
            Self::State(err) => Some(err),
            Self::Persistence(err) => Some(err),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ConflictError> for EngineError {
    fn from(value: ConflictError) -> Self {
        Self::Conflict(value)
    }
}

impl From<StateError> for EngineError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::State(StateError::NotFound { entity, id }),
            other => Self::Persistence(other),
        }
    }
}

impl From<DbError> for EngineError {
    fn from(value: DbError) -> Self {
        Self::Persistence(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Persistence(RepoError::Db(DbError::Sqlite(value)))
    }
}
