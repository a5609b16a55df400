//! Enrollment and accountability audit model.
//!
//! # Invariants
//! - `Completed`, `Dropped` and `Deserter` are terminal.
//! - `Suspended` only returns to `Active` through a supervisor reset.
//! - Audit records are append-only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Suspended,
    Completed,
    Dropped,
    Deserter,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
            Self::Deserter => "deserter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "completed" => Some(Self::Completed),
            "dropped" => Some(Self::Dropped),
            "deserter" => Some(Self::Deserter),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Dropped | Self::Deserter)
    }
}

/// A participant's commitment program with one mentor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub participant_id: i64,
    pub mentor_id: i64,
    pub total_weeks: u32,
    pub missed_calls_count: u32,
    pub max_missed_allowed: u32,
    pub status: EnrollmentStatus,
}

impl Enrollment {
    /// Strikes left before suspension.
    pub fn strikes_remaining(&self) -> u32 {
        self.max_missed_allowed
            .saturating_sub(self.missed_calls_count)
    }
}

/// What an audit record documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Started,
    Suspended,
    StrikesReset,
    Completed,
    Dropped,
    Deserted,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Suspended => "suspended",
            Self::StrikesReset => "strikes_reset",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
            Self::Deserted => "deserted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "started" => Some(Self::Started),
            "suspended" => Some(Self::Suspended),
            "strikes_reset" => Some(Self::StrikesReset),
            "completed" => Some(Self::Completed),
            "dropped" => Some(Self::Dropped),
            "deserted" => Some(Self::Deserted),
            _ => None,
        }
    }
}

/// Immutable record of an enrollment lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub audit_uuid: Uuid,
    pub enrollment_id: i64,
    pub actor_id: i64,
    pub action: AuditAction,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        enrollment_id: i64,
        actor_id: i64,
        action: AuditAction,
        reason: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            audit_uuid: Uuid::new_v4(),
            enrollment_id,
            actor_id,
            action,
            reason,
            recorded_at,
        }
    }
}
