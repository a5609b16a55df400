//! Task instance model.
//!
//! # Invariants
//! - `original_due_date` is set once at materialization and never changes;
//!   rescheduling only moves `due_date`.
//! - At most one `Pending` instance exists per `(action_id, due_date)`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Lifecycle of one dated occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Cancelled,
    /// Deadline passed without completion; set by the periodic sweep.
    Expired,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// One concrete occurrence of a recurring action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInstance {
    pub id: i64,
    pub participant_id: i64,
    pub action_id: i64,
    pub due_date: NaiveDate,
    pub original_due_date: NaiveDate,
    pub status: TaskStatus,
    pub postpone_count: u32,
    pub evidence: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskInstance {
    /// Days between the first assigned date and `today` for an open
    /// instance; zero once it is no longer pending or not yet due.
    ///
    /// Measured from `original_due_date` so rescheduling does not hide drift.
    pub fn overdue_days(&self, today: NaiveDate) -> i64 {
        if self.status != TaskStatus::Pending {
            return 0;
        }
        today
            .signed_duration_since(self.original_due_date)
            .num_days()
            .max(0)
    }

    pub fn is_rescheduled(&self) -> bool {
        self.due_date != self.original_due_date
    }
}
