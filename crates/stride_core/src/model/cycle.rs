//! Commitment cycle model.
//!
//! # Invariants
//! - `start_date <= end_date`.
//! - `last_generated_date`, when set, never exceeds `end_date` at the time
//!   it was written; extensions only move `end_date` forward.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Fixed-length personal cycle.
    Solo,
    /// Cycle bound to a vision group's shared dates.
    Vision,
}

impl CycleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Vision => "vision",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "solo" => Some(Self::Solo),
            "vision" => Some(Self::Vision),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Active,
    Closed,
}

impl CycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Inclusive date window of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl CycleWindow {
    pub fn length_days(&self) -> i64 {
        self.end_date
            .signed_duration_since(self.start_date)
            .num_days()
            + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cycle {
    pub id: i64,
    pub participant_id: i64,
    pub kind: CycleKind,
    pub vision_group_id: Option<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub last_generated_date: Option<NaiveDate>,
    pub status: CycleStatus,
}

impl Cycle {
    pub fn window(&self) -> CycleWindow {
        CycleWindow {
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }

    /// Dates not yet expanded into task instances, if any.
    pub fn ungenerated_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let from = match self.last_generated_date {
            Some(last) => last + Duration::days(1),
            None => self.start_date,
        };
        (from <= self.end_date).then_some((from, self.end_date))
    }
}

/// Shared dates for participants progressing together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisionGroup {
    pub id: i64,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Outcome of a successful cycle extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleExtension {
    pub cycle_id: i64,
    pub participant_id: i64,
    pub previous_end: NaiveDate,
    pub new_end: NaiveDate,
    pub additional_days: i64,
    /// First date that still needs expansion.
    pub regenerate_from: NaiveDate,
    pub regenerate_to: NaiveDate,
}
