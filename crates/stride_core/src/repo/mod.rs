//! Repository layer contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts per aggregate.
//! - Keep SQL and column encoding inside the persistence boundary.
//!
//! # Invariants
//! - Repositories never open transactions of their own; callers wrap
//!   multi-statement use cases in one transaction and hand the repository
//!   the transaction's connection.
//! - Read paths reject undecodable persisted values instead of masking them.
//! - Dates are stored as `YYYY-MM-DD` text, instants as epoch milliseconds.

pub mod action_repo;
pub mod calendar_repo;
pub mod claim_repo;
pub mod cycle_repo;
pub mod enrollment_repo;
pub mod task_repo;

use crate::db::DbError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by all aggregates.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound { entity: &'static str, id: i64 },
    InvalidData(String),
}

impl RepoError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_unique_violation())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn date_to_db(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_db_date(value: &str, column: &str) -> RepoResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| RepoError::InvalidData(format!("invalid date `{value}` in {column}")))
}

pub(crate) fn instant_to_db(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub(crate) fn parse_db_instant(value: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| RepoError::InvalidData(format!("invalid instant `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn parse_db_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean `{other}` in {column}"
        ))),
    }
}

pub(crate) fn parse_db_u32(value: i64, column: &str) -> RepoResult<u32> {
    u32::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid count `{value}` in {column}")))
}

/// Decodes a stored enum label through the model's `parse` function.
pub(crate) fn parse_db_enum<T>(
    value: &str,
    column: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> RepoResult<T> {
    parse(value).ok_or_else(|| RepoError::InvalidData(format!("invalid value `{value}` in {column}")))
}
