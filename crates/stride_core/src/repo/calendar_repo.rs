//! Mentor calendar template repository.
//!
//! # Responsibility
//! - Persist weekly availability windows, blackout exceptions and the
//!   per-mentor base price.
//!
//! # Invariants
//! - Times are stored as zero-padded `HH:MM`, so text order is time order.
//! - Window rows are deactivated, never deleted, once claims may reference
//!   their slots.

use crate::model::calendar::{
    AvailabilityException, AvailabilityWindow, CallType, NewAvailabilityWindow, TimeOfDay,
};
use crate::repo::{
    bool_to_int, date_to_db, parse_db_bool, parse_db_date, parse_db_enum, RepoError, RepoResult,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

const WINDOW_SELECT_SQL: &str = "SELECT
    id,
    mentor_id,
    day_of_week,
    start_time,
    end_time,
    call_type,
    is_active
FROM availability_windows";

const EXCEPTION_SELECT_SQL: &str = "SELECT
    id,
    mentor_id,
    start_date,
    end_date,
    reason
FROM availability_exceptions";

pub trait CalendarRepository {
    fn create_window(&self, window: &NewAvailabilityWindow) -> RepoResult<AvailabilityWindow>;
    fn get_window(&self, id: i64) -> RepoResult<Option<AvailabilityWindow>>;
    /// Active windows of one calendar, optionally restricted to one weekday.
    fn list_active_windows(
        &self,
        mentor_id: i64,
        call_type: CallType,
        day_of_week: Option<u8>,
    ) -> RepoResult<Vec<AvailabilityWindow>>;
    fn set_window_active(&self, id: i64, active: bool) -> RepoResult<()>;
    fn create_exception(
        &self,
        mentor_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: &str,
    ) -> RepoResult<AvailabilityException>;
    fn exceptions_covering(
        &self,
        mentor_id: i64,
        date: NaiveDate,
    ) -> RepoResult<Vec<AvailabilityException>>;
    fn get_base_price(&self, mentor_id: i64) -> RepoResult<Option<i64>>;
    fn set_base_price(&self, mentor_id: i64, base_price: i64) -> RepoResult<()>;
}

pub struct SqliteCalendarRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCalendarRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CalendarRepository for SqliteCalendarRepository<'_> {
    fn create_window(&self, window: &NewAvailabilityWindow) -> RepoResult<AvailabilityWindow> {
        self.conn.execute(
            "INSERT INTO availability_windows (
                mentor_id,
                day_of_week,
                start_time,
                end_time,
                call_type
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                window.mentor_id,
                window.day_of_week,
                window.start_time.to_string(),
                window.end_time.to_string(),
                window.call_type.as_str(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_window(id)?.ok_or(RepoError::NotFound {
            entity: "availability window",
            id,
        })
    }

    fn get_window(&self, id: i64) -> RepoResult<Option<AvailabilityWindow>> {
        let window = self
            .conn
            .query_row(
                &format!("{WINDOW_SELECT_SQL} WHERE id = ?1;"),
                [id],
                |row| Ok(parse_window_row(row)),
            )
            .optional()?;
        window.transpose()
    }

    fn list_active_windows(
        &self,
        mentor_id: i64,
        call_type: CallType,
        day_of_week: Option<u8>,
    ) -> RepoResult<Vec<AvailabilityWindow>> {
        let mut stmt = self.conn.prepare(&format!(
            "{WINDOW_SELECT_SQL}
             WHERE mentor_id = ?1
               AND call_type = ?2
               AND is_active = 1
               AND (?3 IS NULL OR day_of_week = ?3)
             ORDER BY day_of_week ASC, start_time ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params![mentor_id, call_type.as_str(), day_of_week])?;
        let mut windows = Vec::new();
        while let Some(row) = rows.next()? {
            windows.push(parse_window_row(row)?);
        }
        Ok(windows)
    }

    fn set_window_active(&self, id: i64, active: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE availability_windows SET is_active = ?2 WHERE id = ?1;",
            params![id, bool_to_int(active)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "availability window",
                id,
            });
        }
        Ok(())
    }

    fn create_exception(
        &self,
        mentor_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: &str,
    ) -> RepoResult<AvailabilityException> {
        self.conn.execute(
            "INSERT INTO availability_exceptions (mentor_id, start_date, end_date, reason)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                mentor_id,
                date_to_db(start_date),
                date_to_db(end_date),
                reason.trim()
            ],
        )?;
        Ok(AvailabilityException {
            id: self.conn.last_insert_rowid(),
            mentor_id,
            start_date,
            end_date,
            reason: reason.trim().to_string(),
        })
    }

    fn exceptions_covering(
        &self,
        mentor_id: i64,
        date: NaiveDate,
    ) -> RepoResult<Vec<AvailabilityException>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EXCEPTION_SELECT_SQL}
             WHERE mentor_id = ?1 AND start_date <= ?2 AND end_date >= ?2
             ORDER BY start_date ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params![mentor_id, date_to_db(date)])?;
        let mut exceptions = Vec::new();
        while let Some(row) = rows.next()? {
            exceptions.push(parse_exception_row(row)?);
        }
        Ok(exceptions)
    }

    fn get_base_price(&self, mentor_id: i64) -> RepoResult<Option<i64>> {
        let price = self
            .conn
            .query_row(
                "SELECT base_price FROM mentor_rates WHERE mentor_id = ?1;",
                [mentor_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(price)
    }

    fn set_base_price(&self, mentor_id: i64, base_price: i64) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO mentor_rates (mentor_id, base_price) VALUES (?1, ?2)
             ON CONFLICT(mentor_id) DO UPDATE SET base_price = excluded.base_price;",
            params![mentor_id, base_price],
        )?;
        Ok(())
    }
}

fn parse_time(value: &str, column: &str) -> RepoResult<TimeOfDay> {
    value
        .parse::<TimeOfDay>()
        .map_err(|_| RepoError::InvalidData(format!("invalid time `{value}` in {column}")))
}

fn parse_window_row(row: &Row<'_>) -> RepoResult<AvailabilityWindow> {
    let day_of_week: i64 = row.get("day_of_week")?;
    let day_of_week = u8::try_from(day_of_week)
        .ok()
        .filter(|day| *day <= 6)
        .ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid weekday `{day_of_week}` in availability_windows.day_of_week"
            ))
        })?;
    let start_text: String = row.get("start_time")?;
    let end_text: String = row.get("end_time")?;
    let call_type_text: String = row.get("call_type")?;

    Ok(AvailabilityWindow {
        id: row.get("id")?,
        mentor_id: row.get("mentor_id")?,
        day_of_week,
        start_time: parse_time(&start_text, "availability_windows.start_time")?,
        end_time: parse_time(&end_text, "availability_windows.end_time")?,
        call_type: parse_db_enum(&call_type_text, "availability_windows.call_type", |value| {
            value.parse::<CallType>().ok()
        })?,
        active: parse_db_bool(row.get("is_active")?, "availability_windows.is_active")?,
    })
}

fn parse_exception_row(row: &Row<'_>) -> RepoResult<AvailabilityException> {
    let start_text: String = row.get("start_date")?;
    let end_text: String = row.get("end_date")?;
    Ok(AvailabilityException {
        id: row.get("id")?,
        mentor_id: row.get("mentor_id")?,
        start_date: parse_db_date(&start_text, "availability_exceptions.start_date")?,
        end_date: parse_db_date(&end_text, "availability_exceptions.end_date")?,
        reason: row.get("reason")?,
    })
}
