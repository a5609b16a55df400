//! Calendar claim and fund hold repository.
//!
//! # Responsibility
//! - Store every reservation of mentor time, whichever path created it.
//! - Store the held funds attached to mentorship claims.
//!
//! # Invariants
//! - `idx_calendar_claims_active_slot` is the only double-booking guard;
//!   inserts surface its violation as a unique-constraint `RepoError`.
//! - "Active" means any status other than `cancelled`.

use crate::model::calendar::{
    AttendanceStatus, CalendarClaim, CallType, ClaimDraft, ClaimSource, ClaimStatus, FundHold,
    HoldStatus,
};
use crate::repo::{
    instant_to_db, parse_db_enum, parse_db_instant, parse_db_u32, RepoError, RepoResult,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const CLAIM_SELECT_SQL: &str = "SELECT
    id,
    source,
    mentor_id,
    participant_id,
    enrollment_id,
    scheduled_at,
    duration_minutes,
    call_type,
    status,
    attendance_status,
    topic
FROM calendar_claims";

const HOLD_SELECT_SQL: &str = "SELECT
    id,
    claim_id,
    participant_id,
    mentor_id,
    base_price,
    multiplier,
    amount,
    status
FROM fund_holds";

/// Insert shape of a fund hold.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFundHold {
    pub claim_id: i64,
    pub participant_id: i64,
    pub mentor_id: i64,
    pub base_price: i64,
    pub multiplier: f64,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookedLoad {
    pub sessions: u32,
    pub minutes: u32,
}

pub trait ClaimRepository {
    fn insert_claim(&self, draft: &ClaimDraft) -> RepoResult<CalendarClaim>;
    fn get_claim(&self, id: i64) -> RepoResult<Option<CalendarClaim>>;
    /// Active claims of a mentor with `from <= scheduled_at < to`.
    fn active_claims_between(
        &self,
        mentor_id: i64,
        call_type: Option<CallType>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<Vec<CalendarClaim>>;
    /// Active `booking` claims of a participant with `from <= scheduled_at < to`.
    fn participant_bookings_between(
        &self,
        participant_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<Vec<CalendarClaim>>;
    /// Sessions and minutes held by non-cancelled claims starting in
    /// `[from, to)`.
    fn booked_load_between(
        &self,
        mentor_id: i64,
        call_type: CallType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<BookedLoad>;
    fn set_claim_status(
        &self,
        id: i64,
        status: ClaimStatus,
        attendance: AttendanceStatus,
    ) -> RepoResult<()>;
    /// Deletes open claims of an enrollment scheduled after `after`.
    ///
    /// Returns the deleted claim ids.
    fn delete_future_open_claims(
        &self,
        enrollment_id: i64,
        after: DateTime<Utc>,
    ) -> RepoResult<Vec<i64>>;
    fn insert_fund_hold(&self, hold: &NewFundHold) -> RepoResult<FundHold>;
    fn hold_for_claim(&self, claim_id: i64) -> RepoResult<Option<FundHold>>;
    /// Releases held funds of a claim; returns how many holds changed.
    fn release_holds_for_claim(&self, claim_id: i64) -> RepoResult<usize>;
}

pub struct SqliteClaimRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteClaimRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn collect_claims(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> RepoResult<Vec<CalendarClaim>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut claims = Vec::new();
        while let Some(row) = rows.next()? {
            claims.push(parse_claim_row(row)?);
        }
        Ok(claims)
    }
}

impl ClaimRepository for SqliteClaimRepository<'_> {
    fn insert_claim(&self, draft: &ClaimDraft) -> RepoResult<CalendarClaim> {
        self.conn.execute(
            "INSERT INTO calendar_claims (
                source,
                mentor_id,
                participant_id,
                enrollment_id,
                scheduled_at,
                duration_minutes,
                call_type,
                status,
                topic
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                draft.source.as_str(),
                draft.mentor_id,
                draft.participant_id,
                draft.enrollment_id,
                instant_to_db(draft.scheduled_at),
                draft.duration_minutes,
                draft.call_type.as_str(),
                draft.status.as_str(),
                draft.topic.as_deref(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_claim(id)?.ok_or(RepoError::NotFound {
            entity: "calendar claim",
            id,
        })
    }

    fn get_claim(&self, id: i64) -> RepoResult<Option<CalendarClaim>> {
        let claim = self
            .conn
            .query_row(&format!("{CLAIM_SELECT_SQL} WHERE id = ?1;"), [id], |row| {
                Ok(parse_claim_row(row))
            })
            .optional()?;
        claim.transpose()
    }

    fn active_claims_between(
        &self,
        mentor_id: i64,
        call_type: Option<CallType>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<Vec<CalendarClaim>> {
        self.collect_claims(
            &format!(
                "{CLAIM_SELECT_SQL}
                 WHERE mentor_id = ?1
                   AND (?2 IS NULL OR call_type = ?2)
                   AND status <> 'cancelled'
                   AND scheduled_at >= ?3
                   AND scheduled_at < ?4
                 ORDER BY scheduled_at ASC, id ASC;"
            ),
            params![
                mentor_id,
                call_type.map(CallType::as_str),
                instant_to_db(from),
                instant_to_db(to)
            ],
        )
    }

    fn participant_bookings_between(
        &self,
        participant_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<Vec<CalendarClaim>> {
        self.collect_claims(
            &format!(
                "{CLAIM_SELECT_SQL}
                 WHERE participant_id = ?1
                   AND source = 'booking'
                   AND status <> 'cancelled'
                   AND scheduled_at >= ?2
                   AND scheduled_at < ?3
                 ORDER BY scheduled_at ASC, id ASC;"
            ),
            params![participant_id, instant_to_db(from), instant_to_db(to)],
        )
    }

    fn booked_load_between(
        &self,
        mentor_id: i64,
        call_type: CallType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepoResult<BookedLoad> {
        let (sessions, minutes): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(duration_minutes), 0)
             FROM calendar_claims
             WHERE mentor_id = ?1
               AND call_type = ?2
               AND status <> 'cancelled'
               AND scheduled_at >= ?3
               AND scheduled_at < ?4;",
            params![
                mentor_id,
                call_type.as_str(),
                instant_to_db(from),
                instant_to_db(to)
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(BookedLoad {
            sessions: parse_db_u32(sessions, "calendar_claims count")?,
            minutes: parse_db_u32(minutes, "calendar_claims duration sum")?,
        })
    }

    fn set_claim_status(
        &self,
        id: i64,
        status: ClaimStatus,
        attendance: AttendanceStatus,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE calendar_claims
             SET status = ?2,
                 attendance_status = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id, status.as_str(), attendance.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "calendar claim",
                id,
            });
        }
        Ok(())
    }

    fn delete_future_open_claims(
        &self,
        enrollment_id: i64,
        after: DateTime<Utc>,
    ) -> RepoResult<Vec<i64>> {
        let ids = {
            let mut stmt = self.conn.prepare(
                "SELECT id
                 FROM calendar_claims
                 WHERE enrollment_id = ?1
                   AND status IN ('pending', 'confirmed')
                   AND scheduled_at > ?2
                 ORDER BY scheduled_at ASC, id ASC;",
            )?;
            let mut rows = stmt.query(params![enrollment_id, instant_to_db(after)])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                ids.push(row.get::<_, i64>(0)?);
            }
            ids
        };

        for id in &ids {
            self.release_holds_for_claim(*id)?;
            self.conn
                .execute("DELETE FROM calendar_claims WHERE id = ?1;", [id])?;
        }
        Ok(ids)
    }

    fn insert_fund_hold(&self, hold: &NewFundHold) -> RepoResult<FundHold> {
        self.conn.execute(
            "INSERT INTO fund_holds (
                claim_id,
                participant_id,
                mentor_id,
                base_price,
                multiplier,
                amount,
                status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'held');",
            params![
                hold.claim_id,
                hold.participant_id,
                hold.mentor_id,
                hold.base_price,
                hold.multiplier,
                hold.amount,
            ],
        )?;
        Ok(FundHold {
            id: self.conn.last_insert_rowid(),
            claim_id: Some(hold.claim_id),
            participant_id: hold.participant_id,
            mentor_id: hold.mentor_id,
            base_price: hold.base_price,
            multiplier: hold.multiplier,
            amount: hold.amount,
            status: HoldStatus::Held,
        })
    }

    fn hold_for_claim(&self, claim_id: i64) -> RepoResult<Option<FundHold>> {
        let hold = self
            .conn
            .query_row(
                &format!("{HOLD_SELECT_SQL} WHERE claim_id = ?1 ORDER BY id DESC LIMIT 1;"),
                [claim_id],
                |row| Ok(parse_hold_row(row)),
            )
            .optional()?;
        hold.transpose()
    }

    fn release_holds_for_claim(&self, claim_id: i64) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE fund_holds
             SET status = 'released',
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE claim_id = ?1 AND status = 'held';",
            [claim_id],
        )?;
        Ok(changed)
    }
}

fn parse_claim_row(row: &Row<'_>) -> RepoResult<CalendarClaim> {
    let source_text: String = row.get("source")?;
    let call_type_text: String = row.get("call_type")?;
    let status_text: String = row.get("status")?;
    let attendance_text: String = row.get("attendance_status")?;

    Ok(CalendarClaim {
        id: row.get("id")?,
        source: parse_db_enum(&source_text, "calendar_claims.source", ClaimSource::parse)?,
        mentor_id: row.get("mentor_id")?,
        participant_id: row.get("participant_id")?,
        enrollment_id: row.get("enrollment_id")?,
        scheduled_at: parse_db_instant(row.get("scheduled_at")?, "calendar_claims.scheduled_at")?,
        duration_minutes: parse_db_u32(
            row.get("duration_minutes")?,
            "calendar_claims.duration_minutes",
        )?,
        call_type: parse_db_enum(&call_type_text, "calendar_claims.call_type", |value| {
            value.parse::<CallType>().ok()
        })?,
        status: parse_db_enum(&status_text, "calendar_claims.status", ClaimStatus::parse)?,
        attendance: parse_db_enum(
            &attendance_text,
            "calendar_claims.attendance_status",
            AttendanceStatus::parse,
        )?,
        topic: row.get("topic")?,
    })
}

fn parse_hold_row(row: &Row<'_>) -> RepoResult<FundHold> {
    let status_text: String = row.get("status")?;
    Ok(FundHold {
        id: row.get("id")?,
        claim_id: row.get("claim_id")?,
        participant_id: row.get("participant_id")?,
        mentor_id: row.get("mentor_id")?,
        base_price: row.get("base_price")?,
        multiplier: row.get("multiplier")?,
        amount: row.get("amount")?,
        status: parse_db_enum(&status_text, "fund_holds.status", HoldStatus::parse)?,
    })
}
