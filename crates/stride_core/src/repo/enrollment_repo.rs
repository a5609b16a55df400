//! Enrollment and audit trail repository.
//!
//! # Invariants
//! - At most one `active`/`suspended` enrollment per participant.
//! - `enrollment_audit` is append-only; storage triggers reject updates and
//!   deletes.

use crate::model::enrollment::{AuditAction, AuditRecord, Enrollment, EnrollmentStatus};
use crate::repo::{
    instant_to_db, parse_db_enum, parse_db_instant, parse_db_u32, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const ENROLLMENT_SELECT_SQL: &str = "SELECT
    id,
    participant_id,
    mentor_id,
    total_weeks,
    missed_calls_count,
    max_missed_allowed,
    status
FROM enrollments";

pub trait EnrollmentRepository {
    fn insert_enrollment(
        &self,
        participant_id: i64,
        mentor_id: i64,
        total_weeks: u32,
        max_missed_allowed: u32,
    ) -> RepoResult<Enrollment>;
    fn get_enrollment(&self, id: i64) -> RepoResult<Option<Enrollment>>;
    /// The participant's active or suspended enrollment with this mentor.
    fn open_enrollment(&self, participant_id: i64, mentor_id: i64)
        -> RepoResult<Option<Enrollment>>;
    /// Increments the strike counter and returns the new value.
    fn increment_missed(&self, id: i64) -> RepoResult<u32>;
    fn set_status(&self, id: i64, status: EnrollmentStatus) -> RepoResult<()>;
    /// Zeroes the strike counter and re-activates the enrollment.
    fn reset_strikes(&self, id: i64) -> RepoResult<()>;
    fn append_audit(&self, record: &AuditRecord) -> RepoResult<()>;
    fn list_audit(&self, enrollment_id: i64) -> RepoResult<Vec<AuditRecord>>;
}

pub struct SqliteEnrollmentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEnrollmentRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl EnrollmentRepository for SqliteEnrollmentRepository<'_> {
    fn insert_enrollment(
        &self,
        participant_id: i64,
        mentor_id: i64,
        total_weeks: u32,
        max_missed_allowed: u32,
    ) -> RepoResult<Enrollment> {
        self.conn.execute(
            "INSERT INTO enrollments (participant_id, mentor_id, total_weeks, max_missed_allowed)
             VALUES (?1, ?2, ?3, ?4);",
            params![participant_id, mentor_id, total_weeks, max_missed_allowed],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_enrollment(id)?.ok_or(RepoError::NotFound {
            entity: "enrollment",
            id,
        })
    }

    fn get_enrollment(&self, id: i64) -> RepoResult<Option<Enrollment>> {
        let enrollment = self
            .conn
            .query_row(
                &format!("{ENROLLMENT_SELECT_SQL} WHERE id = ?1;"),
                [id],
                |row| Ok(parse_enrollment_row(row)),
            )
            .optional()?;
        enrollment.transpose()
    }

    fn open_enrollment(
        &self,
        participant_id: i64,
        mentor_id: i64,
    ) -> RepoResult<Option<Enrollment>> {
        let enrollment = self
            .conn
            .query_row(
                &format!(
                    "{ENROLLMENT_SELECT_SQL}
                     WHERE participant_id = ?1
                       AND mentor_id = ?2
                       AND status IN ('active', 'suspended')
                     LIMIT 1;"
                ),
                params![participant_id, mentor_id],
                |row| Ok(parse_enrollment_row(row)),
            )
            .optional()?;
        enrollment.transpose()
    }

    fn increment_missed(&self, id: i64) -> RepoResult<u32> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET missed_calls_count = missed_calls_count + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "enrollment",
                id,
            });
        }
        let count: i64 = self.conn.query_row(
            "SELECT missed_calls_count FROM enrollments WHERE id = ?1;",
            [id],
            |row| row.get(0),
        )?;
        parse_db_u32(count, "enrollments.missed_calls_count")
    }

    fn set_status(&self, id: i64, status: EnrollmentStatus) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET status = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "enrollment",
                id,
            });
        }
        Ok(())
    }

    fn reset_strikes(&self, id: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET missed_calls_count = 0,
                 status = 'active',
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "enrollment",
                id,
            });
        }
        Ok(())
    }

    fn append_audit(&self, record: &AuditRecord) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO enrollment_audit (
                audit_uuid,
                enrollment_id,
                actor_id,
                action,
                reason,
                recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                record.audit_uuid.to_string(),
                record.enrollment_id,
                record.actor_id,
                record.action.as_str(),
                record.reason.as_deref(),
                instant_to_db(record.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn list_audit(&self, enrollment_id: i64) -> RepoResult<Vec<AuditRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT audit_uuid, enrollment_id, actor_id, action, reason, recorded_at
             FROM enrollment_audit
             WHERE enrollment_id = ?1
             ORDER BY recorded_at ASC, rowid ASC;",
        )?;
        let mut rows = stmt.query([enrollment_id])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_audit_row(row)?);
        }
        Ok(records)
    }
}

fn parse_enrollment_row(row: &Row<'_>) -> RepoResult<Enrollment> {
    let status_text: String = row.get("status")?;
    Ok(Enrollment {
        id: row.get("id")?,
        participant_id: row.get("participant_id")?,
        mentor_id: row.get("mentor_id")?,
        total_weeks: parse_db_u32(row.get("total_weeks")?, "enrollments.total_weeks")?,
        missed_calls_count: parse_db_u32(
            row.get("missed_calls_count")?,
            "enrollments.missed_calls_count",
        )?,
        max_missed_allowed: parse_db_u32(
            row.get("max_missed_allowed")?,
            "enrollments.max_missed_allowed",
        )?,
        status: parse_db_enum(&status_text, "enrollments.status", EnrollmentStatus::parse)?,
    })
}

fn parse_audit_row(row: &Row<'_>) -> RepoResult<AuditRecord> {
    let uuid_text: String = row.get("audit_uuid")?;
    let action_text: String = row.get("action")?;
    let audit_uuid = Uuid::parse_str(&uuid_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid uuid `{uuid_text}` in enrollment_audit.audit_uuid"
        ))
    })?;

    Ok(AuditRecord {
        audit_uuid,
        enrollment_id: row.get("enrollment_id")?,
        actor_id: row.get("actor_id")?,
        action: parse_db_enum(&action_text, "enrollment_audit.action", AuditAction::parse)?,
        reason: row.get("reason")?,
        recorded_at: parse_db_instant(row.get("recorded_at")?, "enrollment_audit.recorded_at")?,
    })
}
