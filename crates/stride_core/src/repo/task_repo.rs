//! Task instance repository.
//!
//! # Invariants
//! - Inserts skip any (action, date) pair that already has an instance,
//!   matched on either `due_date` or `original_due_date`, whatever its
//!   status; history is never duplicated.
//! - Only `pending` rows are ever deleted or cancelled in bulk.

use crate::model::task::{TaskInstance, TaskStatus};
use crate::repo::{
    date_to_db, instant_to_db, parse_db_date, parse_db_enum, parse_db_instant, parse_db_u32,
    RepoError, RepoResult,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    participant_id,
    action_id,
    due_date,
    original_due_date,
    status,
    postpone_count,
    evidence,
    completed_at
FROM task_instances";

pub trait TaskRepository {
    /// Inserts one pending instance unless the pair already exists.
    fn insert_if_absent(&self, participant_id: i64, action_id: i64, date: NaiveDate)
        -> RepoResult<bool>;
    fn delete_pending_from(&self, action_id: i64, from: NaiveDate) -> RepoResult<usize>;
    fn delete_pending_for_participant(&self, participant_id: i64) -> RepoResult<usize>;
    fn cancel_pending_for_participant(&self, participant_id: i64) -> RepoResult<usize>;
    fn get_instance(&self, id: i64) -> RepoResult<Option<TaskInstance>>;
    fn list_for_action(&self, action_id: i64) -> RepoResult<Vec<TaskInstance>>;
    /// Instances of the action in any status.
    fn count_for_action(&self, action_id: i64) -> RepoResult<usize>;
    fn list_for_participant(
        &self,
        participant_id: i64,
        status: Option<TaskStatus>,
    ) -> RepoResult<Vec<TaskInstance>>;
    fn mark_completed(
        &self,
        id: i64,
        evidence: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> RepoResult<()>;
    fn reschedule(&self, id: i64, new_due_date: NaiveDate) -> RepoResult<()>;
    /// Moves pending instances due strictly before `cutoff` to `expired`.
    fn expire_pending_before(&self, cutoff: NaiveDate) -> RepoResult<usize>;
}

pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn list_where(&self, clause: &str, params: impl rusqlite::Params) -> RepoResult<Vec<TaskInstance>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT_SQL} WHERE {clause} ORDER BY due_date ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_task_row(row)?);
        }
        Ok(items)
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn insert_if_absent(
        &self,
        participant_id: i64,
        action_id: i64,
        date: NaiveDate,
    ) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO task_instances (participant_id, action_id, due_date, original_due_date)
             SELECT ?1, ?2, ?3, ?3
             WHERE NOT EXISTS (
                SELECT 1
                FROM task_instances
                WHERE action_id = ?2
                  AND (due_date = ?3 OR original_due_date = ?3)
             );",
            params![participant_id, action_id, date_to_db(date)],
        )?;
        Ok(inserted == 1)
    }

    fn delete_pending_from(&self, action_id: i64, from: NaiveDate) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM task_instances
             WHERE action_id = ?1
               AND status = 'pending'
               AND due_date >= ?2;",
            params![action_id, date_to_db(from)],
        )?;
        Ok(deleted)
    }

    fn delete_pending_for_participant(&self, participant_id: i64) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM task_instances
             WHERE participant_id = ?1 AND status = 'pending';",
            [participant_id],
        )?;
        Ok(deleted)
    }

    fn cancel_pending_for_participant(&self, participant_id: i64) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE task_instances
             SET status = 'cancelled',
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE participant_id = ?1 AND status = 'pending';",
            [participant_id],
        )?;
        Ok(changed)
    }

    fn get_instance(&self, id: i64) -> RepoResult<Option<TaskInstance>> {
        let instance = self
            .conn
            .query_row(&format!("{TASK_SELECT_SQL} WHERE id = ?1;"), [id], |row| {
                Ok(parse_task_row(row))
            })
            .optional()?;
        instance.transpose()
    }

    fn list_for_action(&self, action_id: i64) -> RepoResult<Vec<TaskInstance>> {
        self.list_where("action_id = ?1", [action_id])
    }

    fn count_for_action(&self, action_id: i64) -> RepoResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM task_instances WHERE action_id = ?1;",
            [action_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn list_for_participant(
        &self,
        participant_id: i64,
        status: Option<TaskStatus>,
    ) -> RepoResult<Vec<TaskInstance>> {
        match status {
            Some(status) => self.list_where(
                "participant_id = ?1 AND status = ?2",
                params![participant_id, status.as_str()],
            ),
            None => self.list_where("participant_id = ?1", [participant_id]),
        }
    }

    fn mark_completed(
        &self,
        id: i64,
        evidence: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE task_instances
             SET status = 'completed',
                 evidence = ?2,
                 completed_at = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1 AND status = 'pending';",
            params![id, evidence, instant_to_db(completed_at)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "pending task instance",
                id,
            });
        }
        Ok(())
    }

    fn reschedule(&self, id: i64, new_due_date: NaiveDate) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE task_instances
             SET due_date = ?2,
                 postpone_count = postpone_count + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1 AND status = 'pending';",
            params![id, date_to_db(new_due_date)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "pending task instance",
                id,
            });
        }
        Ok(())
    }

    fn expire_pending_before(&self, cutoff: NaiveDate) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE task_instances
             SET status = 'expired',
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE status = 'pending' AND due_date < ?1;",
            [date_to_db(cutoff)],
        )?;
        Ok(changed)
    }
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<TaskInstance> {
    let status_text: String = row.get("status")?;
    let due_text: String = row.get("due_date")?;
    let original_text: String = row.get("original_due_date")?;
    let completed_at = match row.get::<_, Option<i64>>("completed_at")? {
        Some(value) => Some(parse_db_instant(value, "task_instances.completed_at")?),
        None => None,
    };

    Ok(TaskInstance {
        id: row.get("id")?,
        participant_id: row.get("participant_id")?,
        action_id: row.get("action_id")?,
        due_date: parse_db_date(&due_text, "task_instances.due_date")?,
        original_due_date: parse_db_date(&original_text, "task_instances.original_due_date")?,
        status: parse_db_enum(&status_text, "task_instances.status", TaskStatus::parse)?,
        postpone_count: parse_db_u32(row.get("postpone_count")?, "task_instances.postpone_count")?,
        evidence: row.get("evidence")?,
        completed_at,
    })
}
