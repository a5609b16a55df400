//! Recurring action repository.
//!
//! # Invariants
//! - `assigned_days` is stored as a JSON array in submission order (the
//!   first entry matters for MONTHLY rules).

use crate::model::action::{ActionDraft, Frequency, RecurringAction};
use crate::repo::{
    bool_to_int, date_to_db, parse_db_bool, parse_db_date, parse_db_enum, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const ACTION_SELECT_SQL: &str = "SELECT
    id,
    participant_id,
    goal_id,
    description,
    frequency,
    assigned_days,
    specific_date,
    requires_evidence,
    is_active
FROM actions";

pub trait ActionRepository {
    fn create_action(&self, draft: &ActionDraft) -> RepoResult<RecurringAction>;
    fn get_action(&self, id: i64) -> RepoResult<Option<RecurringAction>>;
    fn list_active_actions(&self, participant_id: i64) -> RepoResult<Vec<RecurringAction>>;
    fn set_action_active(&self, id: i64, active: bool) -> RepoResult<()>;
}

pub struct SqliteActionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActionRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ActionRepository for SqliteActionRepository<'_> {
    fn create_action(&self, draft: &ActionDraft) -> RepoResult<RecurringAction> {
        let assigned_days = serde_json::to_string(&draft.assigned_days)
            .map_err(|err| RepoError::InvalidData(format!("assigned_days encode: {err}")))?;
        self.conn.execute(
            "INSERT INTO actions (
                participant_id,
                goal_id,
                description,
                frequency,
                assigned_days,
                specific_date,
                requires_evidence
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                draft.participant_id,
                draft.goal_id,
                draft.description.trim(),
                draft.frequency.as_str(),
                assigned_days,
                draft.specific_date.map(date_to_db),
                bool_to_int(draft.requires_evidence),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_action(id)?
            .ok_or(RepoError::NotFound { entity: "action", id })
    }

    fn get_action(&self, id: i64) -> RepoResult<Option<RecurringAction>> {
        let action = self
            .conn
            .query_row(
                &format!("{ACTION_SELECT_SQL} WHERE id = ?1;"),
                [id],
                |row| Ok(parse_action_row(row)),
            )
            .optional()?;
        action.transpose()
    }

    fn list_active_actions(&self, participant_id: i64) -> RepoResult<Vec<RecurringAction>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ACTION_SELECT_SQL}
             WHERE participant_id = ?1 AND is_active = 1
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query([participant_id])?;
        let mut actions = Vec::new();
        while let Some(row) = rows.next()? {
            actions.push(parse_action_row(row)?);
        }
        Ok(actions)
    }

    fn set_action_active(&self, id: i64, active: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE actions SET is_active = ?2 WHERE id = ?1;",
            params![id, bool_to_int(active)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: "action", id });
        }
        Ok(())
    }
}

fn parse_action_row(row: &Row<'_>) -> RepoResult<RecurringAction> {
    let frequency_text: String = row.get("frequency")?;
    let frequency = parse_db_enum(&frequency_text, "actions.frequency", |value| {
        value.parse::<Frequency>().ok()
    })?;

    let days_text: String = row.get("assigned_days")?;
    let assigned_days: Vec<u8> = serde_json::from_str(&days_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid assigned_days `{days_text}` in actions.assigned_days"
        ))
    })?;

    let specific_date = match row.get::<_, Option<String>>("specific_date")? {
        Some(value) => Some(parse_db_date(&value, "actions.specific_date")?),
        None => None,
    };

    Ok(RecurringAction {
        id: row.get("id")?,
        participant_id: row.get("participant_id")?,
        goal_id: row.get("goal_id")?,
        description: row.get("description")?,
        frequency,
        assigned_days,
        specific_date,
        requires_evidence: parse_db_bool(
            row.get("requires_evidence")?,
            "actions.requires_evidence",
        )?,
        active: parse_db_bool(row.get("is_active")?, "actions.is_active")?,
    })
}
