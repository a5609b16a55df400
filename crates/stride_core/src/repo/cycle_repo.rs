//! Cycle and vision group repository.
//!
//! # Invariants
//! - At most one `active` cycle per participant and kind
//!   (`idx_cycles_one_active_per_kind`).
//! - `end_date` only moves forward through [`CycleRepository::set_cycle_end`];
//!   the service layer checks the direction.

use crate::model::cycle::{Cycle, CycleKind, CycleStatus, VisionGroup};
use crate::repo::{date_to_db, parse_db_date, parse_db_enum, RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

const CYCLE_SELECT_SQL: &str = "SELECT
    id,
    participant_id,
    kind,
    vision_group_id,
    start_date,
    end_date,
    last_generated_date,
    status
FROM cycles";

pub trait CycleRepository {
    fn create_vision_group(
        &self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> RepoResult<VisionGroup>;
    fn get_vision_group(&self, id: i64) -> RepoResult<Option<VisionGroup>>;
    fn set_vision_group_end(&self, id: i64, end_date: NaiveDate) -> RepoResult<()>;
    fn insert_cycle(
        &self,
        participant_id: i64,
        kind: CycleKind,
        vision_group_id: Option<i64>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> RepoResult<Cycle>;
    fn get_cycle(&self, id: i64) -> RepoResult<Option<Cycle>>;
    /// Most recent active cycle of a participant, optionally of one kind.
    fn active_cycle(&self, participant_id: i64, kind: Option<CycleKind>)
        -> RepoResult<Option<Cycle>>;
    fn list_active_cycles(&self) -> RepoResult<Vec<Cycle>>;
    fn active_cycles_in_group(&self, vision_group_id: i64) -> RepoResult<Vec<Cycle>>;
    fn set_cycle_end(&self, id: i64, end_date: NaiveDate) -> RepoResult<()>;
    fn set_last_generated(&self, id: i64, date: NaiveDate) -> RepoResult<()>;
    fn close_cycle(&self, id: i64) -> RepoResult<()>;
}

pub struct SqliteCycleRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCycleRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn collect_cycles(&self, sql: &str, params: impl rusqlite::Params) -> RepoResult<Vec<Cycle>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut cycles = Vec::new();
        while let Some(row) = rows.next()? {
            cycles.push(parse_cycle_row(row)?);
        }
        Ok(cycles)
    }

    fn update_cycle(&self, id: i64, sql: &str, params: impl rusqlite::Params) -> RepoResult<()> {
        let changed = self.conn.execute(sql, params)?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: "cycle", id });
        }
        Ok(())
    }
}

impl CycleRepository for SqliteCycleRepository<'_> {
    fn create_vision_group(
        &self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> RepoResult<VisionGroup> {
        self.conn.execute(
            "INSERT INTO vision_groups (name, start_date, end_date) VALUES (?1, ?2, ?3);",
            params![name.trim(), date_to_db(start_date), date_to_db(end_date)],
        )?;
        Ok(VisionGroup {
            id: self.conn.last_insert_rowid(),
            name: name.trim().to_string(),
            start_date,
            end_date,
        })
    }

    fn get_vision_group(&self, id: i64) -> RepoResult<Option<VisionGroup>> {
        let group = self
            .conn
            .query_row(
                "SELECT id, name, start_date, end_date FROM vision_groups WHERE id = ?1;",
                [id],
                |row| Ok(parse_group_row(row)),
            )
            .optional()?;
        group.transpose()
    }

    fn set_vision_group_end(&self, id: i64, end_date: NaiveDate) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE vision_groups SET end_date = ?2 WHERE id = ?1;",
            params![id, date_to_db(end_date)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "vision group",
                id,
            });
        }
        Ok(())
    }

    fn insert_cycle(
        &self,
        participant_id: i64,
        kind: CycleKind,
        vision_group_id: Option<i64>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> RepoResult<Cycle> {
        self.conn.execute(
            "INSERT INTO cycles (participant_id, kind, vision_group_id, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                participant_id,
                kind.as_str(),
                vision_group_id,
                date_to_db(start_date),
                date_to_db(end_date)
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_cycle(id)?
            .ok_or(RepoError::NotFound { entity: "cycle", id })
    }

    fn get_cycle(&self, id: i64) -> RepoResult<Option<Cycle>> {
        let cycle = self
            .conn
            .query_row(&format!("{CYCLE_SELECT_SQL} WHERE id = ?1;"), [id], |row| {
                Ok(parse_cycle_row(row))
            })
            .optional()?;
        cycle.transpose()
    }

    fn active_cycle(
        &self,
        participant_id: i64,
        kind: Option<CycleKind>,
    ) -> RepoResult<Option<Cycle>> {
        let cycle = self
            .conn
            .query_row(
                &format!(
                    "{CYCLE_SELECT_SQL}
                     WHERE participant_id = ?1
                       AND status = 'active'
                       AND (?2 IS NULL OR kind = ?2)
                     ORDER BY id DESC
                     LIMIT 1;"
                ),
                params![participant_id, kind.map(CycleKind::as_str)],
                |row| Ok(parse_cycle_row(row)),
            )
            .optional()?;
        cycle.transpose()
    }

    fn list_active_cycles(&self) -> RepoResult<Vec<Cycle>> {
        self.collect_cycles(
            &format!("{CYCLE_SELECT_SQL} WHERE status = 'active' ORDER BY id ASC;"),
            [],
        )
    }

    fn active_cycles_in_group(&self, vision_group_id: i64) -> RepoResult<Vec<Cycle>> {
        self.collect_cycles(
            &format!(
                "{CYCLE_SELECT_SQL}
                 WHERE vision_group_id = ?1 AND status = 'active'
                 ORDER BY id ASC;"
            ),
            [vision_group_id],
        )
    }

    fn set_cycle_end(&self, id: i64, end_date: NaiveDate) -> RepoResult<()> {
        self.update_cycle(
            id,
            "UPDATE cycles
             SET end_date = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id, date_to_db(end_date)],
        )
    }

    fn set_last_generated(&self, id: i64, date: NaiveDate) -> RepoResult<()> {
        self.update_cycle(
            id,
            "UPDATE cycles
             SET last_generated_date = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id, date_to_db(date)],
        )
    }

    fn close_cycle(&self, id: i64) -> RepoResult<()> {
        self.update_cycle(
            id,
            "UPDATE cycles
             SET status = 'closed',
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )
    }
}

fn parse_cycle_row(row: &Row<'_>) -> RepoResult<Cycle> {
    let kind_text: String = row.get("kind")?;
    let status_text: String = row.get("status")?;
    let start_text: String = row.get("start_date")?;
    let end_text: String = row.get("end_date")?;
    let last_generated_date = match row.get::<_, Option<String>>("last_generated_date")? {
        Some(value) => Some(parse_db_date(&value, "cycles.last_generated_date")?),
        None => None,
    };

    Ok(Cycle {
        id: row.get("id")?,
        participant_id: row.get("participant_id")?,
        kind: parse_db_enum(&kind_text, "cycles.kind", CycleKind::parse)?,
        vision_group_id: row.get("vision_group_id")?,
        start_date: parse_db_date(&start_text, "cycles.start_date")?,
        end_date: parse_db_date(&end_text, "cycles.end_date")?,
        last_generated_date,
        status: parse_db_enum(&status_text, "cycles.status", CycleStatus::parse)?,
    })
}

fn parse_group_row(row: &Row<'_>) -> RepoResult<VisionGroup> {
    let start_text: String = row.get("start_date")?;
    let end_text: String = row.get("end_date")?;
    Ok(VisionGroup {
        id: row.get("id")?,
        name: row.get("name")?,
        start_date: parse_db_date(&start_text, "vision_groups.start_date")?,
        end_date: parse_db_date(&end_text, "vision_groups.end_date")?,
    })
}
