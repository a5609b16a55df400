//! Schema migrations for the scheduling tables.
//!
//! # Responsibility
//! - Keep the ordered list of schema steps: task instances and cycles,
//!   then enrollments with their audit trail, then the mentor calendar.
//! - Bring a connection from its recorded version to the latest one in a
//!   single transaction.
//!
//! # Invariants
//! - Versions start at 1 and increase by exactly one per step.
//! - `PRAGMA user_version` always equals the last applied step.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "tasks",
        sql: include_str!("0001_tasks.sql"),
    },
    SchemaStep {
        version: 2,
        name: "enrollments",
        sql: include_str!("0002_enrollments.sql"),
    },
    SchemaStep {
        version: 3,
        name: "calendar",
        sql: include_str!("0003_calendar.sql"),
    },
];

/// Schema version this binary writes.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Applies every step newer than the connection's recorded version.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer binary.
/// - Any SQLite failure; the transaction is rolled back and the recorded
///   version is left untouched.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let recorded = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    let latest = latest_version();
    if recorded > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: recorded,
            latest_supported: latest,
        });
    }

    let pending: Vec<&SchemaStep> = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > recorded)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;

    let names: Vec<&str> = pending.iter().map(|step| step.name).collect();
    info!(
        "event=db_migrate module=db status=ok from={} to={} steps={}",
        recorded,
        latest,
        names.join(",")
    );
    Ok(())
}
