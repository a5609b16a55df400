use rusqlite::Connection;
use stride_core::db::migrations::latest_version;
use stride_core::db::{open_db, open_db_in_memory, DbError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "actions",
        "task_instances",
        "cycles",
        "vision_groups",
        "enrollments",
        "enrollment_audit",
        "availability_windows",
        "availability_exceptions",
        "calendar_claims",
        "fund_holds",
        "mentor_rates",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stride.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "calendar_claims");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn active_slot_index_rejects_second_claim_but_allows_after_cancel() {
    let conn = open_db_in_memory().unwrap();
    insert_claim(&conn, "confirmed").unwrap();

    let err = insert_claim(&conn, "pending").unwrap_err();
    assert!(DbError::Sqlite(err).is_unique_violation());

    conn.execute("UPDATE calendar_claims SET status = 'cancelled';", [])
        .unwrap();
    insert_claim(&conn, "confirmed").expect("cancelled claims free the slot");
}

#[test]
fn original_due_date_cannot_be_rewritten() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO actions (participant_id, description, frequency) VALUES (1, 'run', 'daily');",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO task_instances (participant_id, action_id, due_date, original_due_date)
         VALUES (1, 1, '2030-01-07', '2030-01-07');",
        [],
    )
    .unwrap();

    conn.execute("UPDATE task_instances SET due_date = '2030-01-09';", [])
        .expect("due date may move");
    let err = conn
        .execute(
            "UPDATE task_instances SET original_due_date = '2030-01-09';",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("immutable"));
}

#[test]
fn enrollment_audit_is_append_only() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO enrollments (participant_id, mentor_id, total_weeks, max_missed_allowed)
         VALUES (1, 2, 12, 3);",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO enrollment_audit (audit_uuid, enrollment_id, actor_id, action, recorded_at)
         VALUES ('a', 1, 2, 'started', 0);",
        [],
    )
    .unwrap();

    assert!(conn
        .execute("UPDATE enrollment_audit SET reason = 'edited';", [])
        .is_err());
    assert!(conn.execute("DELETE FROM enrollment_audit;", []).is_err());
}

fn insert_claim(conn: &Connection, status: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO calendar_claims (
            source, mentor_id, participant_id, scheduled_at, duration_minutes, call_type, status
         ) VALUES ('booking', 7, 1, 1893920400000, 60, 'mentorship', ?1);",
        [status],
    )
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
