use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use stride_core::{
    open_db_in_memory, ActionDraft, EngineConfig, EngineContext, ErrorClass, ExpansionWarning,
    FixedClock, Frequency, MemoryNotifier, NotifyEvent, TaskService, TaskStatus,
};

#[test]
fn materializing_the_same_range_twice_inserts_nothing_new() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let action = tasks.create_action(&daily_draft(1)).unwrap();

    let first = tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 13))
        .unwrap();
    let second = tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 13))
        .unwrap();

    assert_eq!(first.inserted, 7);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 7);
    assert_eq!(tasks.list_for_action(action.id).unwrap().len(), 7);
}

#[test]
fn regenerate_keeps_completed_history_and_replaces_pending() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let action = tasks.create_action(&daily_draft(1)).unwrap();
    tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 13))
        .unwrap();

    let wednesday = instance_on(&tasks, action.id, date(2030, 1, 9));
    tasks.complete(wednesday, None).unwrap();

    let report = tasks
        .regenerate(action.id, date(2030, 1, 7), date(2030, 1, 13))
        .unwrap();
    assert_eq!(report.deleted, 6);
    assert_eq!(report.inserted, 6);
    assert_eq!(report.skipped, 1);

    let instances = tasks.list_for_action(action.id).unwrap();
    assert_eq!(instances.len(), 7);
    let completed: Vec<_> = instances
        .iter()
        .filter(|instance| instance.status == TaskStatus::Completed)
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].due_date, date(2030, 1, 9));
}

#[test]
fn regenerate_rejects_reversed_range() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let action = tasks.create_action(&daily_draft(1)).unwrap();

    let err = tasks
        .regenerate(action.id, date(2030, 1, 13), date(2030, 1, 7))
        .unwrap_err();
    assert_eq!(err.code(), "validation.invalid_date_range");
}

#[test]
fn deactivated_action_loses_future_pending_instances() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let action = tasks.create_action(&daily_draft(1)).unwrap();
    tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 10))
        .unwrap();

    let deleted = tasks.deactivate_action(action.id).unwrap();
    assert_eq!(deleted, 4);

    let report = tasks
        .regenerate(action.id, date(2030, 1, 7), date(2030, 1, 10))
        .unwrap();
    assert_eq!(report.inserted, 0);
    assert!(report.warnings.is_empty());
}

#[test]
fn completion_requires_evidence_when_action_demands_it() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let mut draft = daily_draft(1);
    draft.requires_evidence = true;
    let action = tasks.create_action(&draft).unwrap();
    tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 7))
        .unwrap();
    let instance_id = instance_on(&tasks, action.id, date(2030, 1, 7));

    let err = tasks.complete(instance_id, Some("   ")).unwrap_err();
    assert_eq!(err.code(), "validation.evidence_required");

    let completed = tasks
        .complete(instance_id, Some(" photo of the trail "))
        .unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.evidence.as_deref(), Some("photo of the trail"));
    assert!(completed.completed_at.is_some());

    let err = tasks.complete(instance_id, Some("again")).unwrap_err();
    assert_eq!(err.code(), "state.invalid_transition");
}

#[test]
fn postpone_moves_due_date_but_keeps_original() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let action = tasks.create_action(&weekly_draft(1, vec![1])).unwrap();
    tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 7))
        .unwrap();
    let instance_id = instance_on(&tasks, action.id, date(2030, 1, 7));

    let mut moved = tasks.postpone(instance_id, date(2030, 1, 8)).unwrap();
    moved = tasks.postpone(moved.id, date(2030, 1, 9)).unwrap();
    moved = tasks.postpone(moved.id, date(2030, 1, 10)).unwrap();

    assert_eq!(moved.due_date, date(2030, 1, 10));
    assert_eq!(moved.original_due_date, date(2030, 1, 7));
    assert_eq!(moved.postpone_count, 3);
    assert!(moved.is_rescheduled());

    let err = tasks.postpone(instance_id, date(2030, 1, 11)).unwrap_err();
    assert_eq!(err.code(), "state.postpone_limit_reached");
    assert_eq!(err.class(), ErrorClass::State);
}

#[test]
fn postpone_rejects_past_and_occupied_dates() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let action = tasks.create_action(&daily_draft(1)).unwrap();
    tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 8))
        .unwrap();
    let monday = instance_on(&tasks, action.id, date(2030, 1, 7));

    let err = tasks.postpone(monday, date(2030, 1, 6)).unwrap_err();
    assert_eq!(err.code(), "validation.invalid_field");

    let err = tasks.postpone(monday, date(2030, 1, 8)).unwrap_err();
    assert_eq!(err.code(), "validation.invalid_field");
    let unchanged = tasks.list_for_action(action.id).unwrap();
    assert!(unchanged.iter().all(|instance| instance.postpone_count == 0));
}

#[test]
fn postponed_original_date_is_not_materialized_again() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let action = tasks.create_action(&weekly_draft(1, vec![1])).unwrap();
    tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 7))
        .unwrap();
    let instance_id = instance_on(&tasks, action.id, date(2030, 1, 7));
    tasks.postpone(instance_id, date(2030, 1, 9)).unwrap();

    let report = tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 7))
        .unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.skipped, 1);
}

#[test]
fn cascade_cancel_only_touches_pending_instances_of_participant() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let mine = tasks.create_action(&daily_draft(1)).unwrap();
    let theirs = tasks.create_action(&daily_draft(2)).unwrap();
    for action in [&mine, &theirs] {
        tasks
            .materialize_range(action, date(2030, 1, 7), date(2030, 1, 9))
            .unwrap();
    }
    tasks
        .complete(instance_on(&tasks, mine.id, date(2030, 1, 7)), None)
        .unwrap();

    assert_eq!(tasks.cascade_cancel(1).unwrap(), 2);

    let cancelled = tasks.list_instances(1, Some(TaskStatus::Cancelled)).unwrap();
    assert_eq!(cancelled.len(), 2);
    let completed = tasks.list_instances(1, Some(TaskStatus::Completed)).unwrap();
    assert_eq!(completed.len(), 1);
    let other = tasks.list_instances(2, Some(TaskStatus::Pending)).unwrap();
    assert_eq!(other.len(), 3);
}

#[test]
fn empty_expansion_warns_and_notifies_participant() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    // Wednesday only, over a Monday..Tuesday range
    let action = tasks.create_action(&weekly_draft(4, vec![3])).unwrap();

    let report = tasks
        .materialize_range(&action, date(2030, 1, 7), date(2030, 1, 8))
        .unwrap();

    assert_eq!(report.inserted, 0);
    assert_eq!(
        report.warnings,
        vec![ExpansionWarning::ZeroInstances {
            action_id: action.id,
            from: date(2030, 1, 7),
            to: date(2030, 1, 8),
        }]
    );
    let intents = harness.notifier.intents();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].event, NotifyEvent::ZeroInstancesGenerated);
    assert_eq!(intents[0].recipient_id, 4);
}

#[test]
fn action_from_json_rejects_unknown_frequency() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());

    let err = tasks
        .create_action_from_json(
            1,
            &serde_json::json!({"description": "stretch", "frequency": "hourly"}),
        )
        .unwrap_err();
    assert_eq!(err.code(), "validation.unknown_frequency");
    assert_eq!(count_rows(&harness.conn, "actions"), 0);
}

#[test]
fn regenerate_all_reports_each_active_action() {
    let harness = Harness::new();
    let tasks = TaskService::new(harness.ctx());
    let daily = tasks.create_action(&daily_draft(1)).unwrap();
    let weekly = tasks.create_action(&weekly_draft(1, vec![1, 3])).unwrap();

    let summary = tasks
        .regenerate_all(1, date(2030, 1, 7), date(2030, 1, 13))
        .unwrap();

    assert!(summary.failed.is_empty());
    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(summary.total_inserted(), 9);
    let weekly_report = summary
        .succeeded
        .iter()
        .find(|(action_id, _)| *action_id == weekly.id)
        .map(|(_, report)| report)
        .unwrap();
    assert_eq!(weekly_report.inserted, 2);
    assert!(summary
        .succeeded
        .iter()
        .any(|(action_id, _)| *action_id == daily.id));
}

struct Harness {
    conn: Connection,
    clock: FixedClock,
    notifier: MemoryNotifier,
    config: EngineConfig,
}

impl Harness {
    fn new() -> Self {
        Self {
            conn: open_db_in_memory().unwrap(),
            clock: FixedClock::new(Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0).unwrap()),
            notifier: MemoryNotifier::new(),
            config: EngineConfig::default(),
        }
    }

    fn ctx(&self) -> EngineContext<'_> {
        EngineContext::new(&self.conn, &self.clock, &self.notifier, &self.config)
    }
}

fn daily_draft(participant_id: i64) -> ActionDraft {
    ActionDraft {
        participant_id,
        goal_id: None,
        description: "morning run".to_string(),
        frequency: Frequency::Daily,
        assigned_days: Vec::new(),
        specific_date: None,
        requires_evidence: false,
    }
}

fn weekly_draft(participant_id: i64, days: Vec<u8>) -> ActionDraft {
    ActionDraft {
        frequency: Frequency::Weekly,
        assigned_days: days,
        ..daily_draft(participant_id)
    }
}

fn instance_on(tasks: &TaskService<'_>, action_id: i64, due: NaiveDate) -> i64 {
    tasks
        .list_for_action(action_id)
        .unwrap()
        .into_iter()
        .find(|instance| instance.due_date == due)
        .map(|instance| instance.id)
        .unwrap()
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}
