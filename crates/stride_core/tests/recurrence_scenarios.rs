use chrono::{NaiveDate, TimeZone, Utc};
use stride_core::{
    open_db_in_memory, ActionDraft, BiweeklyAnchor, EngineConfig, EngineContext, FixedClock,
    Frequency, MemoryNotifier, RecurrenceExpander, RecurringAction, TaskService,
};

#[test]
fn biweekly_follows_unix_epoch_weeks_by_default() {
    let expander = RecurrenceExpander::default();
    let action = biweekly_action(vec![1, 4]);

    let dates = expander.expand(&action, date(2024, 1, 8), date(2024, 1, 21));

    assert_eq!(dates, vec![date(2024, 1, 8), date(2024, 1, 18)]);
}

#[test]
fn biweekly_on_and_off_weeks_alternate_across_a_month() {
    let expander = RecurrenceExpander::new(BiweeklyAnchor::UnixEpoch);
    let action = biweekly_action(vec![4]);

    let dates = expander.expand(&action, date(2024, 1, 1), date(2024, 1, 31));

    assert_eq!(
        dates,
        vec![date(2024, 1, 4), date(2024, 1, 18)],
        "every other Thursday"
    );
}

#[test]
fn configured_anchor_shifts_biweekly_materialization() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0).unwrap());
    let notifier = MemoryNotifier::new();
    let default_config = EngineConfig::default();
    let anchored_config = EngineConfig::from_toml_str(
        r#"
[cycle]
biweekly_anchor = "2030-01-07"
"#,
    )
    .unwrap();

    let epoch_tasks = TaskService::new(EngineContext::new(
        &conn,
        &clock,
        &notifier,
        &default_config,
    ));
    let anchored_tasks = TaskService::new(EngineContext::new(
        &conn,
        &clock,
        &notifier,
        &anchored_config,
    ));
    let draft = ActionDraft {
        participant_id: 1,
        goal_id: None,
        description: "long ride".to_string(),
        frequency: Frequency::Biweekly,
        assigned_days: vec![1],
        specific_date: None,
        requires_evidence: false,
    };
    let epoch_action = epoch_tasks.create_action(&draft).unwrap();
    let anchored_action = anchored_tasks.create_action(&draft).unwrap();

    epoch_tasks
        .materialize_range(&epoch_action, date(2030, 1, 7), date(2030, 1, 27))
        .unwrap();
    anchored_tasks
        .materialize_range(&anchored_action, date(2030, 1, 7), date(2030, 1, 27))
        .unwrap();

    assert_eq!(due_dates(&epoch_tasks, epoch_action.id), vec![date(2030, 1, 14)]);
    assert_eq!(
        due_dates(&anchored_tasks, anchored_action.id),
        vec![date(2030, 1, 7), date(2030, 1, 21)]
    );
}

#[test]
fn one_time_action_outside_range_lands_on_range_start() {
    let expander = RecurrenceExpander::default();
    let action = RecurringAction {
        frequency: Frequency::OneTime,
        specific_date: Some(date(2024, 3, 1)),
        ..biweekly_action(Vec::new())
    };

    assert_eq!(
        expander.expand(&action, date(2024, 1, 8), date(2024, 1, 14)),
        vec![date(2024, 1, 8)]
    );
    assert_eq!(
        expander.expand(&action, date(2024, 2, 20), date(2024, 3, 10)),
        vec![date(2024, 3, 1)]
    );
}

fn due_dates(tasks: &TaskService<'_>, action_id: i64) -> Vec<NaiveDate> {
    tasks
        .list_for_action(action_id)
        .unwrap()
        .into_iter()
        .map(|instance| instance.due_date)
        .collect()
}

fn biweekly_action(days: Vec<u8>) -> RecurringAction {
    RecurringAction {
        id: 1,
        participant_id: 1,
        goal_id: None,
        description: "swim".to_string(),
        frequency: Frequency::Biweekly,
        assigned_days: days,
        specific_date: None,
        requires_evidence: false,
        active: true,
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}
