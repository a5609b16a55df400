use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use stride_core::model::calendar::NewAvailabilityWindow;
use stride_core::{
    open_db_in_memory, AvailabilityService, CallType, EngineConfig, EngineContext, FixedClock,
    MemoryNotifier, ReservationService, Slot,
};

const MENTOR: i64 = 7;

#[test]
fn booked_slot_disappears_from_free_slots() {
    let harness = Harness::new();
    let availability = AvailabilityService::new(harness.ctx());
    availability
        .publish_window(&window(1, "09:00", "11:00", CallType::Mentorship))
        .unwrap();
    let reservations = ReservationService::new(harness.ctx());

    let before = reservations
        .available_slots(MENTOR, monday(), CallType::Mentorship)
        .unwrap();
    assert_eq!(starts(&before), vec!["09:00", "10:00"]);

    reservations
        .reserve(1, MENTOR, at(2030, 1, 7, 9, 0), CallType::Mentorship)
        .unwrap();

    let after = reservations
        .available_slots(MENTOR, monday(), CallType::Mentorship)
        .unwrap();
    assert_eq!(starts(&after), vec!["10:00"]);
    assert_eq!(after[0].starts_at, at(2030, 1, 7, 10, 0));
    assert_eq!(after[0].ends_at, at(2030, 1, 7, 11, 0));
}

#[test]
fn claims_of_any_call_type_block_the_mentor() {
    let harness = Harness::new();
    let availability = AvailabilityService::new(harness.ctx());
    availability
        .publish_window(&window(1, "09:00", "11:00", CallType::Mentorship))
        .unwrap();
    availability
        .publish_window(&window(1, "09:00", "11:00", CallType::Discipline))
        .unwrap();
    let reservations = ReservationService::new(harness.ctx());

    reservations
        .reserve(1, MENTOR, at(2030, 1, 7, 10, 0), CallType::Mentorship)
        .unwrap();

    let discipline = reservations
        .available_slots(MENTOR, monday(), CallType::Discipline)
        .unwrap();
    assert_eq!(starts(&discipline), vec!["09:00"]);
}

#[test]
fn exception_blocks_mentorship_but_not_discipline() {
    let harness = Harness::new();
    let availability = AvailabilityService::new(harness.ctx());
    availability
        .publish_window(&window(1, "09:00", "11:00", CallType::Mentorship))
        .unwrap();
    availability
        .publish_window(&window(1, "14:00", "15:00", CallType::Discipline))
        .unwrap();
    availability
        .add_exception(MENTOR, monday(), monday(), "conference")
        .unwrap();

    let mentorship = availability
        .free_template_slots(MENTOR, monday(), CallType::Mentorship, 60)
        .unwrap();
    assert!(mentorship.is_empty());

    let discipline = availability
        .free_template_slots(MENTOR, monday(), CallType::Discipline, 60)
        .unwrap();
    assert_eq!(starts(&discipline), vec!["14:00"]);

    let next_monday = NaiveDate::from_ymd_opt(2030, 1, 14).unwrap();
    let later = availability
        .free_template_slots(MENTOR, next_monday, CallType::Mentorship, 60)
        .unwrap();
    assert_eq!(starts(&later), vec!["09:00", "10:00"]);
}

#[test]
fn slots_already_started_are_not_offered() {
    let harness = Harness::new();
    harness.clock.set(at(2030, 1, 7, 9, 30));
    let availability = AvailabilityService::new(harness.ctx());
    availability
        .publish_window(&window(1, "09:00", "11:00", CallType::Mentorship))
        .unwrap();

    let slots = availability
        .free_template_slots(MENTOR, monday(), CallType::Mentorship, 60)
        .unwrap();
    assert_eq!(starts(&slots), vec!["10:00"]);
}

#[test]
fn zero_granularity_is_rejected() {
    let harness = Harness::new();
    let err = AvailabilityService::new(harness.ctx())
        .free_template_slots(MENTOR, monday(), CallType::Mentorship, 0)
        .unwrap_err();
    assert_eq!(err.code(), "validation.zero_granularity");
}

#[test]
fn deactivated_window_and_other_weekdays_yield_no_slots() {
    let harness = Harness::new();
    let availability = AvailabilityService::new(harness.ctx());
    let published = availability
        .publish_window(&window(1, "09:00", "11:00", CallType::Mentorship))
        .unwrap();

    let tuesday = NaiveDate::from_ymd_opt(2030, 1, 8).unwrap();
    assert!(availability
        .free_template_slots(MENTOR, tuesday, CallType::Mentorship, 60)
        .unwrap()
        .is_empty());

    availability.deactivate_window(published.id).unwrap();
    assert!(availability
        .free_template_slots(MENTOR, monday(), CallType::Mentorship, 60)
        .unwrap()
        .is_empty());
}

#[test]
fn invalid_windows_and_exceptions_are_rejected() {
    let harness = Harness::new();
    let availability = AvailabilityService::new(harness.ctx());

    let err = availability
        .publish_window(&window(1, "11:00", "09:00", CallType::Mentorship))
        .unwrap_err();
    assert_eq!(err.code(), "validation.empty_window");
    let err = availability
        .publish_window(&window(7, "09:00", "11:00", CallType::Mentorship))
        .unwrap_err();
    assert_eq!(err.code(), "validation.invalid_weekday");
    let err = availability
        .add_exception(MENTOR, monday(), NaiveDate::from_ymd_opt(2030, 1, 6).unwrap(), "")
        .unwrap_err();
    assert_eq!(err.code(), "validation.invalid_date_range");
}

#[test]
fn calendar_offset_shifts_slot_instants() {
    let mut harness = Harness::new();
    harness.config.scheduling.calendar_utc_offset_minutes = 120;
    let availability = AvailabilityService::new(harness.ctx());
    availability
        .publish_window(&window(1, "09:00", "10:00", CallType::Mentorship))
        .unwrap();

    let slots = availability
        .free_template_slots(MENTOR, monday(), CallType::Mentorship, 60)
        .unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].starts_at, at(2030, 1, 7, 7, 0));
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
            clock: FixedClock::new(at(2030, 1, 7, 0, 0)),
            notifier: MemoryNotifier::new(),
            config: EngineConfig::default(),
        }
    }

    fn ctx(&self) -> EngineContext<'_> {
        EngineContext::new(&self.conn, &self.clock, &self.notifier, &self.config)
    }
}

fn window(day_of_week: u8, start: &str, end: &str, call_type: CallType) -> NewAvailabilityWindow {
    NewAvailabilityWindow {
        mentor_id: MENTOR,
        day_of_week,
        start_time: start.parse().unwrap(),
        end_time: end.parse().unwrap(),
        call_type,
    }
}

fn starts(slots: &[Slot]) -> Vec<String> {
    slots.iter().map(|slot| slot.start.to_string()).collect()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
}
