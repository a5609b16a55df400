use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::Connection;
use stride_core::model::calendar::NewAvailabilityWindow;
use stride_core::{
    open_db_in_memory, AvailabilityService, CallType, EngineConfig, EngineContext, FixedClock,
    MemoryNotifier, OccupancyPricer, ReservationService,
};

const MENTOR: i64 = 7;

#[test]
fn three_quarter_occupancy_raises_price_by_half() {
    let harness = Harness::new();
    let reservations = ReservationService::new(harness.ctx());
    for hour in 1..=30 {
        reservations
            .request_mentorship(hour, MENTOR, harness.now() + Duration::hours(hour), None)
            .unwrap();
    }

    let quote = harness.price(MENTOR);
    assert_eq!(quote.base_price, 2_000);
    assert_eq!(quote.booked, 30);
    assert!((quote.booked_hours - 30.0).abs() < 1e-9);
    assert!((quote.capacity_hours - 40.0).abs() < 1e-9);
    assert!((quote.occupancy_rate - 0.75).abs() < 1e-9);
    assert_eq!(quote.multiplier, 1.5);
    assert_eq!(quote.final_price, 3_000);

    let next = reservations
        .request_mentorship(31, MENTOR, harness.now() + Duration::hours(31), None)
        .unwrap();
    let hold = next.hold.unwrap();
    assert_eq!(hold.base_price, 2_000);
    assert_eq!(hold.multiplier, 1.5);
    assert_eq!(hold.amount, 3_000);
}

#[test]
fn occupancy_follows_configured_session_length() {
    let mut harness = Harness::new();
    harness.config.scheduling.mentorship_slot_minutes = 30;
    let reservations = ReservationService::new(harness.ctx());
    for hour in 1..=30 {
        reservations
            .request_mentorship(hour, MENTOR, harness.now() + Duration::hours(hour), None)
            .unwrap();
    }

    let quote = harness.price(MENTOR);
    assert_eq!(quote.booked, 30);
    assert!((quote.booked_hours - 15.0).abs() < 1e-9);
    assert!((quote.occupancy_rate - 0.375).abs() < 1e-9);
    assert_eq!(quote.multiplier, 1.0);
    assert_eq!(quote.final_price, 2_000);
}

#[test]
fn cancelled_and_out_of_horizon_claims_are_not_counted() {
    let harness = Harness::new();
    let reservations = ReservationService::new(harness.ctx());
    let request = reservations
        .request_mentorship(1, MENTOR, harness.now() + Duration::hours(2), None)
        .unwrap();
    reservations
        .request_mentorship(2, MENTOR, harness.now() + Duration::days(45), None)
        .unwrap();
    reservations
        .request_mentorship(3, MENTOR, harness.now() + Duration::hours(5), None)
        .unwrap();
    assert_eq!(harness.price(MENTOR).booked, 2);

    reservations
        .reject_request(request.claim.id, MENTOR)
        .unwrap();
    let quote = harness.price(MENTOR);
    assert_eq!(quote.booked, 1);
    assert_eq!(quote.multiplier, 1.0);
    assert_eq!(quote.final_price, 2_000);
}

#[test]
fn unknown_mentor_uses_default_price_and_floor_capacity() {
    let harness = Harness::new();
    let quote = harness.price(MENTOR + 1);

    assert_eq!(quote.base_price, 1_000);
    assert_eq!(quote.capacity_hours, 0.0);
    assert_eq!(quote.occupancy_rate, 0.0);
    assert_eq!(quote.final_price, 1_000);
}

#[test]
fn negative_base_price_is_rejected() {
    let harness = Harness::new();
    let err = AvailabilityService::new(harness.ctx())
        .set_base_price(MENTOR, -5)
        .unwrap_err();
    assert_eq!(err.code(), "validation.invalid_field");
    assert_eq!(harness.price(MENTOR).base_price, 2_000);
}

struct Harness {
    conn: Connection,
    clock: FixedClock,
    notifier: MemoryNotifier,
    config: EngineConfig,
}

impl Harness {
    /// Mentor with two mentorship hours on each weekday and a 2000 base price.
    fn new() -> Self {
        let mut config = EngineConfig::default();
        config.pricing.weeks_per_horizon = 4.0;
        let harness = Self {
            conn: open_db_in_memory().unwrap(),
            clock: FixedClock::new(Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0).unwrap()),
            notifier: MemoryNotifier::new(),
            config,
        };
        for day in 1..=5 {
            AvailabilityService::new(harness.ctx())
                .publish_window(&NewAvailabilityWindow {
                    mentor_id: MENTOR,
                    day_of_week: day,
                    start_time: "09:00".parse().unwrap(),
                    end_time: "11:00".parse().unwrap(),
                    call_type: CallType::Mentorship,
                })
                .unwrap();
        }
        AvailabilityService::new(harness.ctx())
            .set_base_price(MENTOR, 2_000)
            .unwrap();
        harness
    }

    fn ctx(&self) -> EngineContext<'_> {
        EngineContext::new(&self.conn, &self.clock, &self.notifier, &self.config)
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx().now()
    }

    fn price(&self, mentor_id: i64) -> stride_core::PriceQuote {
        OccupancyPricer::new(&self.config.pricing)
            .price(&self.conn, mentor_id, self.now())
            .unwrap()
    }
}
