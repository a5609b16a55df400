//! Time source and calendar-local date arithmetic.
//!
//! # Responsibility
//! - Abstract "now" so availability and reservation rules can be tested at
//!   a frozen instant.
//! - Convert between stored UTC instants and the calendar's wall clock.
//!
//! # Invariants
//! - The calendar offset is fixed; the engine performs no timezone
//!   inference.

use crate::model::calendar::TimeOfDay;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc};
use std::sync::Mutex;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually controlled clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Fixed UTC offset in which mentor windows and due dates are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarOffset(FixedOffset);

impl CalendarOffset {
    /// Builds an offset from minutes east of UTC; out-of-range values
    /// (beyond ±23:59) fall back to UTC.
    pub fn from_minutes(minutes: i32) -> Self {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self(offset)
    }

    pub fn utc() -> Self {
        Self::from_minutes(0)
    }

    /// Calendar date of an instant.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.0).date_naive()
    }

    /// Minutes after local midnight of an instant.
    pub fn local_minutes(&self, instant: DateTime<Utc>) -> u32 {
        instant.with_timezone(&self.0).time().num_seconds_from_midnight() / 60
    }

    /// UTC instant of `time` on `date` in this calendar.
    pub fn instant_at(&self, date: NaiveDate, time: TimeOfDay) -> DateTime<Utc> {
        let naive = date.and_time(time.to_naive_time());
        // a fixed offset has exactly one mapping per local time
        self.0
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }

    /// UTC instant of local midnight starting `date`.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        self.instant_at(date, TimeOfDay::MIDNIGHT)
    }

    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        self.local_date(clock.now())
    }
}

impl Default for CalendarOffset {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::{CalendarOffset, Clock, FixedClock};
    use crate::model::calendar::TimeOfDay;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    #[test]
    fn fixed_clock_can_be_advanced() {
        let start = Utc.with_ymd_and_hms(2030, 1, 7, 8, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), start + Duration::hours(2));
    }

    #[test]
    fn offset_maps_wall_clock_to_utc() {
        let offset = CalendarOffset::from_minutes(-300);
        let date = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        let nine: TimeOfDay = "09:00".parse().unwrap();
        let instant = offset.instant_at(date, nine);
        assert_eq!(instant, Utc.with_ymd_and_hms(2030, 1, 7, 14, 0, 0).unwrap());
        assert_eq!(offset.local_date(instant), date);
        assert_eq!(offset.local_minutes(instant), 540);
    }

    #[test]
    fn local_date_crosses_midnight_with_offset() {
        let offset = CalendarOffset::from_minutes(120);
        let late_utc = Utc.with_ymd_and_hms(2030, 1, 7, 23, 30, 0).unwrap();
        assert_eq!(
            offset.local_date(late_utc),
            NaiveDate::from_ymd_opt(2030, 1, 8).unwrap()
        );
    }
}
