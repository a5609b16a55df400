//! Domain model for the scheduling engine.
//!
//! # Responsibility
//! - Define the typed records shared by repositories and services.
//! - Convert loosely typed boundary input into closed enums.
//!
//! # Invariants
//! - Entities are keyed by integer row ids; relations are explicit
//!   foreign-key fields, never in-memory back-pointers.
//! - Weekday indices run from Sunday = 0 to Saturday = 6.

pub mod action;
pub mod calendar;
pub mod cycle;
pub mod enrollment;
pub mod task;

use chrono::{Datelike, NaiveDate};

/// Weekday index of `date`, Sunday = 0.
pub fn weekday_index(date: NaiveDate) -> u8 {
    // num_days_from_sunday is always within 0..=6
    date.weekday().num_days_from_sunday() as u8
}

/// Days elapsed since 1970-01-01 (negative before the epoch).
pub fn epoch_days(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    date.signed_duration_since(epoch).num_days()
}

#[cfg(test)]
mod tests {
    use super::{epoch_days, weekday_index};
    use chrono::NaiveDate;

    #[test]
    fn weekday_index_starts_on_sunday() {
        let sunday = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 13).unwrap();
        assert_eq!(weekday_index(sunday), 0);
        assert_eq!(weekday_index(monday), 1);
        assert_eq!(weekday_index(saturday), 6);
    }

    #[test]
    fn epoch_days_counts_from_unix_epoch() {
        assert_eq!(epoch_days(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), 0);
        assert_eq!(
            epoch_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            19_723
        );
        assert_eq!(
            epoch_days(NaiveDate::from_ymd_opt(1969, 12, 31).unwrap()),
            -1
        );
    }
}
