//! Occupancy-based mentorship pricing.
//!
//! # Invariants
//! - The multiplier is a non-decreasing step function of the occupancy
//!   rate.
//! - Quotes are computed from current state on the caller's connection and
//!   never cached.

use crate::config::PricingConfig;
use crate::model::calendar::CallType;
use crate::repo::calendar_repo::{CalendarRepository, SqliteCalendarRepository};
use crate::repo::claim_repo::{ClaimRepository, SqliteClaimRepository};
use crate::repo::RepoResult;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;

/// Upper occupancy bound (inclusive) and multiplier of each tier.
const TIERS: [(f64, f64); 3] = [(0.40, 1.0), (0.70, 1.2), (0.90, 1.5)];
const PEAK_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceQuote {
    pub mentor_id: i64,
    pub base_price: i64,
    /// Bookable hours over the pricing horizon.
    pub capacity_hours: f64,
    /// Sessions booked over the pricing horizon.
    pub booked: u32,
    /// Hours those sessions occupy; the occupancy numerator.
    pub booked_hours: f64,
    pub occupancy_rate: f64,
    pub multiplier: f64,
    pub final_price: i64,
}

pub fn multiplier_for_rate(rate: f64) -> f64 {
    TIERS
        .iter()
        .find(|(upper, _)| rate <= *upper)
        .map_or(PEAK_MULTIPLIER, |(_, multiplier)| *multiplier)
}

pub struct OccupancyPricer<'c> {
    config: &'c PricingConfig,
}

impl<'c> OccupancyPricer<'c> {
    pub fn new(config: &'c PricingConfig) -> Self {
        Self { config }
    }

    /// Pure pricing step: no storage access.
    pub fn quote(
        &self,
        mentor_id: i64,
        base_price: i64,
        weekly_hours: f64,
        booked: u32,
        booked_hours: f64,
    ) -> PriceQuote {
        let capacity_hours = weekly_hours * self.config.weeks_per_horizon;
        let occupancy_rate = booked_hours / capacity_hours.max(self.config.floor_capacity);
        let multiplier = multiplier_for_rate(occupancy_rate);
        PriceQuote {
            mentor_id,
            base_price,
            capacity_hours,
            booked,
            booked_hours,
            occupancy_rate,
            multiplier,
            final_price: (base_price as f64 * multiplier).round() as i64,
        }
    }

    /// Prices a mentor's next session against the state visible on `conn`.
    pub fn price(&self, conn: &Connection, mentor_id: i64, now: DateTime<Utc>) -> RepoResult<PriceQuote> {
        let calendar = SqliteCalendarRepository::new(conn);
        let base_price = calendar
            .get_base_price(mentor_id)?
            .unwrap_or(self.config.default_base_price);
        let weekly_minutes: u32 = calendar
            .list_active_windows(mentor_id, CallType::Mentorship, None)?
            .iter()
            .map(|window| window.length_minutes())
            .sum();
        let horizon_end = now + Duration::days(i64::from(self.config.horizon_days));
        let load = SqliteClaimRepository::new(conn).booked_load_between(
            mentor_id,
            CallType::Mentorship,
            now,
            horizon_end,
        )?;
        Ok(self.quote(
            mentor_id,
            base_price,
            f64::from(weekly_minutes) / 60.0,
            load.sessions,
            f64::from(load.minutes) / 60.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{multiplier_for_rate, OccupancyPricer};
    use crate::config::PricingConfig;

    #[test]
    fn tier_boundaries_are_inclusive() {
        assert_eq!(multiplier_for_rate(0.0), 1.0);
        assert_eq!(multiplier_for_rate(0.40), 1.0);
        assert_eq!(multiplier_for_rate(0.41), 1.2);
        assert_eq!(multiplier_for_rate(0.70), 1.2);
        assert_eq!(multiplier_for_rate(0.90), 1.5);
        assert_eq!(multiplier_for_rate(0.91), 2.0);
        assert_eq!(multiplier_for_rate(3.0), 2.0);
    }

    #[test]
    fn multiplier_never_decreases_with_rate() {
        let mut previous = 0.0;
        for step in 0..=200 {
            let multiplier = multiplier_for_rate(f64::from(step) / 100.0);
            assert!(multiplier >= previous);
            previous = multiplier;
        }
    }

    #[test]
    fn three_quarter_occupancy_prices_at_one_and_a_half() {
        let config = PricingConfig {
            weeks_per_horizon: 4.0,
            ..PricingConfig::default()
        };
        // 10 weekly hours over 4 weeks is 40 hours; 30 booked is 0.75
        let quote = OccupancyPricer::new(&config).quote(7, 1000, 10.0, 30, 30.0);
        assert_eq!(quote.occupancy_rate, 0.75);
        assert_eq!(quote.multiplier, 1.5);
        assert_eq!(quote.final_price, 1500);
    }

    #[test]
    fn empty_calendar_uses_floor_capacity() {
        let config = PricingConfig::default();
        let pricer = OccupancyPricer::new(&config);
        let quote = pricer.quote(7, 1000, 0.0, 0, 0.0);
        assert_eq!(quote.occupancy_rate, 0.0);
        assert_eq!(quote.final_price, 1000);

        let busy = pricer.quote(7, 1000, 0.0, 1, 1.0);
        assert_eq!(busy.multiplier, 2.0);
        assert_eq!(busy.final_price, 2000);
    }

    #[test]
    fn occupancy_is_measured_in_hours_not_sessions() {
        let config = PricingConfig {
            weeks_per_horizon: 4.0,
            ..PricingConfig::default()
        };
        // 30 half-hour sessions fill 15 of 40 hours
        let quote = OccupancyPricer::new(&config).quote(7, 1000, 10.0, 30, 15.0);
        assert_eq!(quote.booked, 30);
        assert_eq!(quote.occupancy_rate, 0.375);
        assert_eq!(quote.multiplier, 1.0);
    }
}
