//! Mentor availability calculation.
//!
//! # Responsibility
//! - Publish weekly availability windows and blackout exceptions.
//! - Store the base price mentorship quotes start from.
//! - Derive a day's theoretical slots from the weekly template.
//!
//! # Invariants
//! - Exceptions block MENTORSHIP slots only; DISCIPLINE ignores them.
//! - A slot is emitted only when it ends at or before its window's end.
//! - Output is sorted by start time without duplicates and contains only
//!   slots starting strictly after "now".

use crate::error::{EngineResult, ValidationError};
use crate::model::calendar::{
    AvailabilityException, AvailabilityWindow, CallType, NewAvailabilityWindow, Slot, TimeOfDay,
};
use crate::model::weekday_index;
use crate::repo::calendar_repo::{CalendarRepository, SqliteCalendarRepository};
use crate::service::EngineContext;
use chrono::NaiveDate;
use log::info;

pub struct AvailabilityService<'a> {
    ctx: EngineContext<'a>,
}

impl<'a> AvailabilityService<'a> {
    pub fn new(ctx: EngineContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn publish_window(&self, window: &NewAvailabilityWindow) -> EngineResult<AvailabilityWindow> {
        window.validate()?;
        let created = SqliteCalendarRepository::new(self.ctx.conn).create_window(window)?;
        info!(
            "event=window_publish module=availability status=ok window_id={} mentor_id={} call_type={}",
            created.id, created.mentor_id, created.call_type
        );
        Ok(created)
    }

    pub fn deactivate_window(&self, window_id: i64) -> EngineResult<()> {
        SqliteCalendarRepository::new(self.ctx.conn).set_window_active(window_id, false)?;
        Ok(())
    }

    pub fn add_exception(
        &self,
        mentor_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: &str,
    ) -> EngineResult<AvailabilityException> {
        if start_date > end_date {
            return Err(ValidationError::InvalidDateRange {
                from: start_date,
                to: end_date,
            }
            .into());
        }
        Ok(SqliteCalendarRepository::new(self.ctx.conn)
            .create_exception(mentor_id, start_date, end_date, reason)?)
    }

    /// Sets the base price mentorship quotes start from.
    pub fn set_base_price(&self, mentor_id: i64, base_price: i64) -> EngineResult<()> {
        if base_price < 0 {
            return Err(ValidationError::InvalidField {
                field: "base_price",
                message: "must not be negative".to_string(),
            }
            .into());
        }
        SqliteCalendarRepository::new(self.ctx.conn).set_base_price(mentor_id, base_price)?;
        Ok(())
    }

    /// Theoretical open slots of one calendar on `date`, before subtracting
    /// existing claims.
    pub fn free_template_slots(
        &self,
        mentor_id: i64,
        date: NaiveDate,
        call_type: CallType,
        granularity_minutes: u32,
    ) -> EngineResult<Vec<Slot>> {
        if granularity_minutes == 0 {
            return Err(ValidationError::ZeroGranularity.into());
        }
        let calendar = SqliteCalendarRepository::new(self.ctx.conn);
        if call_type == CallType::Mentorship
            && !calendar.exceptions_covering(mentor_id, date)?.is_empty()
        {
            return Ok(Vec::new());
        }

        let windows =
            calendar.list_active_windows(mentor_id, call_type, Some(weekday_index(date)))?;
        let offset = self.ctx.offset();
        let now = self.ctx.now();
        let slots = template_slots(&windows, granularity_minutes)
            .into_iter()
            .map(|(start, end)| Slot {
                date,
                start,
                end,
                starts_at: offset.instant_at(date, start),
                ends_at: offset.instant_at(date, end),
            })
            .filter(|slot| slot.starts_at > now)
            .collect();
        Ok(slots)
    }
}

/// Walks each window in `granularity_minutes` steps and returns the
/// `(start, end)` pairs that fit, sorted and de-duplicated by start.
pub fn template_slots(
    windows: &[AvailabilityWindow],
    granularity_minutes: u32,
) -> Vec<(TimeOfDay, TimeOfDay)> {
    let mut slots = Vec::new();
    if granularity_minutes == 0 {
        return slots;
    }
    for window in windows {
        let window_end = window.end_time.minutes();
        let mut start = window.start_time.minutes();
        while start + granularity_minutes <= window_end {
            if let (Some(from), Some(to)) = (
                TimeOfDay::from_minutes(start),
                TimeOfDay::from_minutes(start + granularity_minutes),
            ) {
                slots.push((from, to));
            }
            start += granularity_minutes;
        }
    }
    slots.sort();
    slots.dedup_by_key(|slot| slot.0);
    slots
}
