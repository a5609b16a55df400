//! Commitment cycle window management.
//!
//! # Responsibility
//! - Resolve the active date window a participant's actions expand into.
//! - Start, restart and extend cycles; manage vision groups.
//!
//! # Invariants
//! - Extensions strictly move `end_date` forward and never touch
//!   already-generated dates.
//! - A restart closes the old cycle and drops its pending instances in the
//!   same transaction that opens the new one.

use crate::error::{EngineResult, StateError, ValidationError};
use crate::model::cycle::{Cycle, CycleExtension, CycleKind, CycleStatus, CycleWindow, VisionGroup};
use crate::notify::{NotifyEvent, NotifyIntent};
use crate::repo::cycle_repo::{CycleRepository, SqliteCycleRepository};
use crate::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use crate::service::EngineContext;
use chrono::{Duration, NaiveDate};
use log::info;
use serde_json::json;

pub struct CycleService<'a> {
    ctx: EngineContext<'a>,
}

impl<'a> CycleService<'a> {
    pub fn new(ctx: EngineContext<'a>) -> Self {
        Self { ctx }
    }

    /// Active window of a participant, optionally restricted to one kind.
    pub fn active_window(
        &self,
        participant_id: i64,
        kind: Option<CycleKind>,
    ) -> EngineResult<CycleWindow> {
        Ok(self.active_cycle(participant_id, kind)?.window())
    }

    pub fn active_cycle(&self, participant_id: i64, kind: Option<CycleKind>) -> EngineResult<Cycle> {
        SqliteCycleRepository::new(self.ctx.conn)
            .active_cycle(participant_id, kind)?
            .ok_or_else(|| StateError::NoActiveCycle { participant_id }.into())
    }

    /// Opens a fixed-length SOLO cycle starting on `start_date`.
    pub fn start_solo_cycle(&self, participant_id: i64, start_date: NaiveDate) -> EngineResult<Cycle> {
        let end_date = self.solo_end(start_date);
        let tx = self.ctx.begin_immediate("cycle_start")?;
        let cycles = SqliteCycleRepository::new(&tx);
        if let Some(existing) = cycles.active_cycle(participant_id, Some(CycleKind::Solo))? {
            return Err(StateError::CycleAlreadyActive {
                participant_id,
                cycle_id: existing.id,
            }
            .into());
        }
        let cycle = cycles.insert_cycle(participant_id, CycleKind::Solo, None, start_date, end_date)?;
        tx.commit()?;
        info!(
            "event=cycle_start module=cycle status=ok cycle_id={} kind=solo start={} end={}",
            cycle.id, cycle.start_date, cycle.end_date
        );
        Ok(cycle)
    }

    /// Closes the active SOLO cycle, drops the participant's pending
    /// instances and opens a fresh cycle on `start_date`.
    pub fn restart_solo_cycle(
        &self,
        participant_id: i64,
        start_date: NaiveDate,
    ) -> EngineResult<Cycle> {
        let end_date = self.solo_end(start_date);
        let tx = self.ctx.begin_immediate("cycle_restart")?;
        let cycles = SqliteCycleRepository::new(&tx);
        let previous = cycles
            .active_cycle(participant_id, Some(CycleKind::Solo))?
            .ok_or(StateError::NoActiveCycle { participant_id })?;
        cycles.close_cycle(previous.id)?;
        let dropped = SqliteTaskRepository::new(&tx).delete_pending_for_participant(participant_id)?;
        let cycle = cycles.insert_cycle(participant_id, CycleKind::Solo, None, start_date, end_date)?;
        tx.commit()?;
        info!(
            "event=cycle_restart module=cycle status=ok previous_cycle_id={} cycle_id={} dropped_pending={}",
            previous.id, cycle.id, dropped
        );
        Ok(cycle)
    }

    pub fn create_vision_group(
        &self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> EngineResult<VisionGroup> {
        if name.trim().is_empty() {
            return Err(ValidationError::MissingField("name").into());
        }
        if start_date > end_date {
            return Err(ValidationError::InvalidDateRange {
                from: start_date,
                to: end_date,
            }
            .into());
        }
        Ok(SqliteCycleRepository::new(self.ctx.conn).create_vision_group(name, start_date, end_date)?)
    }

    /// Opens a VISION cycle sharing the group's dates.
    pub fn join_vision_group(&self, participant_id: i64, vision_group_id: i64) -> EngineResult<Cycle> {
        let tx = self.ctx.begin_immediate("vision_join")?;
        let cycles = SqliteCycleRepository::new(&tx);
        let group = cycles
            .get_vision_group(vision_group_id)?
            .ok_or(StateError::NotFound {
                entity: "vision group",
                id: vision_group_id,
            })?;
        if let Some(existing) = cycles.active_cycle(participant_id, Some(CycleKind::Vision))? {
            return Err(StateError::CycleAlreadyActive {
                participant_id,
                cycle_id: existing.id,
            }
            .into());
        }
        let cycle = cycles.insert_cycle(
            participant_id,
            CycleKind::Vision,
            Some(group.id),
            group.start_date,
            group.end_date,
        )?;
        tx.commit()?;
        Ok(cycle)
    }

    /// Moves a cycle's end date forward.
    ///
    /// # Errors
    /// - `InvalidExtension` unless `new_end_date` is strictly after the
    ///   current end date.
    /// - `InvalidTransition` for closed cycles.
    pub fn extend(&self, cycle_id: i64, new_end_date: NaiveDate) -> EngineResult<CycleExtension> {
        let tx = self.ctx.begin_immediate("cycle_extend")?;
        let cycles = SqliteCycleRepository::new(&tx);
        let cycle = cycles.get_cycle(cycle_id)?.ok_or(StateError::NotFound {
            entity: "cycle",
            id: cycle_id,
        })?;
        let extension = extend_cycle(&cycles, &cycle, new_end_date)?;
        tx.commit()?;

        self.ctx.dispatch(vec![extension_intent(&extension)]);
        Ok(extension)
    }

    /// Extends a vision group and every active member cycle together.
    pub fn extend_vision_group(
        &self,
        vision_group_id: i64,
        new_end_date: NaiveDate,
    ) -> EngineResult<Vec<CycleExtension>> {
        let tx = self.ctx.begin_immediate("vision_extend")?;
        let cycles = SqliteCycleRepository::new(&tx);
        let group = cycles
            .get_vision_group(vision_group_id)?
            .ok_or(StateError::NotFound {
                entity: "vision group",
                id: vision_group_id,
            })?;
        if new_end_date <= group.end_date {
            return Err(StateError::InvalidExtension {
                current_end: group.end_date,
                requested_end: new_end_date,
            }
            .into());
        }
        cycles.set_vision_group_end(group.id, new_end_date)?;

        let mut extensions = Vec::new();
        for member in cycles.active_cycles_in_group(group.id)? {
            // members whose cycle already runs past the new end keep it
            if member.end_date >= new_end_date {
                continue;
            }
            extensions.push(extend_cycle(&cycles, &member, new_end_date)?);
        }
        tx.commit()?;

        info!(
            "event=vision_extend module=cycle status=ok vision_group_id={} members={} new_end={}",
            group.id,
            extensions.len(),
            new_end_date
        );
        self.ctx
            .dispatch(extensions.iter().map(extension_intent).collect());
        Ok(extensions)
    }

    fn solo_end(&self, start_date: NaiveDate) -> NaiveDate {
        let days = i64::from(self.ctx.config.cycle.solo_cycle_days);
        start_date + Duration::days(days - 1)
    }
}

fn extend_cycle(
    cycles: &impl CycleRepository,
    cycle: &Cycle,
    new_end_date: NaiveDate,
) -> EngineResult<CycleExtension> {
    if cycle.status != CycleStatus::Active {
        return Err(StateError::InvalidTransition {
            entity: "cycle",
            id: cycle.id,
            from: cycle.status.as_str(),
            to: "extended",
        }
        .into());
    }
    if new_end_date <= cycle.end_date {
        return Err(StateError::InvalidExtension {
            current_end: cycle.end_date,
            requested_end: new_end_date,
        }
        .into());
    }
    cycles.set_cycle_end(cycle.id, new_end_date)?;

    let regenerate_from = match cycle.last_generated_date {
        Some(last) => last + Duration::days(1),
        None => cycle.start_date,
    };
    info!(
        "event=cycle_extend module=cycle status=ok cycle_id={} previous_end={} new_end={}",
        cycle.id, cycle.end_date, new_end_date
    );
    Ok(CycleExtension {
        cycle_id: cycle.id,
        participant_id: cycle.participant_id,
        previous_end: cycle.end_date,
        new_end: new_end_date,
        additional_days: (new_end_date - cycle.end_date).num_days(),
        regenerate_from,
        regenerate_to: new_end_date,
    })
}

fn extension_intent(extension: &CycleExtension) -> NotifyIntent {
    NotifyIntent::new(
        extension.participant_id,
        NotifyEvent::CycleExtended,
        json!({
            "cycle_id": extension.cycle_id,
            "previous_end": extension.previous_end,
            "new_end": extension.new_end,
            "additional_days": extension.additional_days,
        }),
    )
}
