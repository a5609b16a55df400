//! Task instance materialization service.
//!
//! # Responsibility
//! - Turn recurrence expansion output into persisted task instances.
//! - Own action-level regeneration, cascading cancellation and the
//!   participant-facing complete/postpone transitions.
//!
//! # Invariants
//! - Materialization is idempotent: re-running over the same range inserts
//!   nothing new.
//! - Only `pending` instances are ever deleted; completed, cancelled and
//!   expired history survives every regeneration.
//! - Each action is materialized in its own transaction.

use crate::error::{EngineError, EngineResult, StateError, ValidationError};
use crate::model::action::{ActionDraft, Frequency, RecurringAction};
use crate::model::cycle::Cycle;
use crate::model::task::{TaskInstance, TaskStatus};
use crate::notify::{NotifyEvent, NotifyIntent};
use crate::recurrence::{ExpansionWarning, RecurrenceExpander};
use crate::repo::action_repo::{ActionRepository, SqliteActionRepository};
use crate::repo::cycle_repo::{CycleRepository, SqliteCycleRepository};
use crate::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use crate::service::EngineContext;
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use serde_json::json;

/// Outcome of materializing one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub inserted: usize,
    pub skipped: usize,
    /// Pending instances removed before re-materializing.
    pub deleted: usize,
    pub warnings: Vec<ExpansionWarning>,
}

/// Per-action outcome of a run over several actions.
#[derive(Debug, Default)]
pub struct RegenerateSummary {
    pub succeeded: Vec<(i64, MaterializeReport)>,
    pub failed: Vec<(i64, EngineError)>,
}

impl RegenerateSummary {
    pub fn total_inserted(&self) -> usize {
        self.succeeded.iter().map(|(_, report)| report.inserted).sum()
    }

    pub fn failed_action_ids(&self) -> Vec<i64> {
        self.failed.iter().map(|(action_id, _)| *action_id).collect()
    }
}

pub struct TaskService<'a> {
    ctx: EngineContext<'a>,
    expander: RecurrenceExpander,
}

impl<'a> TaskService<'a> {
    /// Creates a service whose BIWEEKLY anchor comes from configuration.
    pub fn new(ctx: EngineContext<'a>) -> Self {
        let expander = RecurrenceExpander::new(ctx.config.biweekly_anchor());
        Self { ctx, expander }
    }

    pub fn with_expander(ctx: EngineContext<'a>, expander: RecurrenceExpander) -> Self {
        Self { ctx, expander }
    }

    pub fn create_action(&self, draft: &ActionDraft) -> EngineResult<RecurringAction> {
        draft.validate()?;
        let action = SqliteActionRepository::new(self.ctx.conn).create_action(draft)?;
        info!(
            "event=action_create module=task status=ok action_id={} frequency={}",
            action.id, action.frequency
        );
        Ok(action)
    }

    /// Parses an untyped payload and creates the action.
    pub fn create_action_from_json(
        &self,
        participant_id: i64,
        payload: &serde_json::Value,
    ) -> EngineResult<RecurringAction> {
        let draft = ActionDraft::from_json(participant_id, payload)?;
        self.create_action(&draft)
    }

    /// Deactivates an action and drops its pending instances from today on.
    pub fn deactivate_action(&self, action_id: i64) -> EngineResult<usize> {
        let today = self.ctx.today();
        let tx = self.ctx.begin_immediate("action_deactivate")?;
        SqliteActionRepository::new(&tx).set_action_active(action_id, false)?;
        let deleted = SqliteTaskRepository::new(&tx).delete_pending_from(action_id, today)?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Persists pending instances for `dates`, skipping dates that already
    /// have an instance of this action in any status.
    pub fn materialize(
        &self,
        action: &RecurringAction,
        dates: &[NaiveDate],
    ) -> EngineResult<MaterializeReport> {
        let tx = self.ctx.begin_immediate("materialize")?;
        let report = insert_dates(&SqliteTaskRepository::new(&tx), action, dates)?;
        tx.commit()?;
        Ok(report)
    }

    /// Expands `action` over `[from, to]` and materializes the result.
    pub fn materialize_range(
        &self,
        action: &RecurringAction,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<MaterializeReport> {
        let dates = self.expander.expand(action, from, to);
        let mut report = self.materialize(action, &dates)?;
        if dates.is_empty() && from <= to {
            report.warnings.push(self.zero_instances(action, from, to));
        }
        Ok(report)
    }

    /// Replaces the action's future pending instances with a fresh
    /// expansion of `[max(from, today), to]`.
    pub fn regenerate(
        &self,
        action_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<MaterializeReport> {
        if from > to {
            return Err(ValidationError::InvalidDateRange { from, to }.into());
        }
        let today = self.ctx.today();
        let effective_from = from.max(today);

        let tx = self.ctx.begin_immediate("regenerate")?;
        let action = SqliteActionRepository::new(&tx)
            .get_action(action_id)?
            .ok_or(StateError::NotFound {
                entity: "action",
                id: action_id,
            })?;
        let tasks = SqliteTaskRepository::new(&tx);
        let deleted = tasks.delete_pending_from(action_id, today)?;

        let dates = if action.active {
            self.expander.expand(&action, effective_from, to)
        } else {
            Vec::new()
        };
        let mut report = insert_dates(&tasks, &action, &dates)?;
        report.deleted = deleted;
        tx.commit()?;

        if action.active && dates.is_empty() && effective_from <= to {
            report
                .warnings
                .push(self.zero_instances(&action, effective_from, to));
        }
        info!(
            "event=regenerate module=task status=ok action_id={} deleted={} inserted={} skipped={}",
            action_id, report.deleted, report.inserted, report.skipped
        );
        Ok(report)
    }

    /// Regenerates every active action of a participant. One action's
    /// failure is recorded and does not stop the others.
    pub fn regenerate_all(
        &self,
        participant_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<RegenerateSummary> {
        if from > to {
            return Err(ValidationError::InvalidDateRange { from, to }.into());
        }
        let actions = SqliteActionRepository::new(self.ctx.conn).list_active_actions(participant_id)?;
        let mut summary = RegenerateSummary::default();
        for action in actions {
            match self.regenerate(action.id, from, to) {
                Ok(report) => summary.succeeded.push((action.id, report)),
                Err(err) => {
                    warn!(
                        "event=regenerate module=task status=error action_id={} error_code={}",
                        action.id,
                        err.code()
                    );
                    summary.failed.push((action.id, err));
                }
            }
        }
        Ok(summary)
    }

    /// Generates instances for the part of `cycle` not expanded yet. Past
    /// dates are not generated. Each action is filled on its own; a failing
    /// action is reported and `last_generated_date` stays put so the next
    /// sweep retries the range.
    pub fn fill_cycle(&self, cycle: &Cycle) -> EngineResult<RegenerateSummary> {
        let mut summary = RegenerateSummary::default();
        let Some((from, to)) = cycle.ungenerated_range() else {
            return Ok(summary);
        };
        let from = from.max(self.ctx.today());

        if from <= to {
            let actions =
                SqliteActionRepository::new(self.ctx.conn).list_active_actions(cycle.participant_id)?;
            for action in &actions {
                match self.materialize_range(action, from, to) {
                    Ok(report) => summary.succeeded.push((action.id, report)),
                    Err(err) => {
                        warn!(
                            "event=cycle_fill module=task status=error cycle_id={} action_id={} error_code={}",
                            cycle.id,
                            action.id,
                            err.code()
                        );
                        summary.failed.push((action.id, err));
                    }
                }
            }
        }
        if summary.failed.is_empty() {
            SqliteCycleRepository::new(self.ctx.conn).set_last_generated(cycle.id, to)?;
        }
        info!(
            "event=cycle_fill module=task status=ok cycle_id={} inserted={} failed={}",
            cycle.id,
            summary.total_inserted(),
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Cancels every pending instance of a participant.
    pub fn cascade_cancel(&self, participant_id: i64) -> EngineResult<usize> {
        let cancelled =
            SqliteTaskRepository::new(self.ctx.conn).cancel_pending_for_participant(participant_id)?;
        Ok(cancelled)
    }

    pub fn list_instances(
        &self,
        participant_id: i64,
        status: Option<TaskStatus>,
    ) -> EngineResult<Vec<TaskInstance>> {
        Ok(SqliteTaskRepository::new(self.ctx.conn).list_for_participant(participant_id, status)?)
    }

    pub fn list_for_action(&self, action_id: i64) -> EngineResult<Vec<TaskInstance>> {
        Ok(SqliteTaskRepository::new(self.ctx.conn).list_for_action(action_id)?)
    }

    /// Marks a pending instance completed.
    ///
    /// # Errors
    /// - `EvidenceRequired` when the action demands evidence and none (or
    ///   only whitespace) is given.
    /// - `InvalidTransition` when the instance is not pending.
    pub fn complete(&self, instance_id: i64, evidence: Option<&str>) -> EngineResult<TaskInstance> {
        let now = self.ctx.now();
        let evidence = evidence.map(str::trim).filter(|value| !value.is_empty());

        let tx = self.ctx.begin_immediate("task_complete")?;
        let tasks = SqliteTaskRepository::new(&tx);
        let instance = load_pending(&tasks, instance_id, TaskStatus::Completed)?;
        let action = SqliteActionRepository::new(&tx)
            .get_action(instance.action_id)?
            .ok_or(StateError::NotFound {
                entity: "action",
                id: instance.action_id,
            })?;
        if action.requires_evidence && evidence.is_none() {
            return Err(ValidationError::EvidenceRequired(instance_id).into());
        }
        tasks.mark_completed(instance_id, evidence, now)?;
        let completed = tasks.get_instance(instance_id)?.ok_or(StateError::NotFound {
            entity: "task instance",
            id: instance_id,
        })?;
        tx.commit()?;
        Ok(completed)
    }

    /// Moves a pending instance to `new_due_date`, keeping its original date.
    pub fn postpone(&self, instance_id: i64, new_due_date: NaiveDate) -> EngineResult<TaskInstance> {
        let today = self.ctx.today();
        let limit = self.ctx.config.accountability.max_postpones;

        let tx = self.ctx.begin_immediate("task_postpone")?;
        let tasks = SqliteTaskRepository::new(&tx);
        let instance = load_pending(&tasks, instance_id, TaskStatus::Pending)?;
        if instance.postpone_count >= limit {
            return Err(StateError::PostponeLimitReached { instance_id, limit }.into());
        }
        if new_due_date < today || new_due_date == instance.due_date {
            return Err(ValidationError::InvalidField {
                field: "new_due_date",
                message: format!("{new_due_date} must be a different date, today or later"),
            }
            .into());
        }
        match tasks.reschedule(instance_id, new_due_date) {
            Ok(()) => {}
            Err(err) if err.is_unique_violation() => {
                return Err(ValidationError::InvalidField {
                    field: "new_due_date",
                    message: format!("another pending instance is already due on {new_due_date}"),
                }
                .into());
            }
            Err(err) => return Err(err.into()),
        }
        let moved = tasks.get_instance(instance_id)?.ok_or(StateError::NotFound {
            entity: "task instance",
            id: instance_id,
        })?;
        tx.commit()?;
        Ok(moved)
    }

    fn zero_instances(
        &self,
        action: &RecurringAction,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ExpansionWarning {
        warn!(
            "event=zero_instances module=task status=warn action_id={} frequency={} from={} to={}",
            action.id, action.frequency, from, to
        );
        self.ctx.dispatch(vec![NotifyIntent::new(
            action.participant_id,
            NotifyEvent::ZeroInstancesGenerated,
            json!({ "action_id": action.id, "from": from, "to": to }),
        )]);
        ExpansionWarning::ZeroInstances {
            action_id: action.id,
            from,
            to,
        }
    }
}

fn insert_dates(
    tasks: &impl TaskRepository,
    action: &RecurringAction,
    dates: &[NaiveDate],
) -> EngineResult<MaterializeReport> {
    let mut report = MaterializeReport::default();
    // A one-time action is materialized once; later windows only fall back
    // to their start date when nothing exists yet.
    if action.frequency == Frequency::OneTime && tasks.count_for_action(action.id)? > 0 {
        report.skipped = dates.len();
        return Ok(report);
    }
    for date in dates {
        if tasks.insert_if_absent(action.participant_id, action.id, *date)? {
            report.inserted += 1;
        } else {
            report.skipped += 1;
        }
    }
    Ok(report)
}

fn load_pending(
    tasks: &impl TaskRepository,
    instance_id: i64,
    target: TaskStatus,
) -> EngineResult<TaskInstance> {
    let instance = tasks.get_instance(instance_id)?.ok_or(StateError::NotFound {
        entity: "task instance",
        id: instance_id,
    })?;
    if instance.status != TaskStatus::Pending {
        return Err(StateError::InvalidTransition {
            entity: "task instance",
            id: instance_id,
            from: instance.status.as_str(),
            to: target.as_str(),
        }
        .into());
    }
    Ok(instance)
}
