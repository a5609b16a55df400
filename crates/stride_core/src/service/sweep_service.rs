//! Periodic maintenance sweep.
//!
//! # Responsibility
//! - Expire pending instances whose deadline (plus grace) has passed.
//! - Generate instances for every active cycle range not expanded yet,
//!   including ranges opened by extensions.
//!
//! # Invariants
//! - Running the sweep twice in a row changes nothing the second time.
//! - One cycle's or one action's failure is reported and does not stop
//!   the others.

use crate::error::EngineResult;
use crate::repo::cycle_repo::{CycleRepository, SqliteCycleRepository};
use crate::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use crate::service::task_service::TaskService;
use crate::service::EngineContext;
use chrono::Duration;
use log::{info, warn};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    /// Cycles whose whole ungenerated range was filled.
    pub cycles_filled: usize,
    pub instances_inserted: usize,
    /// `(cycle_id, error code)` for cycles that could not be filled at all.
    pub failures: Vec<(i64, &'static str)>,
    pub action_failures: Vec<ActionFailure>,
}

/// One action that failed while its cycle was being filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    pub cycle_id: i64,
    pub action_id: i64,
    pub error_code: &'static str,
}

pub struct SweepService<'a> {
    ctx: EngineContext<'a>,
}

impl<'a> SweepService<'a> {
    pub fn new(ctx: EngineContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn run(&self) -> EngineResult<SweepReport> {
        let mut report = SweepReport {
            expired: self.expire_overdue()?,
            ..SweepReport::default()
        };

        let tasks = TaskService::new(self.ctx);
        let cycles = SqliteCycleRepository::new(self.ctx.conn).list_active_cycles()?;
        for cycle in cycles
            .iter()
            .filter(|cycle| cycle.ungenerated_range().is_some())
        {
            match tasks.fill_cycle(cycle) {
                Ok(summary) => {
                    report.instances_inserted += summary.total_inserted();
                    if summary.failed.is_empty() {
                        report.cycles_filled += 1;
                    }
                    report
                        .action_failures
                        .extend(summary.failed.iter().map(|(action_id, err)| ActionFailure {
                            cycle_id: cycle.id,
                            action_id: *action_id,
                            error_code: err.code(),
                        }));
                }
                Err(err) => {
                    warn!(
                        "event=sweep_fill module=sweep status=error cycle_id={} error_code={}",
                        cycle.id,
                        err.code()
                    );
                    report.failures.push((cycle.id, err.code()));
                }
            }
        }

        info!(
            "event=sweep module=sweep status=ok expired={} cycles_filled={} inserted={} failures={} action_failures={}",
            report.expired,
            report.cycles_filled,
            report.instances_inserted,
            report.failures.len(),
            report.action_failures.len()
        );
        Ok(report)
    }

    /// Pending instances with `due_date + grace < today` become expired.
    pub fn expire_overdue(&self) -> EngineResult<usize> {
        let grace = i64::from(self.ctx.config.accountability.task_expiry_grace_days);
        let cutoff = self.ctx.today() - Duration::days(grace);
        Ok(SqliteTaskRepository::new(self.ctx.conn).expire_pending_before(cutoff)?)
    }
}
