//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own transaction boundaries; repositories never open their own.
//! - Turn committed outcomes into notification intents.
//!
//! # Invariants
//! - Every multi-statement write runs in exactly one `BEGIN IMMEDIATE`
//!   transaction and either fully commits or fully rolls back.
//! - Intents are dispatched after `commit()` returns, never before.

pub mod accountability_service;
pub mod availability_service;
pub mod cycle_service;
pub mod pricing;
pub mod reservation_service;
pub mod sweep_service;
pub mod task_service;

use crate::clock::{CalendarOffset, Clock};
use crate::config::EngineConfig;
use crate::db::DbError;
use crate::error::{EngineError, EngineResult};
use crate::notify::{Notifier, NotifyIntent};
use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Collaborators shared by every service invocation.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub conn: &'a Connection,
    pub clock: &'a dyn Clock,
    pub notifier: &'a dyn Notifier,
    pub config: &'a EngineConfig,
}

impl<'a> EngineContext<'a> {
    pub fn new(
        conn: &'a Connection,
        clock: &'a dyn Clock,
        notifier: &'a dyn Notifier,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            conn,
            clock,
            notifier,
            config,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn offset(&self) -> CalendarOffset {
        self.config.calendar_offset()
    }

    /// Calendar-local date of "now".
    pub fn today(&self) -> NaiveDate {
        self.offset().today(self.clock)
    }

    /// Starts a write transaction, waiting at most the connection's busy
    /// timeout for the database lock.
    pub(crate) fn begin_immediate(&self, operation: &'static str) -> EngineResult<Transaction<'a>> {
        Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate).map_err(|err| {
            let err = DbError::from(err);
            if err.is_busy() {
                warn!(
                    "event=lock_timeout module=service status=error op={operation} error_code=persistence.lock_timeout"
                );
            }
            EngineError::from(err)
        })
    }

    pub(crate) fn dispatch(&self, intents: Vec<NotifyIntent>) {
        for intent in intents {
            self.notifier.notify(intent);
        }
    }
}
