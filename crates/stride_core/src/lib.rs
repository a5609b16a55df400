//! Core scheduling logic for Stride.
//! This crate is the single source of truth for commitment, calendar and
//! accountability invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod recurrence;
pub mod repo;
pub mod service;

pub use clock::{CalendarOffset, Clock, FixedClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_timeout, DbError};
pub use error::{
    ConflictError, EngineError, EngineResult, ErrorClass, StateError, ValidationError,
};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::action::{ActionDraft, Frequency, RecurringAction};
pub use model::calendar::{CalendarClaim, CallType, Slot, TimeOfDay};
pub use model::cycle::{Cycle, CycleExtension, CycleKind, CycleWindow};
pub use model::enrollment::{Enrollment, EnrollmentStatus};
pub use model::task::{TaskInstance, TaskStatus};
pub use notify::{LogNotifier, MemoryNotifier, Notifier, NotifyEvent, NotifyIntent};
pub use recurrence::{BiweeklyAnchor, ExpansionWarning, RecurrenceExpander};
pub use repo::{RepoError, RepoResult};
pub use service::accountability_service::AccountabilityService;
pub use service::availability_service::AvailabilityService;
pub use service::cycle_service::CycleService;
pub use service::pricing::{OccupancyPricer, PriceQuote};
pub use service::reservation_service::{Reservation, ReservationService};
pub use service::sweep_service::{ActionFailure, SweepReport, SweepService};
pub use service::task_service::{MaterializeReport, RegenerateSummary, TaskService};
pub use service::EngineContext;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
