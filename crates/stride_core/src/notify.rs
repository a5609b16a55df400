//! Notification intents.
//!
//! # Responsibility
//! - Describe "somebody should be told" outcomes as data.
//! - Hand intents to an injected [`Notifier`]; delivery is not our concern.
//!
//! # Invariants
//! - Services emit intents only after the owning transaction commits.

use log::info;
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    /// Enrollment reached its strike threshold.
    Suspended,
    /// Future sessions were removed by a suspension cascade.
    BookingsVoided,
    /// A cycle's end date moved forward.
    CycleExtended,
    /// An expansion produced no task instances.
    ZeroInstancesGenerated,
    EnrollmentDropped,
    EnrollmentDeserted,
    RequestConfirmed,
    RequestRejected,
    BookingCancelled,
}

impl NotifyEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::BookingsVoided => "bookings_voided",
            Self::CycleExtended => "cycle_extended",
            Self::ZeroInstancesGenerated => "zero_instances_generated",
            Self::EnrollmentDropped => "enrollment_dropped",
            Self::EnrollmentDeserted => "enrollment_deserted",
            Self::RequestConfirmed => "request_confirmed",
            Self::RequestRejected => "request_rejected",
            Self::BookingCancelled => "booking_cancelled",
        }
    }
}

/// One "notify(recipient, event, payload)" request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotifyIntent {
    pub intent_id: Uuid,
    pub recipient_id: i64,
    pub event: NotifyEvent,
    pub payload: serde_json::Value,
}

impl NotifyIntent {
    pub fn new(recipient_id: i64, event: NotifyEvent, payload: serde_json::Value) -> Self {
        Self {
            intent_id: Uuid::new_v4(),
            recipient_id,
            event,
            payload,
        }
    }
}

/// Delivery collaborator.
pub trait Notifier: Send + Sync {
    fn notify(&self, intent: NotifyIntent);
}

/// Writes intents to the core log; used when no delivery channel is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, intent: NotifyIntent) {
        info!(
            "event=notify module=notify status=ok kind={} recipient_id={} intent_id={}",
            intent.event.as_str(),
            intent.recipient_id,
            intent.intent_id
        );
    }
}

/// Collects intents in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    intents: Mutex<Vec<NotifyIntent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intents(&self) -> Vec<NotifyIntent> {
        self.intents
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Number of collected intents of one kind.
    pub fn count(&self, event: NotifyEvent) -> usize {
        self.intents
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .filter(|intent| intent.event == event)
            .count()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, intent: NotifyIntent) {
        self.intents
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(intent);
    }
}
