//! Enrollment accountability state machine.
//!
//! # Responsibility
//! - Record attendance and misses of held sessions.
//! - Count strikes, suspend at the threshold and void future sessions.
//! - Own the enrollment lifecycle (start, reset, drop, desert, complete)
//!   and its audit trail.
//!
//! # Invariants
//! - Strike increment, suspension and cascade delete share one transaction.
//! - Only an `Active` enrollment counts strikes, so suspension (and its
//!   notification) happens at most once per suspension period.
//! - Every lifecycle change writes exactly one audit record in the same
//!   transaction.

use crate::error::{EngineResult, StateError, ValidationError};
use crate::model::calendar::{AttendanceStatus, CalendarClaim, ClaimStatus};
use crate::model::enrollment::{AuditAction, AuditRecord, Enrollment, EnrollmentStatus};
use crate::notify::{NotifyEvent, NotifyIntent};
use crate::repo::claim_repo::{ClaimRepository, SqliteClaimRepository};
use crate::repo::enrollment_repo::{EnrollmentRepository, SqliteEnrollmentRepository};
use crate::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use crate::service::reservation_service::ensure_open;
use crate::service::EngineContext;
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

/// What a recorded miss changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissOutcome {
    pub claim: CalendarClaim,
    /// New strike count, when the claim counted against an active enrollment.
    pub missed_calls_count: Option<u32>,
    pub suspended: bool,
    /// Future claims deleted by the suspension cascade.
    pub voided_claim_ids: Vec<i64>,
}

pub struct AccountabilityService<'a> {
    ctx: EngineContext<'a>,
}

impl<'a> AccountabilityService<'a> {
    pub fn new(ctx: EngineContext<'a>) -> Self {
        Self { ctx }
    }

    /// Opens an enrollment; `max_missed` falls back to the configured default.
    pub fn start_enrollment(
        &self,
        participant_id: i64,
        mentor_id: i64,
        total_weeks: u32,
        max_missed: Option<u32>,
        actor_id: i64,
    ) -> EngineResult<Enrollment> {
        if total_weeks == 0 {
            return Err(ValidationError::InvalidField {
                field: "total_weeks",
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        let max_missed = max_missed.unwrap_or(self.ctx.config.accountability.default_max_missed);
        if max_missed == 0 {
            return Err(ValidationError::InvalidField {
                field: "max_missed_allowed",
                message: "must be at least 1".to_string(),
            }
            .into());
        }

        let tx = self.ctx.begin_immediate("enrollment_start")?;
        let enrollments = SqliteEnrollmentRepository::new(&tx);
        let enrollment =
            match enrollments.insert_enrollment(participant_id, mentor_id, total_weeks, max_missed) {
                Ok(enrollment) => enrollment,
                Err(err) if err.is_unique_violation() => {
                    return Err(StateError::EnrollmentAlreadyOpen { participant_id }.into());
                }
                Err(err) => return Err(err.into()),
            };
        self.audit(&tx, enrollment.id, actor_id, AuditAction::Started, None)?;
        tx.commit()?;
        Ok(enrollment)
    }

    /// Marks a held session attended; strikes are untouched.
    pub fn record_attendance(&self, claim_id: i64) -> EngineResult<CalendarClaim> {
        let tx = self.ctx.begin_immediate("record_attendance")?;
        let claims = SqliteClaimRepository::new(&tx);
        let claim = self.load_held_claim(&claims, claim_id, ClaimStatus::Completed)?;
        claims.set_claim_status(claim.id, ClaimStatus::Completed, AttendanceStatus::Attended)?;
        let updated = reload_claim(&claims, claim_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Marks a held session missed and applies the strike rules.
    pub fn record_miss(&self, claim_id: i64) -> EngineResult<MissOutcome> {
        let now = self.ctx.now();
        let tx = self.ctx.begin_immediate("record_miss")?;
        let claims = SqliteClaimRepository::new(&tx);
        let enrollments = SqliteEnrollmentRepository::new(&tx);

        let claim = self.load_held_claim(&claims, claim_id, ClaimStatus::Missed)?;
        claims.set_claim_status(claim.id, ClaimStatus::Missed, AttendanceStatus::Missed)?;

        let mut outcome = MissOutcome {
            claim: reload_claim(&claims, claim_id)?,
            missed_calls_count: None,
            suspended: false,
            voided_claim_ids: Vec::new(),
        };
        let mut suspended_enrollment = None;
        if let Some(enrollment_id) = claim.enrollment_id {
            let enrollment = load_enrollment(&enrollments, enrollment_id)?;
            if enrollment.status == EnrollmentStatus::Active {
                let count = enrollments.increment_missed(enrollment.id)?;
                outcome.missed_calls_count = Some(count);
                if count >= enrollment.max_missed_allowed {
                    enrollments.set_status(enrollment.id, EnrollmentStatus::Suspended)?;
                    outcome.voided_claim_ids = claims.delete_future_open_claims(enrollment.id, now)?;
                    outcome.suspended = true;
                    self.audit(
                        &tx,
                        enrollment.id,
                        claim.mentor_id,
                        AuditAction::Suspended,
                        Some(format!("{count} missed calls")),
                    )?;
                    suspended_enrollment = Some(enrollment);
                }
            }
        }
        tx.commit()?;

        info!(
            "event=record_miss module=accountability status=ok claim_id={} strikes={} suspended={} voided={}",
            claim_id,
            outcome.missed_calls_count.unwrap_or(0),
            outcome.suspended,
            outcome.voided_claim_ids.len()
        );
        if let Some(enrollment) = suspended_enrollment {
            let mut intents = vec![NotifyIntent::new(
                enrollment.participant_id,
                NotifyEvent::Suspended,
                json!({
                    "enrollment_id": enrollment.id,
                    "missed_calls_count": outcome.missed_calls_count,
                }),
            )];
            if !outcome.voided_claim_ids.is_empty() {
                intents.push(NotifyIntent::new(
                    enrollment.mentor_id,
                    NotifyEvent::BookingsVoided,
                    json!({
                        "enrollment_id": enrollment.id,
                        "claim_ids": outcome.voided_claim_ids,
                    }),
                ));
            }
            self.ctx.dispatch(intents);
        }
        Ok(outcome)
    }

    /// Zeroes strikes and re-activates the enrollment. Voided sessions are
    /// not restored.
    pub fn reset_strikes(&self, enrollment_id: i64, supervisor_id: i64) -> EngineResult<Enrollment> {
        let tx = self.ctx.begin_immediate("reset_strikes")?;
        let enrollments = SqliteEnrollmentRepository::new(&tx);
        let enrollment = load_enrollment(&enrollments, enrollment_id)?;
        if enrollment.status.is_terminal() {
            return Err(not_active(&enrollment));
        }
        enrollments.reset_strikes(enrollment_id)?;
        self.audit(&tx, enrollment_id, supervisor_id, AuditAction::StrikesReset, None)?;
        let reset = load_enrollment(&enrollments, enrollment_id)?;
        tx.commit()?;
        Ok(reset)
    }

    /// Administrative drop; requires a non-blank reason.
    pub fn drop_enrollment(
        &self,
        enrollment_id: i64,
        admin_id: i64,
        reason: &str,
    ) -> EngineResult<Enrollment> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::BlankReason.into());
        }
        let enrollment = self.close_enrollment(
            enrollment_id,
            admin_id,
            EnrollmentStatus::Dropped,
            AuditAction::Dropped,
            Some(reason.to_string()),
        )?;
        self.ctx.dispatch(vec![NotifyIntent::new(
            enrollment.participant_id,
            NotifyEvent::EnrollmentDropped,
            json!({ "enrollment_id": enrollment.id, "reason": reason }),
        )]);
        Ok(enrollment)
    }

    /// Participant-initiated exit; `confirmation` must equal the configured
    /// literal exactly.
    pub fn desert(
        &self,
        enrollment_id: i64,
        participant_id: i64,
        confirmation: &str,
    ) -> EngineResult<Enrollment> {
        if confirmation != self.ctx.config.accountability.desertion_confirmation {
            return Err(ValidationError::ConfirmationMismatch.into());
        }
        let owned = SqliteEnrollmentRepository::new(self.ctx.conn)
            .get_enrollment(enrollment_id)?
            .filter(|enrollment| enrollment.participant_id == participant_id);
        if owned.is_none() {
            return Err(StateError::NotFound {
                entity: "enrollment",
                id: enrollment_id,
            }
            .into());
        }

        let enrollment = self.close_enrollment(
            enrollment_id,
            participant_id,
            EnrollmentStatus::Deserter,
            AuditAction::Deserted,
            None,
        )?;
        self.ctx.dispatch(vec![NotifyIntent::new(
            enrollment.mentor_id,
            NotifyEvent::EnrollmentDeserted,
            json!({ "enrollment_id": enrollment.id, "participant_id": participant_id }),
        )]);
        Ok(enrollment)
    }

    pub fn complete_enrollment(&self, enrollment_id: i64, actor_id: i64) -> EngineResult<Enrollment> {
        let tx = self.ctx.begin_immediate("enrollment_complete")?;
        let enrollments = SqliteEnrollmentRepository::new(&tx);
        let enrollment = load_enrollment(&enrollments, enrollment_id)?;
        if enrollment.status != EnrollmentStatus::Active {
            return Err(not_active(&enrollment));
        }
        enrollments.set_status(enrollment_id, EnrollmentStatus::Completed)?;
        self.audit(&tx, enrollment_id, actor_id, AuditAction::Completed, None)?;
        let completed = load_enrollment(&enrollments, enrollment_id)?;
        tx.commit()?;
        Ok(completed)
    }

    pub fn get_enrollment(&self, enrollment_id: i64) -> EngineResult<Enrollment> {
        load_enrollment(&SqliteEnrollmentRepository::new(self.ctx.conn), enrollment_id)
    }

    pub fn audit_trail(&self, enrollment_id: i64) -> EngineResult<Vec<AuditRecord>> {
        Ok(SqliteEnrollmentRepository::new(self.ctx.conn).list_audit(enrollment_id)?)
    }

    /// ACTIVE → `status`, cancelling the participant's pending instances.
    fn close_enrollment(
        &self,
        enrollment_id: i64,
        actor_id: i64,
        status: EnrollmentStatus,
        action: AuditAction,
        reason: Option<String>,
    ) -> EngineResult<Enrollment> {
        let tx = self.ctx.begin_immediate("enrollment_close")?;
        let enrollments = SqliteEnrollmentRepository::new(&tx);
        let enrollment = load_enrollment(&enrollments, enrollment_id)?;
        if enrollment.status != EnrollmentStatus::Active {
            return Err(not_active(&enrollment));
        }
        enrollments.set_status(enrollment_id, status)?;
        let cancelled =
            SqliteTaskRepository::new(&tx).cancel_pending_for_participant(enrollment.participant_id)?;
        self.audit(&tx, enrollment_id, actor_id, action, reason)?;
        let closed = load_enrollment(&enrollments, enrollment_id)?;
        tx.commit()?;

        info!(
            "event=enrollment_close module=accountability status=ok enrollment_id={} to={} cancelled_tasks={}",
            enrollment_id,
            status.as_str(),
            cancelled
        );
        Ok(closed)
    }

    fn load_held_claim(
        &self,
        claims: &impl ClaimRepository,
        claim_id: i64,
        target: ClaimStatus,
    ) -> EngineResult<CalendarClaim> {
        let claim = reload_claim(claims, claim_id)?;
        ensure_open(&claim, target)?;
        if claim.scheduled_at > self.ctx.now() {
            return Err(StateError::SessionNotYetHeld { claim_id }.into());
        }
        Ok(claim)
    }

    fn audit(
        &self,
        conn: &Connection,
        enrollment_id: i64,
        actor_id: i64,
        action: AuditAction,
        reason: Option<String>,
    ) -> EngineResult<()> {
        let record = AuditRecord::new(enrollment_id, actor_id, action, reason, self.ctx.now());
        SqliteEnrollmentRepository::new(conn).append_audit(&record)?;
        Ok(())
    }
}

fn reload_claim(claims: &impl ClaimRepository, claim_id: i64) -> EngineResult<CalendarClaim> {
    claims.get_claim(claim_id)?.ok_or_else(|| {
        StateError::NotFound {
            entity: "calendar claim",
            id: claim_id,
        }
        .into()
    })
}

fn load_enrollment(
    enrollments: &impl EnrollmentRepository,
    enrollment_id: i64,
) -> EngineResult<Enrollment> {
    enrollments.get_enrollment(enrollment_id)?.ok_or_else(|| {
        StateError::NotFound {
            entity: "enrollment",
            id: enrollment_id,
        }
        .into()
    })
}

fn not_active(enrollment: &Enrollment) -> crate::error::EngineError {
    StateError::EnrollmentNotActive {
        enrollment_id: enrollment.id,
        status: enrollment.status.as_str(),
    }
    .into()
}
