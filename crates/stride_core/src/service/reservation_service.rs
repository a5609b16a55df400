//! Slot reservation service.
//!
//! # Responsibility
//! - Expose free slots: template slots minus every active claim on the
//!   mentor's calendar.
//! - Reserve a slot atomically under the weekly quota and distinct-day rule.
//! - Route mentorship requests through the same claim insertion path.
//!
//! # Invariants
//! - Reservation checks and the insert run in one `BEGIN IMMEDIATE`
//!   transaction; any failure rolls back the claim and its fund hold.
//! - A claim never overlaps another non-cancelled claim of the same
//!   mentor: the overlap check runs inside the write transaction and the
//!   storage unique index backs it for identical start instants. Both are
//!   reported as `SlotAlreadyTaken`, never retried.
//! - A participant whose enrollment with the mentor is suspended takes no
//!   new claim on that calendar.
//! - The weekly quota counts non-cancelled `booking` claims in the
//!   calendar-local Monday–Sunday week.

use crate::error::{ConflictError, EngineError, EngineResult, StateError, ValidationError};
use crate::model::calendar::{
    AttendanceStatus, CalendarClaim, CallType, ClaimDraft, ClaimSource, ClaimStatus, FundHold, Slot,
};
use crate::model::enrollment::{Enrollment, EnrollmentStatus};
use crate::notify::{NotifyEvent, NotifyIntent};
use crate::repo::claim_repo::{ClaimRepository, NewFundHold, SqliteClaimRepository};
use crate::repo::enrollment_repo::{EnrollmentRepository, SqliteEnrollmentRepository};
use crate::service::availability_service::AvailabilityService;
use crate::service::pricing::{OccupancyPricer, PriceQuote};
use crate::service::EngineContext;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use log::{info, warn};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

/// A committed claim plus the funds held for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub claim: CalendarClaim,
    pub quote: Option<PriceQuote>,
    pub hold: Option<FundHold>,
}

pub struct ReservationService<'a> {
    ctx: EngineContext<'a>,
}

impl<'a> ReservationService<'a> {
    pub fn new(ctx: EngineContext<'a>) -> Self {
        Self { ctx }
    }

    /// Free slots of one calendar on `date`.
    pub fn available_slots(
        &self,
        mentor_id: i64,
        date: NaiveDate,
        call_type: CallType,
    ) -> EngineResult<Vec<Slot>> {
        let granularity = self.ctx.config.slot_minutes(call_type);
        let template = AvailabilityService::new(self.ctx).free_template_slots(
            mentor_id,
            date,
            call_type,
            granularity,
        )?;
        if template.is_empty() {
            return Ok(template);
        }

        let offset = self.ctx.offset();
        // a claim starting the previous evening can still run into this day
        let from = offset.start_of_day(date) - Duration::days(1);
        let to = offset.start_of_day(date + Duration::days(1));
        let claims =
            SqliteClaimRepository::new(self.ctx.conn).active_claims_between(mentor_id, None, from, to)?;

        Ok(template
            .into_iter()
            .filter(|slot| {
                !claims
                    .iter()
                    .any(|claim| slot.overlaps(claim.scheduled_at, claim.ends_at()))
            })
            .collect())
    }

    /// Claims a template slot for a participant.
    ///
    /// # Errors
    /// - `SlotInPast` / `SlotOutsideAvailability` before any write.
    /// - `NoActiveEnrollment` for DISCIPLINE calls without an active
    ///   enrollment with this mentor.
    /// - `EnrollmentNotActive` when that enrollment is suspended.
    /// - `WeeklyLimitReached`, `SameWeekdayNotAllowed`, `SlotAlreadyTaken`.
    /// - Persistence `lock_timeout` when the write lock is not acquired
    ///   within the configured bound.
    pub fn reserve(
        &self,
        participant_id: i64,
        mentor_id: i64,
        scheduled_at: DateTime<Utc>,
        call_type: CallType,
    ) -> EngineResult<Reservation> {
        let now = self.ctx.now();
        if scheduled_at <= now {
            return Err(ValidationError::SlotInPast(scheduled_at).into());
        }
        let offset = self.ctx.offset();
        let local_date = offset.local_date(scheduled_at);
        let duration_minutes = self.ctx.config.slot_minutes(call_type);
        let aligned = AvailabilityService::new(self.ctx)
            .free_template_slots(mentor_id, local_date, call_type, duration_minutes)?
            .iter()
            .any(|slot| slot.starts_at == scheduled_at);
        if !aligned {
            return Err(ValidationError::SlotOutsideAvailability(scheduled_at).into());
        }

        let enrollment = self.bookable_enrollment(participant_id, mentor_id)?;
        if call_type == CallType::Discipline && enrollment.is_none() {
            return Err(StateError::NoActiveEnrollment {
                participant_id,
                mentor_id,
            }
            .into());
        }

        let tx = self.ctx.begin_immediate("reserve")?;
        self.check_weekly_rules(&tx, participant_id, local_date)?;
        let draft = ClaimDraft {
            source: ClaimSource::Booking,
            mentor_id,
            participant_id,
            enrollment_id: enrollment.map(|enrollment| enrollment.id),
            scheduled_at,
            duration_minutes,
            call_type,
            status: ClaimStatus::Confirmed,
            topic: None,
        };
        let reservation = self.insert_claim(&tx, &draft, now)?;
        tx.commit()?;

        info!(
            "event=reserve module=reservation status=ok claim_id={} mentor_id={} call_type={} scheduled_at={}",
            reservation.claim.id,
            mentor_id,
            call_type,
            scheduled_at.timestamp_millis()
        );
        Ok(reservation)
    }

    /// Cancels an open claim and releases its held funds.
    pub fn cancel(&self, claim_id: i64, actor_id: i64) -> EngineResult<CalendarClaim> {
        let tx = self.ctx.begin_immediate("claim_cancel")?;
        let claims = SqliteClaimRepository::new(&tx);
        let claim = load_claim(&claims, claim_id)?;
        ensure_open(&claim, ClaimStatus::Cancelled)?;
        claims.set_claim_status(claim_id, ClaimStatus::Cancelled, AttendanceStatus::Unmarked)?;
        let released = claims.release_holds_for_claim(claim_id)?;
        let cancelled = load_claim(&claims, claim_id)?;
        tx.commit()?;

        let recipient = if actor_id == claim.participant_id {
            claim.mentor_id
        } else {
            claim.participant_id
        };
        info!(
            "event=claim_cancel module=reservation status=ok claim_id={} released_holds={}",
            claim_id, released
        );
        self.ctx.dispatch(vec![NotifyIntent::new(
            recipient,
            NotifyEvent::BookingCancelled,
            json!({ "claim_id": claim_id, "cancelled_by": actor_id }),
        )]);
        Ok(cancelled)
    }

    /// Records a participant's request for a mentorship session at an
    /// explicit time; the slot is held until the mentor answers.
    pub fn request_mentorship(
        &self,
        participant_id: i64,
        mentor_id: i64,
        scheduled_at: DateTime<Utc>,
        topic: Option<&str>,
    ) -> EngineResult<Reservation> {
        let now = self.ctx.now();
        if scheduled_at <= now {
            return Err(ValidationError::SlotInPast(scheduled_at).into());
        }
        let enrollment = self.bookable_enrollment(participant_id, mentor_id)?;

        let tx = self.ctx.begin_immediate("request_mentorship")?;
        let draft = ClaimDraft {
            source: ClaimSource::Request,
            mentor_id,
            participant_id,
            enrollment_id: enrollment.map(|enrollment| enrollment.id),
            scheduled_at,
            duration_minutes: self.ctx.config.slot_minutes(CallType::Mentorship),
            call_type: CallType::Mentorship,
            status: ClaimStatus::Pending,
            topic: topic
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        };
        let reservation = self.insert_claim(&tx, &draft, now)?;
        tx.commit()?;
        Ok(reservation)
    }

    pub fn confirm_request(&self, claim_id: i64, mentor_id: i64) -> EngineResult<CalendarClaim> {
        self.answer_request(claim_id, mentor_id, ClaimStatus::Confirmed)
    }

    /// Rejects a pending request, freeing the slot and the held funds.
    pub fn reject_request(&self, claim_id: i64, mentor_id: i64) -> EngineResult<CalendarClaim> {
        self.answer_request(claim_id, mentor_id, ClaimStatus::Cancelled)
    }

    fn answer_request(
        &self,
        claim_id: i64,
        mentor_id: i64,
        answer: ClaimStatus,
    ) -> EngineResult<CalendarClaim> {
        let tx = self.ctx.begin_immediate("request_answer")?;
        let claims = SqliteClaimRepository::new(&tx);
        let claim = load_claim(&claims, claim_id)?;
        if claim.source != ClaimSource::Request || claim.mentor_id != mentor_id {
            return Err(StateError::NotFound {
                entity: "mentorship request",
                id: claim_id,
            }
            .into());
        }
        if claim.status != ClaimStatus::Pending {
            return Err(StateError::InvalidTransition {
                entity: "mentorship request",
                id: claim_id,
                from: claim.status.as_str(),
                to: answer.as_str(),
            }
            .into());
        }
        claims.set_claim_status(claim_id, answer, AttendanceStatus::Unmarked)?;
        if answer == ClaimStatus::Cancelled {
            claims.release_holds_for_claim(claim_id)?;
        }
        let answered = load_claim(&claims, claim_id)?;
        tx.commit()?;

        let event = if answer == ClaimStatus::Confirmed {
            NotifyEvent::RequestConfirmed
        } else {
            NotifyEvent::RequestRejected
        };
        self.ctx.dispatch(vec![NotifyIntent::new(
            claim.participant_id,
            event,
            json!({ "claim_id": claim_id, "scheduled_at": claim.scheduled_at }),
        )]);
        Ok(answered)
    }

    /// The active enrollment with this mentor, if any. A suspended one
    /// blocks the participant from the calendar.
    fn bookable_enrollment(
        &self,
        participant_id: i64,
        mentor_id: i64,
    ) -> EngineResult<Option<Enrollment>> {
        let enrollment = SqliteEnrollmentRepository::new(self.ctx.conn)
            .open_enrollment(participant_id, mentor_id)?;
        match enrollment {
            Some(enrollment) if enrollment.status != EnrollmentStatus::Active => {
                Err(StateError::EnrollmentNotActive {
                    enrollment_id: enrollment.id,
                    status: enrollment.status.as_str(),
                }
                .into())
            }
            other => Ok(other),
        }
    }

    fn check_weekly_rules(
        &self,
        conn: &Connection,
        participant_id: i64,
        local_date: NaiveDate,
    ) -> EngineResult<()> {
        let offset = self.ctx.offset();
        let monday =
            local_date - Duration::days(i64::from(local_date.weekday().num_days_from_monday()));
        let week_start = offset.start_of_day(monday);
        let week_end = offset.start_of_day(monday + Duration::days(7));
        let booked = SqliteClaimRepository::new(conn)
            .participant_bookings_between(participant_id, week_start, week_end)?;

        let limit = self.ctx.config.scheduling.weekly_booking_limit;
        if booked.len() >= limit as usize {
            return Err(ConflictError::WeeklyLimitReached { limit }.into());
        }
        if booked
            .iter()
            .any(|claim| offset.local_date(claim.scheduled_at) == local_date)
        {
            return Err(ConflictError::SameWeekdayNotAllowed {
                weekday: local_date.weekday(),
            }
            .into());
        }
        Ok(())
    }

    fn insert_claim(
        &self,
        conn: &Connection,
        draft: &ClaimDraft,
        now: DateTime<Utc>,
    ) -> EngineResult<Reservation> {
        let claims = SqliteClaimRepository::new(conn);
        let ends_at = draft.scheduled_at + Duration::minutes(i64::from(draft.duration_minutes));
        let overlapping = claims
            .active_claims_between(
                draft.mentor_id,
                None,
                draft.scheduled_at - Duration::days(1),
                ends_at,
            )?
            .iter()
            .any(|claim| claim.scheduled_at < ends_at && draft.scheduled_at < claim.ends_at());
        if overlapping {
            return Err(slot_taken(draft));
        }

        // price against occupancy before this claim counts toward it
        let quote = if draft.call_type == CallType::Mentorship {
            Some(OccupancyPricer::new(&self.ctx.config.pricing).price(conn, draft.mentor_id, now)?)
        } else {
            None
        };

        let claim = match claims.insert_claim(draft) {
            Ok(claim) => claim,
            Err(err) if err.is_unique_violation() => return Err(slot_taken(draft)),
            Err(err) => return Err(EngineError::from(err)),
        };

        let hold = match &quote {
            Some(quote) => Some(claims.insert_fund_hold(&NewFundHold {
                claim_id: claim.id,
                participant_id: draft.participant_id,
                mentor_id: draft.mentor_id,
                base_price: quote.base_price,
                multiplier: quote.multiplier,
                amount: quote.final_price,
            })?),
            None => None,
        };
        Ok(Reservation { claim, quote, hold })
    }
}

fn slot_taken(draft: &ClaimDraft) -> EngineError {
    warn!(
        "event=reserve module=reservation status=conflict mentor_id={} scheduled_at={} error_code=conflict.slot_already_taken",
        draft.mentor_id,
        draft.scheduled_at.timestamp_millis()
    );
    ConflictError::SlotAlreadyTaken {
        mentor_id: draft.mentor_id,
        scheduled_at: draft.scheduled_at,
    }
    .into()
}

fn load_claim(claims: &impl ClaimRepository, claim_id: i64) -> EngineResult<CalendarClaim> {
    claims.get_claim(claim_id)?.ok_or_else(|| {
        StateError::NotFound {
            entity: "calendar claim",
            id: claim_id,
        }
        .into()
    })
}

pub(crate) fn ensure_open(claim: &CalendarClaim, target: ClaimStatus) -> EngineResult<()> {
    if claim.status.is_open() {
        return Ok(());
    }
    Err(StateError::InvalidTransition {
        entity: "calendar claim",
        id: claim.id,
        from: claim.status.as_str(),
        to: target.as_str(),
    }
    .into())
}
