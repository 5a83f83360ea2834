use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::DomainEvent;
use crate::observability::{BOOKINGS_TOTAL, BOOKING_DURATION_SECONDS};

use super::conflict::{ensure_free, validate_span};
use super::{lifecycle, time_range, BookingError, Engine};

/// Where a booking request came from. Online requests are subject to the
/// online-booking add-on and per-service/staff opt-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BookingChannel {
    #[default]
    Staff,
    Online,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    /// Caller-chosen id; generated when absent.
    pub id: Option<Ulid>,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub start: Ms,
    pub notes: Option<String>,
    pub channel: BookingChannel,
}

/// Fields a caller may change on an existing appointment. `None` keeps the
/// current value; `notes: Some("")` clears the notes.
#[derive(Debug, Clone, Default)]
pub struct AppointmentPatch {
    pub start: Option<Ms>,
    pub staff_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
    pub notes: Option<String>,
}

impl AppointmentPatch {
    fn reschedules(&self, current: &Appointment) -> bool {
        self.start.is_some_and(|s| s != current.span.start)
            || self.staff_id.is_some_and(|s| s != current.staff_id)
            || self.service_id.is_some_and(|s| s != current.service_id)
            || self.location_id.is_some_and(|l| l != current.location_id)
    }
}

/// Per-request identity and entitlements, resolved once at the edge.
#[derive(Debug, Clone, Copy)]
pub struct BookingContext {
    pub actor: Actor,
    pub entitlements: FeatureEntitlements,
}

impl BookingContext {
    pub fn system() -> Self {
        Self {
            actor: Actor::System,
            entitlements: FeatureEntitlements::default(),
        }
    }
}

fn check_text(value: Option<&str>, max: usize, what: &'static str) -> Result<(), BookingError> {
    match value {
        Some(v) if v.len() > max => Err(BookingError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes.filter(|n| !n.trim().is_empty())
}

fn record_outcome<T>(op: &'static str, started: Instant, result: &Result<T, BookingError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    metrics::counter!(BOOKINGS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(BOOKING_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
}

/// Everything a booking needs from the catalog, checked and copied out.
struct Resolved {
    location: Location,
    duration_minutes: u32,
    price_cents: i64,
}

impl Engine {
    /// Look up and cross-check the staff member, service and location of a
    /// booking. Caller holds the catalog gate.
    fn resolve_booking_refs(
        &self,
        staff_id: Ulid,
        service_id: Ulid,
        location_id: Ulid,
        channel: BookingChannel,
        entitlements: &FeatureEntitlements,
    ) -> Result<Resolved, BookingError> {
        let staff = self
            .staff
            .get(&staff_id)
            .map(|s| s.value().clone())
            .ok_or(BookingError::StaffNotFound(staff_id))?;
        let service = self
            .services
            .get(&service_id)
            .map(|s| s.value().clone())
            .ok_or(BookingError::ServiceNotFound(service_id))?;
        let location = self
            .locations
            .get(&location_id)
            .map(|l| l.value().clone())
            .ok_or(BookingError::LocationNotFound(location_id))?;

        if !service.is_active {
            return Err(BookingError::ServiceInactive(service_id));
        }
        if !staff.is_active {
            return Err(BookingError::StaffInactive(staff_id));
        }
        if !staff.performs(&service_id) {
            return Err(BookingError::StaffNotQualified {
                staff_id,
                service_id,
            });
        }
        if channel == BookingChannel::Online {
            if !entitlements.allows(Addon::OnlineBooking) {
                return Err(BookingError::AddonRequired(Addon::OnlineBooking));
            }
            if !service.online_booking_enabled {
                return Err(BookingError::NotBookableOnline("service is not bookable online"));
            }
            if !staff.online_booking_enabled {
                return Err(BookingError::NotBookableOnline("staff member does not take online bookings"));
            }
        }

        Ok(Resolved {
            duration_minutes: service.duration_at(&location_id),
            price_cents: service.price_at(&location_id),
            location,
        })
    }

    pub async fn create_appointment(
        &self,
        input: NewAppointment,
        ctx: &BookingContext,
    ) -> Result<Appointment, BookingError> {
        let started = Instant::now();
        let result = self
            .with_lock_retry("create", || self.try_create(&input, ctx))
            .await;
        record_outcome("create", started, &result);
        result
    }

    async fn try_create(&self, input: &NewAppointment, ctx: &BookingContext) -> Result<Appointment, BookingError> {
        check_text(input.notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;

        let _gate = self.catalog_gate.read().await;
        let id = input.id.unwrap_or_else(Ulid::new);
        let _claim = self.claim_appointment_id(id)?;
        if !self.clients.contains_key(&input.client_id) {
            return Err(BookingError::ClientNotFound(input.client_id));
        }
        let resolved = self.resolve_booking_refs(
            input.staff_id,
            input.service_id,
            input.location_id,
            input.channel,
            &ctx.entitlements,
        )?;

        let span = Span {
            start: input.start,
            end: input
                .start
                .saturating_add(Ms::from(resolved.duration_minutes) * MINUTE_MS),
        };
        validate_span(&span)?;
        let policy = self.settings.read().await.policy;

        let mut locks = self.lock_schedules(&[input.staff_id]).await?;
        let schedule = locks
            .get(input.staff_id)
            .ok_or(BookingError::StaffNotFound(input.staff_id))?;
        if schedule.appointments.len() >= MAX_APPOINTMENTS_PER_STAFF {
            return Err(BookingError::LimitExceeded("too many appointments for staff member"));
        }

        let now = self.now();
        time_range::validate(&policy, &resolved.location, &span, now)?;
        ensure_free(schedule, &span, None)?;

        let status = if resolved.location.auto_confirm {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Pending
        };
        let appointment = Appointment {
            id,
            client_id: input.client_id,
            staff_id: input.staff_id,
            service_id: input.service_id,
            location_id: input.location_id,
            span,
            status,
            notes: normalize_notes(input.notes.clone()),
            duration_minutes: resolved.duration_minutes,
            price_cents: resolved.price_cents,
            status_history: Vec::new(),
            cancel_reason: None,
            transaction_ref: None,
            created_at: now,
            updated_at: now,
        };

        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut locks, &event).await?;

        info!(appointment = %id, staff = %input.staff_id, actor = %ctx.actor, %status, "appointment booked");
        self.notify.publish(DomainEvent::AppointmentCreated {
            appointment: appointment.clone(),
        });
        Ok(appointment)
    }

    /// Patch an appointment. Scheduling changes on a live appointment are
    /// re-validated and re-checked for conflicts (excluding itself); a move
    /// to another staff member locks both schedules.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        patch: AppointmentPatch,
        ctx: &BookingContext,
    ) -> Result<Appointment, BookingError> {
        let started = Instant::now();
        let result = self
            .with_lock_retry("update", || self.try_update(id, &patch, ctx))
            .await;
        record_outcome("update", started, &result);
        result
    }

    async fn try_update(&self, id: Ulid, patch: &AppointmentPatch, ctx: &BookingContext) -> Result<Appointment, BookingError> {
        check_text(patch.notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;

        let _gate = self.catalog_gate.read().await;
        let (mut locks, current) = self.lock_appointment(id, patch.staff_id).await?;

        let mut next = current.clone();
        if patch.reschedules(&current) {
            if current.status.is_terminal() {
                return Err(super::TransitionError::AlreadyTerminal(current.status).into());
            }
            let staff_id = patch.staff_id.unwrap_or(current.staff_id);
            let service_id = patch.service_id.unwrap_or(current.service_id);
            let location_id = patch.location_id.unwrap_or(current.location_id);
            let resolved =
                self.resolve_booking_refs(staff_id, service_id, location_id, BookingChannel::Staff, &ctx.entitlements)?;

            // The snapshot is retaken only when the priced item changes.
            let (duration_minutes, price_cents) =
                if service_id != current.service_id || location_id != current.location_id {
                    (resolved.duration_minutes, resolved.price_cents)
                } else {
                    (current.duration_minutes, current.price_cents)
                };
            let start = patch.start.unwrap_or(current.span.start);
            let span = Span {
                start,
                end: start.saturating_add(Ms::from(duration_minutes) * MINUTE_MS),
            };
            validate_span(&span)?;

            let policy = self.settings.read().await.policy;
            time_range::validate(&policy, &resolved.location, &span, self.now())?;

            let target = locks.get(staff_id).ok_or(BookingError::StaffNotFound(staff_id))?;
            if staff_id != current.staff_id && target.appointments.len() >= MAX_APPOINTMENTS_PER_STAFF {
                return Err(BookingError::LimitExceeded("too many appointments for staff member"));
            }
            ensure_free(target, &span, Some(id))?;

            next.staff_id = staff_id;
            next.service_id = service_id;
            next.location_id = location_id;
            next.span = span;
            next.duration_minutes = duration_minutes;
            next.price_cents = price_cents;
        }
        if let Some(notes) = &patch.notes {
            next.notes = normalize_notes(Some(notes.clone()));
        }

        if next == current {
            debug!(appointment = %id, "update is a no-op");
            return Ok(current);
        }
        next.updated_at = self.now();

        let event = Event::AppointmentRevised {
            previous_staff_id: current.staff_id,
            appointment: next.clone(),
        };
        self.persist_and_apply(&mut locks, &event).await?;

        info!(appointment = %id, staff = %next.staff_id, actor = %ctx.actor, "appointment updated");
        self.notify.publish(DomainEvent::AppointmentUpdated {
            previous_staff_id: current.staff_id,
            appointment: next.clone(),
        });
        Ok(next)
    }

    /// Move an appointment along the status graph. Requesting the current
    /// status of a live appointment returns it unchanged.
    pub async fn transition_status(
        &self,
        id: Ulid,
        target: AppointmentStatus,
        reason: Option<String>,
        ctx: &BookingContext,
    ) -> Result<Appointment, BookingError> {
        let started = Instant::now();
        let result = self
            .with_lock_retry("transition", || self.try_transition(id, target, reason.as_deref(), ctx))
            .await;
        record_outcome("transition", started, &result);
        result
    }

    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        reason: Option<String>,
        ctx: &BookingContext,
    ) -> Result<Appointment, BookingError> {
        self.transition_status(id, AppointmentStatus::Cancelled, reason, ctx)
            .await
    }

    async fn try_transition(
        &self,
        id: Ulid,
        target: AppointmentStatus,
        reason: Option<&str>,
        ctx: &BookingContext,
    ) -> Result<Appointment, BookingError> {
        check_text(reason, MAX_REASON_LEN, "reason too long")?;

        let _gate = self.catalog_gate.read().await;
        let (mut locks, current) = self.lock_appointment(id, None).await?;

        let mut next = lifecycle::transition(&current, target, ctx.actor, self.now())?;
        if next == current {
            return Ok(current);
        }
        if target == AppointmentStatus::Cancelled {
            next.cancel_reason = normalize_notes(reason.map(str::to_owned));
        }

        let event = Event::AppointmentRevised {
            previous_staff_id: current.staff_id,
            appointment: next.clone(),
        };
        self.persist_and_apply(&mut locks, &event).await?;

        info!(appointment = %id, from = %current.status, to = %target, actor = %ctx.actor, "appointment status changed");
        let event = if target == AppointmentStatus::Cancelled {
            DomainEvent::AppointmentCancelled {
                appointment: next.clone(),
                reason: next.cancel_reason.clone(),
                actor: ctx.actor,
            }
        } else {
            DomainEvent::AppointmentStatusChanged {
                appointment: next.clone(),
                from: current.status,
                to: target,
                actor: ctx.actor,
            }
        };
        self.notify.publish(event);
        Ok(next)
    }

    /// Hard delete. Refused while a billing transaction references the
    /// appointment; cancellation is the normal way to free a slot.
    pub async fn delete_appointment(&self, id: Ulid, ctx: &BookingContext) -> Result<(), BookingError> {
        let started = Instant::now();
        let result = self.with_lock_retry("delete", || self.try_delete(id, ctx)).await;
        record_outcome("delete", started, &result);
        result
    }

    async fn try_delete(&self, id: Ulid, ctx: &BookingContext) -> Result<(), BookingError> {
        let _gate = self.catalog_gate.read().await;
        let (mut locks, current) = self.lock_appointment(id, None).await?;
        if current.transaction_ref.is_some() {
            return Err(BookingError::ReferencedByTransaction(id));
        }

        let event = Event::AppointmentDeleted {
            id,
            staff_id: current.staff_id,
        };
        self.persist_and_apply(&mut locks, &event).await?;

        info!(appointment = %id, actor = %ctx.actor, "appointment deleted");
        self.notify.publish(DomainEvent::AppointmentDeleted {
            id,
            staff_id: current.staff_id,
        });
        Ok(())
    }

    /// Attach an external billing reference to a completed appointment.
    pub async fn link_transaction(
        &self,
        id: Ulid,
        reference: String,
        ctx: &BookingContext,
    ) -> Result<Appointment, BookingError> {
        let started = Instant::now();
        let result = self
            .with_lock_retry("link_transaction", || self.try_link(id, &reference, ctx))
            .await;
        record_outcome("link_transaction", started, &result);
        result
    }

    async fn try_link(&self, id: Ulid, reference: &str, ctx: &BookingContext) -> Result<Appointment, BookingError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(BookingError::InvalidInput("transaction reference is empty".into()));
        }
        check_text(Some(reference), MAX_TRANSACTION_REF_LEN, "transaction reference too long")?;

        let _gate = self.catalog_gate.read().await;
        let (mut locks, current) = self.lock_appointment(id, None).await?;
        if current.status != AppointmentStatus::Completed {
            return Err(BookingError::NotCompleted(id));
        }
        if current.transaction_ref.as_deref() == Some(reference) {
            return Ok(current);
        }

        let mut next = current.clone();
        next.transaction_ref = Some(reference.to_owned());
        next.updated_at = self.now();
        let event = Event::AppointmentRevised {
            previous_staff_id: current.staff_id,
            appointment: next.clone(),
        };
        self.persist_and_apply(&mut locks, &event).await?;

        info!(appointment = %id, actor = %ctx.actor, "transaction linked");
        self.notify.publish(DomainEvent::AppointmentUpdated {
            previous_staff_id: current.staff_id,
            appointment: next.clone(),
        });
        Ok(next)
    }
}
