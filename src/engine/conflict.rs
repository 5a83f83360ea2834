use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::BookingError;

pub(crate) fn system_now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), BookingError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Live appointments on `schedule` that collide with `span`.
///
/// Both sides are extended by the staff member's turnaround buffer, so with
/// no buffer this is the plain half-open rule `a0 < b1 && b0 < a1`.
/// Lazy and restartable: each call walks the current snapshot again.
pub fn find_conflicts<'a>(
    schedule: &'a StaffSchedule,
    span: &Span,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a Appointment> + use<'a> {
    let buffer = schedule.buffer_after;
    let candidate = span.padded(buffer);
    // Anything ending more than `buffer` before the candidate cannot reach it.
    let window = Span {
        start: span.start - buffer,
        end: candidate.end,
    };
    schedule
        .overlapping(&window)
        .filter(move |a| a.status.is_live())
        .filter(move |a| Some(a.id) != exclude)
        .filter(move |a| a.span.padded(buffer).overlaps(&candidate))
}

pub(crate) fn ensure_free(
    schedule: &StaffSchedule,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), BookingError> {
    match find_conflicts(schedule, span, exclude).next() {
        Some(existing) => {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            Err(BookingError::SlotConflict(existing.id))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE_MS;

    fn booked(start: Ms, end: Ms, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            client_id: Ulid::new(),
            staff_id: Ulid::new(),
            service_id: Ulid::new(),
            location_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            notes: None,
            duration_minutes: ((end - start) / M) as u32,
            price_cents: 0,
            status_history: Vec::new(),
            cancel_reason: None,
            transaction_ref: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn schedule(buffer: Ms, appointments: Vec<Appointment>) -> StaffSchedule {
        let mut s = StaffSchedule::new(Ulid::new(), buffer);
        for a in appointments {
            s.insert(a);
        }
        s
    }

    #[test]
    fn overlapping_live_appointment_conflicts() {
        let existing = booked(600 * M, 660 * M, AppointmentStatus::Pending);
        let id = existing.id;
        let s = schedule(0, vec![existing]);
        let hits: Vec<_> = find_conflicts(&s, &Span::new(630 * M, 690 * M), None).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
    }

    #[test]
    fn touching_edges_do_not_conflict() {
        let s = schedule(0, vec![booked(600 * M, 630 * M, AppointmentStatus::Confirmed)]);
        assert_eq!(find_conflicts(&s, &Span::new(630 * M, 660 * M), None).count(), 0);
        assert_eq!(find_conflicts(&s, &Span::new(570 * M, 600 * M), None).count(), 0);
    }

    #[test]
    fn terminal_appointments_never_conflict() {
        let s = schedule(
            0,
            vec![
                booked(600 * M, 660 * M, AppointmentStatus::Cancelled),
                booked(600 * M, 660 * M, AppointmentStatus::NoShow),
                booked(600 * M, 660 * M, AppointmentStatus::Completed),
            ],
        );
        assert!(ensure_free(&s, &Span::new(600 * M, 660 * M), None).is_ok());
    }

    #[test]
    fn excluded_appointment_is_skipped() {
        let existing = booked(600 * M, 660 * M, AppointmentStatus::Pending);
        let id = existing.id;
        let s = schedule(0, vec![existing]);
        assert!(ensure_free(&s, &Span::new(615 * M, 675 * M), Some(id)).is_ok());
        assert!(matches!(
            ensure_free(&s, &Span::new(615 * M, 675 * M), None),
            Err(BookingError::SlotConflict(hit)) if hit == id
        ));
    }

    #[test]
    fn buffer_extends_both_sides() {
        let s = schedule(15 * M, vec![booked(600 * M, 660 * M, AppointmentStatus::Confirmed)]);
        // Starts inside the existing appointment's turnaround.
        assert!(ensure_free(&s, &Span::new(670 * M, 700 * M), None).is_err());
        // Its own turnaround would run into the existing appointment.
        assert!(ensure_free(&s, &Span::new(550 * M, 590 * M), None).is_err());
        // Clear on both sides.
        assert!(ensure_free(&s, &Span::new(675 * M, 700 * M), None).is_ok());
        assert!(ensure_free(&s, &Span::new(540 * M, 585 * M), None).is_ok());
    }

    #[test]
    fn find_conflicts_is_restartable() {
        let s = schedule(
            0,
            vec![
                booked(600 * M, 630 * M, AppointmentStatus::Pending),
                booked(620 * M, 650 * M, AppointmentStatus::Confirmed),
            ],
        );
        let query = Span::new(610 * M, 640 * M);
        let first: Vec<Ulid> = find_conflicts(&s, &query, None).map(|a| a.id).collect();
        let second: Vec<Ulid> = find_conflicts(&s, &query, None).map(|a| a.id).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }
}
