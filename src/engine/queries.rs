use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::available_slots;
use super::conflict::{self, validate_span};
use super::{BookingError, Engine, SharedSchedule};

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, BookingError> {
        // An appointment can move between schedules between the index read
        // and the lock; look again in that case.
        for _ in 0..MAX_RELOCK_ATTEMPTS {
            let staff_id = self
                .staff_for_appointment(&id)
                .ok_or(BookingError::AppointmentNotFound(id))?;
            let Some(schedule) = self.schedule(&staff_id) else {
                continue;
            };
            if let Some(found) = schedule.read().await.get(id) {
                return Ok(found.clone());
            }
        }
        Err(BookingError::AppointmentNotFound(id))
    }

    /// Appointments matching `filter`, ordered by start time. The date
    /// filter uses the local calendar of each appointment's location.
    pub async fn list_appointments(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let schedules: Vec<SharedSchedule> = match filter.staff_id {
            Some(staff_id) => self.schedule(&staff_id).into_iter().collect(),
            None => self.schedules.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for schedule in schedules {
            let guard = schedule.read().await;
            out.extend(
                guard
                    .appointments
                    .iter()
                    .filter(|a| filter.status.is_none_or(|s| a.status == s))
                    .filter(|a| filter.location_id.is_none_or(|l| a.location_id == l))
                    .filter(|a| filter.date.is_none_or(|d| self.local_date_of(a) == Some(d)))
                    .cloned(),
            );
        }
        out.sort_by_key(|a| (a.span.start, a.id));
        out
    }

    fn local_date_of(&self, appointment: &Appointment) -> Option<NaiveDate> {
        self.locations
            .get(&appointment.location_id)
            .and_then(|location| location.local_date(appointment.span.start))
    }

    /// Bookable slots for a staff member and service on a local date.
    ///
    /// Computed from one read-locked snapshot of the schedule; a slot can
    /// still be taken before the caller books it, which the commit-time
    /// conflict check reports.
    pub async fn list_available_slots(
        &self,
        staff_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        location_id: Ulid,
    ) -> Result<Vec<Span>, BookingError> {
        let (location, duration, policy, schedule) = {
            let _gate = self.catalog_gate.read().await;
            let staff = self.get_staff(&staff_id)?;
            let service = self.get_service(&service_id)?;
            let location = self.get_location(&location_id)?;
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
            let duration = Ms::from(service.duration_at(&location_id)) * MINUTE_MS;
            let policy = self.settings.read().await.policy;
            let schedule = self
                .schedule(&staff_id)
                .ok_or(BookingError::StaffNotFound(staff_id))?;
            (location, duration, policy, schedule)
        };

        let guard = schedule.read().await;
        Ok(available_slots(&guard, &location, &policy, date, duration, self.now()))
    }

    /// Live appointments of `staff_id` colliding with `span`.
    pub async fn find_conflicts(
        &self,
        staff_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Appointment>, BookingError> {
        if span.is_empty() {
            return Err(super::TimeRangeError::InvalidInterval.into());
        }
        validate_span(&span)?;
        let schedule = self
            .schedule(&staff_id)
            .ok_or(BookingError::StaffNotFound(staff_id))?;
        let guard = schedule.read().await;
        Ok(conflict::find_conflicts(&guard, &span, exclude).cloned().collect())
    }

    /// The minimal event list that recreates current state: settings, then
    /// catalog, then each appointment as last committed.
    async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = vec![Event::SettingsUpdated {
            settings: self.settings.read().await.clone(),
        }];
        events.extend(self.list_locations().into_iter().map(|location| Event::LocationUpserted { location }));
        events.extend(self.list_services().into_iter().map(|service| Event::ServiceUpserted { service }));
        events.extend(self.list_staff().into_iter().map(|staff| Event::StaffUpserted { staff }));
        events.extend(self.list_clients().into_iter().map(|client| Event::ClientUpserted { client }));

        let mut staff_ids: Vec<Ulid> = self.schedules.iter().map(|e| *e.key()).collect();
        staff_ids.sort();
        for staff_id in staff_ids {
            if let Some(schedule) = self.schedule(&staff_id) {
                let guard = schedule.read().await;
                events.extend(guard.appointments.iter().map(|a| Event::AppointmentBooked {
                    appointment: a.clone(),
                }));
            }
        }
        events
    }

    /// Rewrite the WAL as a snapshot of current state. Holds the catalog
    /// gate exclusively so no write lands between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), BookingError> {
        let _gate = self.catalog_gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();
        self.wal
            .compact(events)
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))?;
        tracing::info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
