use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{BookingError, Engine};

fn check_name(name: &str, what: &'static str) -> Result<(), BookingError> {
    if name.trim().is_empty() {
        return Err(BookingError::InvalidInput(format!("{what} name is empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(BookingError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn check_hours(hours: &[WeekdayHours; 7]) -> Result<(), BookingError> {
    for (day, h) in hours.iter().enumerate() {
        if !h.is_open {
            continue;
        }
        if h.close_minute > 24 * 60 || h.close_minute <= h.open_minute {
            return Err(BookingError::InvalidInput(format!(
                "weekday {day}: closing time must be after opening time"
            )));
        }
    }
    Ok(())
}

fn check_duration(minutes: u32) -> Result<(), BookingError> {
    if minutes == 0 {
        return Err(BookingError::InvalidInput("duration must be positive".into()));
    }
    if minutes > MAX_SERVICE_DURATION_MINUTES {
        return Err(BookingError::LimitExceeded("service duration too long"));
    }
    Ok(())
}

impl Engine {
    fn ensure_room<V>(map: &dashmap::DashMap<Ulid, V>, id: &Ulid) -> Result<(), BookingError> {
        if !map.contains_key(id) && map.len() >= MAX_CATALOG_ENTRIES {
            return Err(BookingError::LimitExceeded("too many catalog entries"));
        }
        Ok(())
    }

    /// Any appointment, live or historical, matching `pred`. Caller holds
    /// the catalog gate exclusively, so no schedule is being written.
    async fn any_appointment(&self, pred: impl Fn(&Appointment) -> bool) -> bool {
        let schedules: Vec<_> = self.schedules.iter().map(|e| e.value().clone()).collect();
        for schedule in schedules {
            if schedule.read().await.appointments.iter().any(&pred) {
                return true;
            }
        }
        false
    }

    /// Log and apply a catalog event under the exclusive gate.
    async fn commit_catalog(&self, event: Event) -> Result<(), BookingError> {
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(())
    }

    // ── Locations ────────────────────────────────────────────

    pub async fn upsert_location(&self, location: Location) -> Result<Location, BookingError> {
        check_name(&location.name, "location")?;
        if location.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(BookingError::InvalidInput("utc offset out of range".into()));
        }
        check_hours(&location.hours)?;

        let _gate = self.catalog_gate.write().await;
        Self::ensure_room(&self.locations, &location.id)?;
        self.commit_catalog(Event::LocationUpserted {
            location: location.clone(),
        })
        .await?;
        info!(location = %location.id, "location saved");
        Ok(location)
    }

    pub fn get_location(&self, id: &Ulid) -> Result<Location, BookingError> {
        self.locations
            .get(id)
            .map(|l| l.value().clone())
            .ok_or(BookingError::LocationNotFound(*id))
    }

    pub fn list_locations(&self) -> Vec<Location> {
        let mut out: Vec<Location> = self.locations.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|l| l.id);
        out
    }

    // ── Services ─────────────────────────────────────────────

    pub async fn upsert_service(&self, service: Service) -> Result<Service, BookingError> {
        check_name(&service.name, "service")?;
        check_duration(service.duration_minutes)?;
        if service.price_cents < 0 {
            return Err(BookingError::InvalidInput("price must not be negative".into()));
        }
        for o in service.overrides.values() {
            if let Some(d) = o.duration_minutes {
                check_duration(d)?;
            }
            if o.price_cents.is_some_and(|p| p < 0) {
                return Err(BookingError::InvalidInput("price must not be negative".into()));
            }
        }

        let _gate = self.catalog_gate.write().await;
        for location_id in service.overrides.keys() {
            if !self.locations.contains_key(location_id) {
                return Err(BookingError::LocationNotFound(*location_id));
            }
        }
        Self::ensure_room(&self.services, &service.id)?;
        self.commit_catalog(Event::ServiceUpserted {
            service: service.clone(),
        })
        .await?;
        info!(service = %service.id, "service saved");
        Ok(service)
    }

    /// Refused while any appointment references the service. Staff
    /// assignments to it are dropped.
    pub async fn delete_service(&self, id: Ulid) -> Result<(), BookingError> {
        let _gate = self.catalog_gate.write().await;
        if !self.services.contains_key(&id) {
            return Err(BookingError::ServiceNotFound(id));
        }
        if self.any_appointment(|a| a.service_id == id).await {
            return Err(BookingError::HasAppointments(id));
        }
        self.commit_catalog(Event::ServiceDeleted { id }).await?;
        info!(service = %id, "service deleted");
        Ok(())
    }

    pub fn get_service(&self, id: &Ulid) -> Result<Service, BookingError> {
        self.services
            .get(id)
            .map(|s| s.value().clone())
            .ok_or(BookingError::ServiceNotFound(*id))
    }

    pub fn list_services(&self) -> Vec<Service> {
        let mut out: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    // ── Staff ────────────────────────────────────────────────

    pub async fn upsert_staff(&self, staff: StaffMember) -> Result<StaffMember, BookingError> {
        check_name(&staff.name, "staff")?;
        if staff.service_ids.len() > MAX_SERVICES_PER_STAFF {
            return Err(BookingError::LimitExceeded("too many services for staff member"));
        }
        if staff.buffer_after_minutes.is_some_and(|b| b > MAX_BUFFER_MINUTES) {
            return Err(BookingError::LimitExceeded("buffer too long"));
        }

        let _gate = self.catalog_gate.write().await;
        if let Some(missing) = staff.service_ids.iter().find(|s| !self.services.contains_key(s)) {
            return Err(BookingError::ServiceNotFound(*missing));
        }
        Self::ensure_room(&self.staff, &staff.id)?;

        let event = Event::StaffUpserted { staff: staff.clone() };
        self.wal_append(&event).await?;
        if let Some(schedule) = self.apply_catalog(&event) {
            schedule.write().await.buffer_after = staff.buffer_ms();
        }
        info!(staff = %staff.id, "staff member saved");
        Ok(staff)
    }

    /// Refused while the staff member has any appointment on record.
    pub async fn delete_staff(&self, id: Ulid) -> Result<(), BookingError> {
        let _gate = self.catalog_gate.write().await;
        let schedule = self.schedule(&id).ok_or(BookingError::StaffNotFound(id))?;
        if !schedule.read().await.appointments.is_empty() {
            return Err(BookingError::HasAppointments(id));
        }
        self.commit_catalog(Event::StaffDeleted { id }).await?;
        info!(staff = %id, "staff member deleted");
        Ok(())
    }

    pub fn get_staff(&self, id: &Ulid) -> Result<StaffMember, BookingError> {
        self.staff
            .get(id)
            .map(|s| s.value().clone())
            .ok_or(BookingError::StaffNotFound(*id))
    }

    pub fn list_staff(&self) -> Vec<StaffMember> {
        let mut out: Vec<StaffMember> = self.staff.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    // ── Clients ──────────────────────────────────────────────

    pub async fn upsert_client(&self, client: Client) -> Result<Client, BookingError> {
        check_name(&client.name, "client")?;
        for contact in [&client.email, &client.phone].into_iter().flatten() {
            if contact.len() > MAX_CONTACT_LEN {
                return Err(BookingError::LimitExceeded("contact detail too long"));
            }
        }

        let _gate = self.catalog_gate.write().await;
        Self::ensure_room(&self.clients, &client.id)?;
        self.commit_catalog(Event::ClientUpserted {
            client: client.clone(),
        })
        .await?;
        info!(client = %client.id, "client saved");
        Ok(client)
    }

    /// Refused while any appointment references the client.
    pub async fn delete_client(&self, id: Ulid) -> Result<(), BookingError> {
        let _gate = self.catalog_gate.write().await;
        if !self.clients.contains_key(&id) {
            return Err(BookingError::ClientNotFound(id));
        }
        if self.any_appointment(|a| a.client_id == id).await {
            return Err(BookingError::HasAppointments(id));
        }
        self.commit_catalog(Event::ClientDeleted { id }).await?;
        info!(client = %id, "client deleted");
        Ok(())
    }

    pub fn get_client(&self, id: &Ulid) -> Result<Client, BookingError> {
        self.clients
            .get(id)
            .map(|c| c.value().clone())
            .ok_or(BookingError::ClientNotFound(*id))
    }

    pub fn list_clients(&self) -> Vec<Client> {
        let mut out: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|c| c.id);
        out
    }

    // ── Settings ─────────────────────────────────────────────

    pub async fn settings(&self) -> TenantSettings {
        self.settings.read().await.clone()
    }

    pub async fn entitlements(&self) -> FeatureEntitlements {
        FeatureEntitlements::from_settings(&*self.settings.read().await)
    }

    pub async fn update_settings(&self, settings: TenantSettings) -> Result<TenantSettings, BookingError> {
        let policy = &settings.policy;
        if policy.slot_granularity_minutes == 0 {
            return Err(BookingError::InvalidInput("slot granularity must be positive".into()));
        }
        if policy.slot_granularity_minutes > MAX_SLOT_GRANULARITY_MINUTES {
            return Err(BookingError::LimitExceeded("slot granularity too large"));
        }
        if policy.max_advance_days.is_some_and(|d| d > MAX_ADVANCE_DAYS) {
            return Err(BookingError::LimitExceeded("advance window too long"));
        }
        if policy.min_advance_hours > MAX_ADVANCE_DAYS * 24 {
            return Err(BookingError::LimitExceeded("lead time too long"));
        }

        let _gate = self.catalog_gate.write().await;
        let mut current = self.settings.write().await;
        self.wal_append(&Event::SettingsUpdated {
            settings: settings.clone(),
        })
        .await?;
        *current = settings.clone();
        info!(addons = ?settings.addons, "settings updated");
        Ok(settings)
    }
}
