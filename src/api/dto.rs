//! JSON shapes of the HTTP API: camelCase fields, RFC 3339 UTC instants,
//! `"HH:MM"` local opening hours.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use validator::{Validate, ValidationError};

use crate::engine::{AppointmentPatch, BookingChannel, NewAppointment};
use crate::model::*;
use crate::notify::DomainEvent;

use super::ApiError;

pub fn to_utc(ms: Ms) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

// ── Appointments ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeDto {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub at: DateTime<Utc>,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDto {
    pub id: Ulid,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub duration_minutes: u32,
    pub price_cents: i64,
    pub status_history: Vec<StatusChangeDto>,
    pub cancel_reason: Option<String>,
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Appointment> for AppointmentDto {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id,
            client_id: a.client_id,
            staff_id: a.staff_id,
            service_id: a.service_id,
            location_id: a.location_id,
            start: to_utc(a.span.start),
            end: to_utc(a.span.end),
            status: a.status,
            notes: a.notes,
            duration_minutes: a.duration_minutes,
            price_cents: a.price_cents,
            status_history: a
                .status_history
                .into_iter()
                .map(|c| StatusChangeDto {
                    from: c.from,
                    to: c.to,
                    at: to_utc(c.at),
                    actor: c.actor.to_string(),
                })
                .collect(),
            cancel_reason: a.cancel_reason,
            transaction_ref: a.transaction_ref,
            created_at: to_utc(a.created_at),
            updated_at: to_utc(a.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelDto {
    #[default]
    Staff,
    Online,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub id: Option<Ulid>,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub start: DateTime<Utc>,
    #[validate(length(max = 2000, message = "notes are too long"))]
    pub notes: Option<String>,
    #[serde(default)]
    pub channel: ChannelDto,
}

impl From<CreateAppointmentRequest> for NewAppointment {
    fn from(r: CreateAppointmentRequest) -> Self {
        Self {
            id: r.id,
            client_id: r.client_id,
            staff_id: r.staff_id,
            service_id: r.service_id,
            location_id: r.location_id,
            start: r.start.timestamp_millis(),
            notes: r.notes,
            channel: match r.channel {
                ChannelDto::Staff => BookingChannel::Staff,
                ChannelDto::Online => BookingChannel::Online,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentRequest {
    pub start: Option<DateTime<Utc>>,
    pub staff_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
    #[validate(length(max = 2000, message = "notes are too long"))]
    pub notes: Option<String>,
}

impl From<UpdateAppointmentRequest> for AppointmentPatch {
    fn from(r: UpdateAppointmentRequest) -> Self {
        Self {
            start: r.start.map(|s| s.timestamp_millis()),
            staff_id: r.staff_id,
            service_id: r.service_id,
            location_id: r.location_id,
            notes: r.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    pub status: AppointmentStatus,
    #[validate(length(max = 500, message = "reason is too long"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[validate(length(min = 1, max = 128, message = "reference must be 1-128 characters"))]
    pub reference: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentQuery {
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
    pub staff_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
}

impl From<AppointmentQuery> for AppointmentFilter {
    fn from(q: AppointmentQuery) -> Self {
        Self {
            date: q.date,
            status: q.status,
            staff_id: q.staff_id,
            location_id: q.location_id,
        }
    }
}

// ── Availability ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub location_id: Ulid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub exclude_id: Option<Ulid>,
}

impl ConflictQuery {
    pub fn span(&self) -> Span {
        Span {
            start: self.start.timestamp_millis(),
            end: self.end.timestamp_millis(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub staff_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl From<Span> for TimeSlot {
    fn from(s: Span) -> Self {
        Self {
            start: to_utc(s.start),
            end: to_utc(s.end),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub date: NaiveDate,
    pub slots: Vec<TimeSlot>,
}

// ── Catalog ─────────────────────────────────────────────────────

fn validate_hhmm(value: &str) -> Result<(), ValidationError> {
    parse_hhmm(value)
        .map(|_| ())
        .ok_or_else(|| ValidationError::new("hhmm").with_message("expected HH:MM".into()))
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WeekdayHoursDto {
    pub is_open: bool,
    #[validate(custom(function = "validate_hhmm"))]
    pub open: Option<String>,
    #[validate(custom(function = "validate_hhmm"))]
    pub close: Option<String>,
}

impl WeekdayHoursDto {
    fn into_model(self, day: usize) -> Result<WeekdayHours, ApiError> {
        if !self.is_open {
            return Ok(WeekdayHours::closed());
        }
        let parse = |v: Option<String>, what: &str| {
            v.as_deref()
                .and_then(parse_hhmm)
                .ok_or_else(|| ApiError::bad_request(format!("hours[{day}].{what} is required when open")))
        };
        Ok(WeekdayHours::open(parse(self.open, "open")?, parse(self.close, "close")?))
    }
}

impl From<WeekdayHours> for WeekdayHoursDto {
    fn from(h: WeekdayHours) -> Self {
        Self {
            is_open: h.is_open,
            open: h.is_open.then(|| format_hhmm(h.open_minute)),
            close: h.is_open.then(|| format_hhmm(h.close_minute)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LocationDto {
    #[serde(default)]
    pub id: Option<Ulid>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = -840, max = 840))]
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub auto_confirm: bool,
    /// Monday first.
    #[validate(length(equal = 7), nested)]
    pub hours: Vec<WeekdayHoursDto>,
}

impl LocationDto {
    pub fn into_model(self, id: Ulid) -> Result<Location, ApiError> {
        let mut hours = [WeekdayHours::closed(); 7];
        if self.hours.len() != hours.len() {
            return Err(ApiError::bad_request("hours must list seven weekdays, Monday first"));
        }
        for (day, h) in self.hours.into_iter().enumerate() {
            hours[day] = h.into_model(day)?;
        }
        Ok(Location {
            id,
            name: self.name,
            utc_offset_minutes: self.utc_offset_minutes,
            auto_confirm: self.auto_confirm,
            hours,
        })
    }
}

impl From<Location> for LocationDto {
    fn from(l: Location) -> Self {
        Self {
            id: Some(l.id),
            name: l.name,
            utc_offset_minutes: l.utc_offset_minutes,
            auto_confirm: l.auto_confirm,
            hours: l.hours.into_iter().map(WeekdayHoursDto::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverrideDto {
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<u32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDto {
    #[serde(default)]
    pub id: Option<Ulid>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: u32,
    #[validate(range(min = 0))]
    pub price_cents: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub online_booking_enabled: bool,
    /// Keyed by location id.
    #[serde(default)]
    pub overrides: HashMap<Ulid, ServiceOverrideDto>,
}

impl ServiceDto {
    pub fn into_model(self, id: Ulid) -> Service {
        Service {
            id,
            name: self.name,
            duration_minutes: self.duration_minutes,
            price_cents: self.price_cents,
            is_active: self.is_active,
            online_booking_enabled: self.online_booking_enabled,
            overrides: self
                .overrides
                .into_iter()
                .map(|(location, o)| {
                    (
                        location,
                        ServiceOverride {
                            price_cents: o.price_cents,
                            duration_minutes: o.duration_minutes,
                        },
                    )
                })
                .collect(),
        }
    }
}

impl From<Service> for ServiceDto {
    fn from(s: Service) -> Self {
        Self {
            id: Some(s.id),
            name: s.name,
            duration_minutes: s.duration_minutes,
            price_cents: s.price_cents,
            is_active: s.is_active,
            online_booking_enabled: s.online_booking_enabled,
            overrides: s
                .overrides
                .into_iter()
                .map(|(location, o)| {
                    (
                        location,
                        ServiceOverrideDto {
                            price_cents: o.price_cents,
                            duration_minutes: o.duration_minutes,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StaffDto {
    #[serde(default)]
    pub id: Option<Ulid>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub online_booking_enabled: bool,
    #[serde(default)]
    pub service_ids: BTreeSet<Ulid>,
    #[validate(range(max = 240))]
    pub buffer_after_minutes: Option<u32>,
}

impl StaffDto {
    pub fn into_model(self, id: Ulid) -> StaffMember {
        StaffMember {
            id,
            name: self.name,
            is_active: self.is_active,
            online_booking_enabled: self.online_booking_enabled,
            service_ids: self.service_ids,
            buffer_after_minutes: self.buffer_after_minutes,
        }
    }
}

impl From<StaffMember> for StaffDto {
    fn from(s: StaffMember) -> Self {
        Self {
            id: Some(s.id),
            name: s.name,
            is_active: s.is_active,
            online_booking_enabled: s.online_booking_enabled,
            service_ids: s.service_ids,
            buffer_after_minutes: s.buffer_after_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClientDto {
    #[serde(default)]
    pub id: Option<Ulid>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email, length(max = 254))]
    pub email: Option<String>,
    #[validate(length(max = 254))]
    pub phone: Option<String>,
}

impl ClientDto {
    pub fn into_model(self, id: Ulid) -> Client {
        Client {
            id,
            name: self.name,
            email: self.email,
            phone: self.phone,
        }
    }
}

impl From<Client> for ClientDto {
    fn from(c: Client) -> Self {
        Self {
            id: Some(c.id),
            name: c.name,
            email: c.email,
            phone: c.phone,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDto {
    #[serde(default)]
    pub min_advance_hours: u32,
    #[validate(range(min = 1, max = 3660))]
    pub max_advance_days: Option<u32>,
    #[validate(range(min = 1, max = 1440))]
    pub slot_granularity_minutes: u32,
    #[serde(default)]
    pub addons: BTreeSet<Addon>,
}

impl From<SettingsDto> for TenantSettings {
    fn from(s: SettingsDto) -> Self {
        Self {
            policy: BookingPolicy {
                min_advance_hours: s.min_advance_hours,
                max_advance_days: s.max_advance_days,
                slot_granularity_minutes: s.slot_granularity_minutes,
            },
            addons: s.addons,
        }
    }
}

impl From<TenantSettings> for SettingsDto {
    fn from(s: TenantSettings) -> Self {
        Self {
            min_advance_hours: s.policy.min_advance_hours,
            max_advance_days: s.policy.max_advance_days,
            slot_granularity_minutes: s.policy.slot_granularity_minutes,
            addons: s.addons,
        }
    }
}

// ── Events ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub appointment_id: Ulid,
    pub staff_id: Ulid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_staff_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment: Option<AppointmentDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<DomainEvent> for EventDto {
    fn from(event: DomainEvent) -> Self {
        let kind = event.name();
        let blank = |appointment: &Appointment| EventDto {
            kind,
            appointment_id: appointment.id,
            staff_id: appointment.staff_id,
            previous_staff_id: None,
            appointment: None,
            from: None,
            to: None,
            actor: None,
            reason: None,
        };
        match event {
            DomainEvent::AppointmentCreated { appointment } => EventDto {
                appointment: Some(appointment.clone().into()),
                ..blank(&appointment)
            },
            DomainEvent::AppointmentUpdated {
                previous_staff_id,
                appointment,
            } => EventDto {
                previous_staff_id: Some(previous_staff_id),
                appointment: Some(appointment.clone().into()),
                ..blank(&appointment)
            },
            DomainEvent::AppointmentStatusChanged {
                appointment,
                from,
                to,
                actor,
            } => EventDto {
                appointment: Some(appointment.clone().into()),
                from: Some(from),
                to: Some(to),
                actor: Some(actor.to_string()),
                ..blank(&appointment)
            },
            DomainEvent::AppointmentCancelled {
                appointment,
                reason,
                actor,
            } => EventDto {
                appointment: Some(appointment.clone().into()),
                actor: Some(actor.to_string()),
                reason,
                ..blank(&appointment)
            },
            DomainEvent::AppointmentDeleted { id, staff_id } => EventDto {
                kind,
                appointment_id: id,
                staff_id,
                previous_staff_id: None,
                appointment: None,
                from: None,
                to: None,
                actor: None,
                reason: None,
            },
        }
    }
}
