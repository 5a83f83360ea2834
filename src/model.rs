use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Extend the end by `buffer` (turnaround time after an appointment).
    pub fn padded(&self, buffer: Ms) -> Span {
        Span {
            start: self.start,
            end: self.end + buffer,
        }
    }
}

// ── Appointment ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Live appointments hold their slot; everything else never conflicts.
    pub fn is_live(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a change. Carried explicitly through every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Owner,
    System,
    Staff(Ulid),
    Client(Ulid),
}

impl std::str::FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("owner") => Ok(Actor::Owner),
            None if s.eq_ignore_ascii_case("system") => Ok(Actor::System),
            Some(("staff", id)) => id.parse().map(Actor::Staff).map_err(|e| format!("{e}")),
            Some(("client", id)) => id.parse().map(Actor::Client).map_err(|e| format!("{e}")),
            _ => Err(format!("unrecognised actor: {s}")),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Owner => f.write_str("owner"),
            Actor::System => f.write_str("system"),
            Actor::Staff(id) => write!(f, "staff:{id}"),
            Actor::Client(id) => write!(f, "client:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub at: Ms,
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    /// Snapshot of the service at booking time.
    pub duration_minutes: u32,
    pub price_cents: i64,
    pub status_history: Vec<StatusChange>,
    pub cancel_reason: Option<String>,
    /// External billing reference; blocks hard deletion.
    pub transaction_ref: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

// ── Catalog ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOverride {
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    pub price_cents: i64,
    pub is_active: bool,
    pub online_booking_enabled: bool,
    /// Per-location price/duration overrides.
    pub overrides: HashMap<Ulid, ServiceOverride>,
}

impl Service {
    pub fn duration_at(&self, location_id: &Ulid) -> u32 {
        self.overrides
            .get(location_id)
            .and_then(|o| o.duration_minutes)
            .unwrap_or(self.duration_minutes)
    }

    pub fn price_at(&self, location_id: &Ulid) -> i64 {
        self.overrides
            .get(location_id)
            .and_then(|o| o.price_cents)
            .unwrap_or(self.price_cents)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Ulid,
    pub name: String,
    pub is_active: bool,
    pub online_booking_enabled: bool,
    pub service_ids: BTreeSet<Ulid>,
    /// Turnaround time after each appointment (cleanup, setup).
    pub buffer_after_minutes: Option<u32>,
}

impl StaffMember {
    pub fn performs(&self, service_id: &Ulid) -> bool {
        self.service_ids.contains(service_id)
    }

    pub fn buffer_ms(&self) -> Ms {
        Ms::from(self.buffer_after_minutes.unwrap_or(0)) * MINUTE_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Opening hours for one weekday, in minutes after local midnight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdayHours {
    pub is_open: bool,
    pub open_minute: u16,
    pub close_minute: u16,
}

impl WeekdayHours {
    pub fn open(open_minute: u16, close_minute: u16) -> Self {
        Self {
            is_open: true,
            open_minute,
            close_minute,
        }
    }

    pub fn closed() -> Self {
        Self::default()
    }
}

/// Parse a local `"HH:MM"` time into minutes after midnight.
pub fn parse_hhmm(s: &str) -> Option<u16> {
    let t = NaiveTime::parse_from_str(s, "%H:%M").ok()?;
    let minutes = chrono::Timelike::hour(&t) * 60 + chrono::Timelike::minute(&t);
    u16::try_from(minutes).ok()
}

pub fn format_hhmm(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: Ulid,
    pub name: String,
    /// Fixed UTC offset used to interpret local business hours.
    pub utc_offset_minutes: i32,
    pub auto_confirm: bool,
    /// Indexed Monday = 0 .. Sunday = 6.
    pub hours: [WeekdayHours; 7],
}

impl Location {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Local calendar date of an instant at this location.
    pub fn local_date(&self, t: Ms) -> Option<NaiveDate> {
        let utc = DateTime::<Utc>::from_timestamp_millis(t)?;
        Some(utc.with_timezone(&self.offset()).date_naive())
    }

    pub fn hours_on(&self, date: NaiveDate) -> WeekdayHours {
        self.hours[date.weekday().num_days_from_monday() as usize]
    }

    /// The open interval for `date`, or `None` when closed.
    pub fn open_span(&self, date: NaiveDate) -> Option<Span> {
        let hours = self.hours_on(date);
        if !hours.is_open || hours.close_minute <= hours.open_minute {
            return None;
        }
        let midnight = self
            .offset()
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .single()?
            .timestamp_millis();
        Some(Span::new(
            midnight + Ms::from(hours.open_minute) * MINUTE_MS,
            midnight + Ms::from(hours.close_minute) * MINUTE_MS,
        ))
    }
}

// ── Tenant settings ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    pub min_advance_hours: u32,
    pub max_advance_days: Option<u32>,
    pub slot_granularity_minutes: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_advance_hours: 0,
            max_advance_days: None,
            slot_granularity_minutes: 15,
        }
    }
}

impl BookingPolicy {
    pub fn min_advance_ms(&self) -> Ms {
        Ms::from(self.min_advance_hours) * HOUR_MS
    }

    pub fn max_advance_ms(&self) -> Option<Ms> {
        self.max_advance_days.map(|d| Ms::from(d) * DAY_MS)
    }

    pub fn granularity_ms(&self) -> Ms {
        Ms::from(self.slot_granularity_minutes.max(1)) * MINUTE_MS
    }
}

/// Purchasable feature toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Addon {
    OnlineBooking,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub policy: BookingPolicy,
    pub addons: BTreeSet<Addon>,
}

/// Resolved once per request from tenant settings and passed down explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureEntitlements {
    pub online_booking: bool,
}

impl FeatureEntitlements {
    pub fn from_settings(settings: &TenantSettings) -> Self {
        Self {
            online_booking: settings.addons.contains(&Addon::OnlineBooking),
        }
    }

    pub fn allows(&self, addon: Addon) -> bool {
        match addon {
            Addon::OnlineBooking => self.online_booking,
        }
    }
}

// ── Per-staff schedule ──────────────────────────────────────────

/// All appointments of one staff member, sorted by `span.start`.
/// Guarded by its own lock; that lock is the per-staff booking lock.
#[derive(Debug, Clone)]
pub struct StaffSchedule {
    pub staff_id: Ulid,
    pub buffer_after: Ms,
    pub appointments: Vec<Appointment>,
}

impl StaffSchedule {
    pub fn new(staff_id: Ulid, buffer_after: Ms) -> Self {
        Self {
            staff_id,
            buffer_after,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.span.start <= appointment.span.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping<'a>(&'a self, query: &Span) -> impl Iterator<Item = &'a Appointment> + use<'a> {
        let query = *query;
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }
}

/// The WAL record format. Catalog records carry full snapshots; appointment
/// records carry the committed appointment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SettingsUpdated { settings: TenantSettings },
    LocationUpserted { location: Location },
    ServiceUpserted { service: Service },
    ServiceDeleted { id: Ulid },
    StaffUpserted { staff: StaffMember },
    StaffDeleted { id: Ulid },
    ClientUpserted { client: Client },
    ClientDeleted { id: Ulid },
    AppointmentBooked { appointment: Appointment },
    AppointmentRevised { previous_staff_id: Ulid, appointment: Appointment },
    AppointmentDeleted { id: Ulid, staff_id: Ulid },
}

/// Filter for appointment listings. `date` is the local date at the
/// appointment's location.
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
    pub staff_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(start: Ms, end: Ms) -> Appointment {
        Appointment {
            id: Ulid::new(),
            client_id: Ulid::new(),
            staff_id: Ulid::new(),
            service_id: Ulid::new(),
            location_id: Ulid::new(),
            span: Span::new(start, end),
            status: AppointmentStatus::Pending,
            notes: None,
            duration_minutes: ((end - start) / MINUTE_MS) as u32,
            price_cents: 0,
            status_history: Vec::new(),
            cancel_reason: None,
            transaction_ref: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn weekday_location(offset_minutes: i32) -> Location {
        let mut hours = [WeekdayHours::open(9 * 60, 17 * 60); 7];
        hours[6] = WeekdayHours::closed();
        Location {
            id: Ulid::new(),
            name: "Main".into(),
            utc_offset_minutes: offset_minutes,
            auto_confirm: false,
            hours,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // touching
        assert!(a.padded(1).overlaps(&c));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn schedule_keeps_start_order() {
        let mut s = StaffSchedule::new(Ulid::new(), 0);
        s.insert(appointment(300, 400));
        s.insert(appointment(100, 200));
        s.insert(appointment(200, 300));
        let starts: Vec<Ms> = s.appointments.iter().map(|a| a.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn schedule_remove_middle_preserves_order() {
        let mut s = StaffSchedule::new(Ulid::new(), 0);
        let a = appointment(0, 50);
        let b = appointment(100, 150);
        let c = appointment(200, 250);
        let (ida, idb, idc) = (a.id, b.id, c.id);
        s.insert(a);
        s.insert(b);
        s.insert(c);
        assert!(s.remove(idb).is_some());
        assert!(s.remove(Ulid::new()).is_none());
        assert_eq!(s.appointments[0].id, ida);
        assert_eq!(s.appointments[1].id, idc);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut s = StaffSchedule::new(Ulid::new(), 0);
        s.insert(appointment(100, 200));
        s.insert(appointment(450, 600));
        s.insert(appointment(1000, 1100));
        let hits: Vec<_> = s.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));

        let adjacent: Vec<_> = s.overlapping(&Span::new(200, 300)).collect();
        assert!(adjacent.is_empty());
    }

    #[test]
    fn open_span_respects_offset() {
        let monday = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        assert_eq!(monday.weekday(), chrono::Weekday::Mon);

        let utc = weekday_location(0);
        let span = utc.open_span(monday).unwrap();
        let expected_open = monday
            .and_hms_opt(9, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        assert_eq!(span.start, expected_open);
        assert_eq!(span.duration_ms(), 8 * HOUR_MS);

        // UTC+2: local 09:00 is 07:00 UTC.
        let plus_two = weekday_location(120);
        let shifted = plus_two.open_span(monday).unwrap();
        assert_eq!(shifted.start, expected_open - 2 * HOUR_MS);
    }

    #[test]
    fn closed_day_has_no_open_span() {
        let sunday = NaiveDate::from_ymd_opt(2030, 1, 6).unwrap();
        assert!(weekday_location(0).open_span(sunday).is_none());
    }

    #[test]
    fn local_date_crosses_midnight_with_offset() {
        let loc = weekday_location(-300); // UTC-5
        let t = NaiveDate::from_ymd_opt(2030, 1, 7)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        assert_eq!(loc.local_date(t), NaiveDate::from_ymd_opt(2030, 1, 6));
    }

    #[test]
    fn hhmm_parsing() {
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("23:59"), Some(1439));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("9am"), None);
        assert_eq!(format_hhmm(570), "09:30");
    }

    #[test]
    fn service_overrides_apply_per_location() {
        let here = Ulid::new();
        let elsewhere = Ulid::new();
        let mut overrides = HashMap::new();
        overrides.insert(
            here,
            ServiceOverride {
                price_cents: Some(6_000),
                duration_minutes: None,
            },
        );
        let svc = Service {
            id: Ulid::new(),
            name: "Cut".into(),
            duration_minutes: 45,
            price_cents: 5_000,
            is_active: true,
            online_booking_enabled: true,
            overrides,
        };
        assert_eq!(svc.price_at(&here), 6_000);
        assert_eq!(svc.duration_at(&here), 45);
        assert_eq!(svc.price_at(&elsewhere), 5_000);
    }

    #[test]
    fn actor_parse_and_display() {
        let id = Ulid::new();
        let actor: Actor = format!("staff:{id}").parse().unwrap();
        assert_eq!(actor, Actor::Staff(id));
        assert_eq!(actor.to_string(), format!("staff:{id}"));
        assert_eq!("owner".parse::<Actor>().unwrap(), Actor::Owner);
        assert!("robot".parse::<Actor>().is_err());
    }

    #[test]
    fn entitlements_follow_addons() {
        let mut settings = TenantSettings::default();
        assert!(!FeatureEntitlements::from_settings(&settings).allows(Addon::OnlineBooking));
        settings.addons.insert(Addon::OnlineBooking);
        assert!(FeatureEntitlements::from_settings(&settings).allows(Addon::OnlineBooking));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentBooked {
            appointment: appointment(0, 30 * MINUTE_MS),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
