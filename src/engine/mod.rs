mod availability;
mod booking;
mod catalog;
mod conflict;
mod error;
pub mod lifecycle;
mod queries;
pub mod time_range;

pub use availability::{available_slots, free_windows, merge_overlapping, subtract_intervals};
pub use booking::{AppointmentPatch, BookingChannel, BookingContext, NewAppointment};
pub use conflict::find_conflicts;
pub use error::{BookingError, ErrorKind, TimeRangeError, TransitionError};

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::{Wal, WalHandle};

pub type SharedSchedule = Arc<RwLock<StaffSchedule>>;

/// Source of "now" for validation. Swappable so tests can pin time.
pub type Clock = Arc<dyn Fn() -> Ms + Send + Sync>;

/// One tenant's booking state.
///
/// Lock order: `catalog_gate` first, then staff schedules in ascending id
/// order. Appointment writes hold the gate shared; catalog and settings
/// writes (and compaction) hold it exclusively, so reference checks never
/// race with bookings. Domain events are published before the schedule
/// locks are released, so per-staff event order matches commit order.
pub struct Engine {
    pub(super) schedules: DashMap<Ulid, SharedSchedule>,
    /// appointment id → staff id
    pub(super) appointment_index: DashMap<Ulid, Ulid>,
    /// Ids held by creates that have not committed yet.
    pub(super) claimed_ids: DashSet<Ulid>,
    pub(super) locations: DashMap<Ulid, Location>,
    pub(super) services: DashMap<Ulid, Service>,
    pub(super) staff: DashMap<Ulid, StaffMember>,
    pub(super) clients: DashMap<Ulid, Client>,
    pub(super) settings: RwLock<TenantSettings>,
    pub(super) catalog_gate: RwLock<()>,
    pub(super) wal: WalHandle,
    pub notify: Arc<NotifyHub>,
    clock: Clock,
}

/// Write guards over the schedules one operation touches, in id order.
pub(super) struct ScheduleLocks {
    guards: Vec<OwnedRwLockWriteGuard<StaffSchedule>>,
}

impl ScheduleLocks {
    pub(super) fn get(&self, staff_id: Ulid) -> Option<&StaffSchedule> {
        self.guards
            .iter()
            .find(|g| g.staff_id == staff_id)
            .map(|g| &**g)
    }

    fn all_mut(&mut self) -> impl Iterator<Item = &mut StaffSchedule> {
        self.guards.iter_mut().map(|g| &mut **g)
    }
}

/// Exclusive hold on a new appointment id, released on drop.
pub(super) struct IdClaim<'a> {
    claims: &'a DashSet<Ulid>,
    id: Ulid,
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

/// Staff schedules an appointment event touches.
fn event_staff_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::AppointmentBooked { appointment } => vec![appointment.staff_id],
        Event::AppointmentRevised {
            previous_staff_id,
            appointment,
        } if *previous_staff_id != appointment.staff_id => {
            vec![*previous_staff_id, appointment.staff_id]
        }
        Event::AppointmentRevised { appointment, .. } => vec![appointment.staff_id],
        Event::AppointmentDeleted { staff_id, .. } => vec![*staff_id],
        _ => Vec::new(),
    }
}

/// Apply an appointment event to one locked schedule. Events that do not
/// concern `schedule` leave it untouched.
fn apply_to_schedule(schedule: &mut StaffSchedule, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AppointmentBooked { appointment } if appointment.staff_id == schedule.staff_id => {
            schedule.insert(appointment.clone());
            index.insert(appointment.id, appointment.staff_id);
        }
        Event::AppointmentRevised {
            previous_staff_id,
            appointment,
        } => {
            if *previous_staff_id == schedule.staff_id {
                schedule.remove(appointment.id);
            }
            if appointment.staff_id == schedule.staff_id {
                schedule.remove(appointment.id);
                schedule.insert(appointment.clone());
                index.insert(appointment.id, appointment.staff_id);
            }
        }
        Event::AppointmentDeleted { id, staff_id } if *staff_id == schedule.staff_id => {
            schedule.remove(*id);
            index.remove(id);
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, Arc::new(conflict::system_now_ms))
    }

    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn with_clock(wal_path: PathBuf, notify: Arc<NotifyHub>, clock: Clock) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = WalHandle::spawn(Wal::open(&wal_path)?);

        let engine = Self {
            schedules: DashMap::new(),
            appointment_index: DashMap::new(),
            claimed_ids: DashSet::new(),
            locations: DashMap::new(),
            services: DashMap::new(),
            staff: DashMap::new(),
            clients: DashMap::new(),
            settings: RwLock::new(TenantSettings::default()),
            catalog_gate: RwLock::new(()),
            wal,
            notify,
            clock,
        };

        // Sole owner of every lock here, so try_* never contends. Blocking
        // variants would panic when this runs inside the runtime.
        let replay_err = |what: &str| io::Error::other(format!("replay: {what} unexpectedly locked"));
        for event in &events {
            match event {
                Event::SettingsUpdated { settings } => {
                    *engine.settings.try_write().map_err(|_| replay_err("settings"))? = settings.clone();
                }
                Event::StaffUpserted { staff } => {
                    let schedule = engine.apply_catalog(event);
                    if let Some(schedule) = schedule {
                        schedule
                            .try_write()
                            .map_err(|_| replay_err("schedule"))?
                            .buffer_after = staff.buffer_ms();
                    }
                }
                Event::AppointmentBooked { .. }
                | Event::AppointmentRevised { .. }
                | Event::AppointmentDeleted { .. } => {
                    for staff_id in event_staff_ids(event) {
                        let Some(schedule) = engine.schedule(&staff_id) else {
                            warn!(%staff_id, "replay: appointment event for unknown staff member");
                            continue;
                        };
                        let mut guard = schedule.try_write().map_err(|_| replay_err("schedule"))?;
                        apply_to_schedule(&mut guard, event, &engine.appointment_index);
                    }
                }
                _ => {
                    engine.apply_catalog(event);
                }
            }
        }

        tracing::debug!(
            path = %wal_path.display(),
            events = events.len(),
            appointments = engine.appointment_index.len(),
            "tenant state replayed"
        );
        Ok(engine)
    }

    pub fn now(&self) -> Ms {
        (self.clock)()
    }

    pub fn schedule(&self, staff_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(staff_id).map(|e| e.value().clone())
    }

    pub fn staff_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_index.get(appointment_id).map(|e| *e.value())
    }

    /// Apply a catalog event to the lookup maps. For staff upserts, returns
    /// the (possibly new) schedule so the caller can update its buffer under
    /// the schedule lock.
    pub(super) fn apply_catalog(&self, event: &Event) -> Option<SharedSchedule> {
        match event {
            Event::LocationUpserted { location } => {
                self.locations.insert(location.id, location.clone());
            }
            Event::ServiceUpserted { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
                for mut member in self.staff.iter_mut() {
                    member.service_ids.remove(id);
                }
            }
            Event::StaffUpserted { staff } => {
                self.staff.insert(staff.id, staff.clone());
                let schedule = self
                    .schedules
                    .entry(staff.id)
                    .or_insert_with(|| {
                        Arc::new(RwLock::new(StaffSchedule::new(staff.id, staff.buffer_ms())))
                    })
                    .clone();
                return Some(schedule);
            }
            Event::StaffDeleted { id } => {
                self.staff.remove(id);
                self.schedules.remove(id);
                self.notify.remove_staff(id);
            }
            Event::ClientUpserted { client } => {
                self.clients.insert(client.id, client.clone());
            }
            Event::ClientDeleted { id } => {
                self.clients.remove(id);
            }
            Event::SettingsUpdated { .. }
            | Event::AppointmentBooked { .. }
            | Event::AppointmentRevised { .. }
            | Event::AppointmentDeleted { .. } => {}
        }
        None
    }

    /// Durably log an event through the group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), BookingError> {
        self.wal
            .append(event.clone())
            .await
            .map_err(|e| BookingError::Storage(e.to_string()))
    }

    /// WAL append, then apply to every locked schedule the event touches.
    /// State is never changed for an event that did not reach disk.
    pub(super) async fn persist_and_apply(
        &self,
        locks: &mut ScheduleLocks,
        event: &Event,
    ) -> Result<(), BookingError> {
        self.wal_append(event).await?;
        for schedule in locks.all_mut() {
            apply_to_schedule(schedule, event, &self.appointment_index);
        }
        Ok(())
    }

    /// Reserve `id` for a create. The index is checked after the claim is
    /// taken, so a create that committed and released the id is still seen.
    pub(super) fn claim_appointment_id(&self, id: Ulid) -> Result<IdClaim<'_>, BookingError> {
        if !self.claimed_ids.insert(id) {
            return Err(BookingError::AlreadyExists(id));
        }
        let claim = IdClaim {
            claims: &self.claimed_ids,
            id,
        };
        if self.appointment_index.contains_key(&id) {
            return Err(BookingError::AlreadyExists(id));
        }
        Ok(claim)
    }

    /// Write-lock the schedules of `staff_ids` in ascending id order, each
    /// bounded by `LOCK_TIMEOUT`.
    pub(super) async fn lock_schedules(&self, staff_ids: &[Ulid]) -> Result<ScheduleLocks, BookingError> {
        let mut ids = staff_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let schedule = self.schedule(&id).ok_or(BookingError::StaffNotFound(id))?;
            let guard = tokio::time::timeout(LOCK_TIMEOUT, schedule.write_owned())
                .await
                .map_err(|_| BookingError::LockTimeout(id))?;
            guards.push(guard);
        }
        Ok(ScheduleLocks { guards })
    }

    /// Lock the schedule holding `appointment_id` (plus `extra_staff`, if
    /// any) and return a copy of the appointment as it stands under the lock.
    ///
    /// The index is read before locking, so a concurrent move to another
    /// staff member is detected after locking and resolved again.
    pub(super) async fn lock_appointment(
        &self,
        appointment_id: Ulid,
        extra_staff: Option<Ulid>,
    ) -> Result<(ScheduleLocks, Appointment), BookingError> {
        for _ in 0..MAX_RELOCK_ATTEMPTS {
            let staff_id = self
                .staff_for_appointment(&appointment_id)
                .ok_or(BookingError::AppointmentNotFound(appointment_id))?;
            let mut ids = vec![staff_id];
            ids.extend(extra_staff);
            let locks = self.lock_schedules(&ids).await?;
            let current = locks
                .get(staff_id)
                .and_then(|s| s.get(appointment_id))
                .cloned();
            if let Some(appointment) = current {
                return Ok((locks, appointment));
            }
        }
        Err(BookingError::LockTimeout(appointment_id))
    }

    /// Run `attempt` again while it fails with a transient error, backing off
    /// exponentially. Definite outcomes (conflicts, validation) return at once.
    pub(super) async fn with_lock_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, BookingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BookingError>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Err(e) if e.is_transient() && retries < LOCK_RETRY_ATTEMPTS => {
                    let backoff = LOCK_RETRY_BASE_BACKOFF * 2u32.pow(retries);
                    retries += 1;
                    metrics::counter!(crate::observability::LOCK_RETRIES_TOTAL, "op" => op).increment(1);
                    warn!(op, retries, ?backoff, "retrying after transient failure: {e}");
                    tokio::time::sleep(backoff).await;
                }
                outcome => return outcome,
            }
        }
    }
}
