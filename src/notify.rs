use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Actor, Appointment, AppointmentStatus};

const CHANNEL_CAPACITY: usize = 256;

/// Published after a change is durable. Consumers (mailers, calendars,
/// the SSE stream) subscribe; the engine itself never sends messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    AppointmentCreated {
        appointment: Appointment,
    },
    AppointmentUpdated {
        previous_staff_id: Ulid,
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        appointment: Appointment,
        from: AppointmentStatus,
        to: AppointmentStatus,
        actor: Actor,
    },
    AppointmentCancelled {
        appointment: Appointment,
        reason: Option<String>,
        actor: Actor,
    },
    AppointmentDeleted {
        id: Ulid,
        staff_id: Ulid,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::AppointmentCreated { .. } => "AppointmentCreated",
            DomainEvent::AppointmentUpdated { .. } => "AppointmentUpdated",
            DomainEvent::AppointmentStatusChanged { .. } => "AppointmentStatusChanged",
            DomainEvent::AppointmentCancelled { .. } => "AppointmentCancelled",
            DomainEvent::AppointmentDeleted { .. } => "AppointmentDeleted",
        }
    }

    /// Staff members whose calendars the event touches.
    pub fn staff_ids(&self) -> Vec<Ulid> {
        match self {
            DomainEvent::AppointmentCreated { appointment }
            | DomainEvent::AppointmentStatusChanged { appointment, .. }
            | DomainEvent::AppointmentCancelled { appointment, .. } => vec![appointment.staff_id],
            DomainEvent::AppointmentUpdated {
                previous_staff_id,
                appointment,
            } if *previous_staff_id != appointment.staff_id => {
                vec![*previous_staff_id, appointment.staff_id]
            }
            DomainEvent::AppointmentUpdated { appointment, .. } => vec![appointment.staff_id],
            DomainEvent::AppointmentDeleted { staff_id, .. } => vec![*staff_id],
        }
    }
}

/// Per-tenant broadcast hub: one firehose plus lazily created per-staff channels.
pub struct NotifyHub {
    all: broadcast::Sender<DomainEvent>,
    by_staff: DashMap<Ulid, broadcast::Sender<DomainEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            by_staff: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.all.subscribe()
    }

    /// Events touching one staff member's calendar.
    pub fn subscribe_staff(&self, staff_id: Ulid) -> broadcast::Receiver<DomainEvent> {
        self.by_staff
            .entry(staff_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op when nobody is listening.
    pub fn publish(&self, event: DomainEvent) {
        metrics::counter!(crate::observability::EVENTS_PUBLISHED_TOTAL, "event" => event.name())
            .increment(1);
        for staff_id in event.staff_ids() {
            if let Some(sender) = self.by_staff.get(&staff_id) {
                let _ = sender.send(event.clone());
            }
            // Channels whose subscribers have all gone are dropped.
            self.by_staff
                .remove_if(&staff_id, |_, sender| sender.receiver_count() == 0);
        }
        let _ = self.all.send(event);
    }

    /// Drop a staff member's channel (e.g. when they are deleted).
    pub fn remove_staff(&self, staff_id: &Ulid) {
        self.by_staff.remove(staff_id);
    }
}
