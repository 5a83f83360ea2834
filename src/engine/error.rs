use thiserror::Error;
use ulid::Ulid;

use crate::model::{Addon, AppointmentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeRangeError {
    #[error("end must be after start")]
    InvalidInterval,
    #[error("appointment falls outside business hours")]
    OutsideBusinessHours,
    #[error("appointments must be booked at least {min_advance_hours}h in advance")]
    LeadTimeViolation { min_advance_hours: u32 },
    #[error("appointments cannot be booked more than {max_advance_days} days ahead")]
    TooFarInAdvance { max_advance_days: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("appointment is already {0}")]
    AlreadyTerminal(AppointmentStatus),
}

/// Coarse classification used by callers to decide on retries and status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Reference,
    Forbidden,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error(transparent)]
    TimeRange(#[from] TimeRangeError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("{0}")]
    NotBookableOnline(&'static str),

    #[error("slot conflicts with appointment {0}")]
    SlotConflict(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("{0} is still referenced by appointments")]
    HasAppointments(Ulid),
    #[error("appointment {0} is referenced by a transaction")]
    ReferencedByTransaction(Ulid),
    #[error("appointment {0} is not completed")]
    NotCompleted(Ulid),

    #[error("client not found: {0}")]
    ClientNotFound(Ulid),
    #[error("staff member not found: {0}")]
    StaffNotFound(Ulid),
    #[error("service not found: {0}")]
    ServiceNotFound(Ulid),
    #[error("location not found: {0}")]
    LocationNotFound(Ulid),
    #[error("appointment not found: {0}")]
    AppointmentNotFound(Ulid),
    #[error("service {0} is inactive")]
    ServiceInactive(Ulid),
    #[error("staff member {0} is inactive")]
    StaffInactive(Ulid),
    #[error("staff member {staff_id} is not assigned to service {service_id}")]
    StaffNotQualified { staff_id: Ulid, service_id: Ulid },

    #[error("add-on required: {0:?}")]
    AddonRequired(Addon),

    #[error("timed out waiting for schedule lock of {0}")]
    LockTimeout(Ulid),
    #[error("storage error: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        use BookingError::*;
        match self {
            TimeRange(_) | InvalidInput(_) | LimitExceeded(_) | NotBookableOnline(_) => {
                ErrorKind::Validation
            }
            Transition(_)
            | SlotConflict(_)
            | AlreadyExists(_)
            | HasAppointments(_)
            | ReferencedByTransaction(_)
            | NotCompleted(_) => ErrorKind::Conflict,
            ClientNotFound(_)
            | StaffNotFound(_)
            | ServiceNotFound(_)
            | LocationNotFound(_)
            | AppointmentNotFound(_)
            | ServiceInactive(_)
            | StaffInactive(_)
            | StaffNotQualified { .. } => ErrorKind::Reference,
            AddonRequired(_) => ErrorKind::Forbidden,
            LockTimeout(_) | Storage(_) => ErrorKind::Infrastructure,
        }
    }

    /// Only lock contention is known to clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, BookingError::LockTimeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        use BookingError::*;
        matches!(
            self,
            ClientNotFound(_)
                | StaffNotFound(_)
                | ServiceNotFound(_)
                | LocationNotFound(_)
                | AppointmentNotFound(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        use BookingError::*;
        match self {
            TimeRange(TimeRangeError::InvalidInterval) => "INVALID_INTERVAL",
            TimeRange(TimeRangeError::OutsideBusinessHours) => "OUTSIDE_BUSINESS_HOURS",
            TimeRange(TimeRangeError::LeadTimeViolation { .. }) => "LEAD_TIME_VIOLATION",
            TimeRange(TimeRangeError::TooFarInAdvance { .. }) => "TOO_FAR_IN_ADVANCE",
            Transition(TransitionError::InvalidTransition { .. }) => "INVALID_TRANSITION",
            Transition(TransitionError::AlreadyTerminal(_)) => "ALREADY_TERMINAL",
            InvalidInput(_) => "INVALID_INPUT",
            LimitExceeded(_) => "LIMIT_EXCEEDED",
            NotBookableOnline(_) => "NOT_BOOKABLE_ONLINE",
            SlotConflict(_) => "SLOT_CONFLICT",
            AlreadyExists(_) => "ALREADY_EXISTS",
            HasAppointments(_) => "HAS_APPOINTMENTS",
            ReferencedByTransaction(_) => "REFERENCED_BY_TRANSACTION",
            NotCompleted(_) => "NOT_COMPLETED",
            ClientNotFound(_) => "CLIENT_NOT_FOUND",
            StaffNotFound(_) => "STAFF_NOT_FOUND",
            ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            LocationNotFound(_) => "LOCATION_NOT_FOUND",
            AppointmentNotFound(_) => "APPOINTMENT_NOT_FOUND",
            ServiceInactive(_) => "SERVICE_INACTIVE",
            StaffInactive(_) => "STAFF_INACTIVE",
            StaffNotQualified { .. } => "STAFF_NOT_QUALIFIED",
            AddonRequired(_) => "ADDON_REQUIRED",
            LockTimeout(_) => "LOCK_TIMEOUT",
            Storage(_) => "STORAGE_ERROR",
        }
    }
}
