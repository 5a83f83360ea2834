use crate::model::*;

use super::TransitionError;

impl AppointmentStatus {
    /// Statuses reachable in one step. Terminal statuses have none.
    pub fn allowed_targets(self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Completed, Cancelled, NoShow],
            Completed | Cancelled | NoShow => &[],
        }
    }

    pub fn can_transition_to(self, target: AppointmentStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

/// Apply one status transition, returning the updated appointment.
///
/// Re-requesting the current status of a live appointment is a no-op and
/// returns it unchanged (no history entry). Terminal statuses reject every
/// target, including their own.
pub fn transition(
    appointment: &Appointment,
    target: AppointmentStatus,
    actor: Actor,
    at: Ms,
) -> Result<Appointment, TransitionError> {
    let current = appointment.status;
    if current.is_terminal() {
        return Err(TransitionError::AlreadyTerminal(current));
    }
    if current == target {
        return Ok(appointment.clone());
    }
    if !current.can_transition_to(target) {
        return Err(TransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    let mut next = appointment.clone();
    next.status = target;
    next.updated_at = at;
    next.status_history.push(StatusChange {
        from: current,
        to: target,
        at,
        actor,
    });
    Ok(next)
}

/// True when `history` is a walk of the status graph starting at `initial`.
#[cfg(test)]
pub(crate) fn is_valid_walk(initial: AppointmentStatus, history: &[StatusChange]) -> bool {
    let mut current = initial;
    for change in history {
        if change.from != current || !current.can_transition_to(change.to) {
            return false;
        }
        current = change.to;
    }
    true
}
