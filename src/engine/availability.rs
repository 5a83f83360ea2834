use chrono::NaiveDate;

use crate::model::*;

use super::time_range;

// ── Availability Algorithm ────────────────────────────────────────

/// Bookable start slots for one staff member on one local date.
///
/// Candidates begin at the day's opening time and step by the policy
/// granularity; each has length `duration`. A candidate survives when it
/// fits inside a free window (opening hours minus padded live appointments)
/// and passes the time-range validator against `now`.
///
/// Pure over a snapshot: the caller holds the schedule's read lock.
pub fn available_slots(
    schedule: &StaffSchedule,
    location: &Location,
    policy: &BookingPolicy,
    date: NaiveDate,
    duration: Ms,
    now: Ms,
) -> Vec<Span> {
    let Some(open) = location.open_span(date) else {
        return Vec::new();
    };
    if duration <= 0 || duration > open.duration_ms() {
        return Vec::new();
    }

    let free = free_windows(schedule, &open);
    if free.is_empty() {
        return Vec::new();
    }

    let step = policy.granularity_ms();
    let mut slots = Vec::new();
    let mut window = 0;
    let mut start = open.start;
    while start + duration <= open.end {
        let candidate = Span::new(start, start + duration);

        while window < free.len() && free[window].end < candidate.end {
            window += 1;
        }
        if window == free.len() {
            break;
        }
        if free[window].contains_span(&candidate)
            && time_range::validate(policy, location, &candidate, now).is_ok()
        {
            slots.push(candidate);
        }
        start += step;
    }
    slots
}

/// Opening hours minus every live appointment, padded on both sides by the
/// staff member's buffer so a slot placed in a window keeps its own
/// turnaround clear as well.
pub fn free_windows(schedule: &StaffSchedule, open: &Span) -> Vec<Span> {
    let buffer = schedule.buffer_after;
    let reach = Span {
        start: open.start - buffer,
        end: open.end + buffer,
    };
    let mut busy: Vec<Span> = schedule
        .overlapping(&reach)
        .filter(|a| a.status.is_live())
        .map(|a| Span {
            start: a.span.start - buffer,
            end: a.span.end + buffer,
        })
        .collect();
    if busy.is_empty() {
        return vec![*open];
    }
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&[*open], &busy)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted, disjoint `base`.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
