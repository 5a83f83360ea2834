use crate::model::*;

use super::TimeRangeError;

/// Check a proposed appointment span against business hours and the
/// advance-booking window. Pure: `now` is supplied by the caller.
///
/// Hours are looked up for the local weekday of `span.start`, so an
/// appointment may not run past closing or across midnight.
pub fn validate(
    policy: &BookingPolicy,
    location: &Location,
    span: &Span,
    now: Ms,
) -> Result<(), TimeRangeError> {
    if span.is_empty() {
        return Err(TimeRangeError::InvalidInterval);
    }

    let open = location
        .local_date(span.start)
        .and_then(|date| location.open_span(date))
        .ok_or(TimeRangeError::OutsideBusinessHours)?;
    if !open.contains_span(span) {
        return Err(TimeRangeError::OutsideBusinessHours);
    }

    let lead = span.start - now;
    if lead < policy.min_advance_ms() {
        return Err(TimeRangeError::LeadTimeViolation {
            min_advance_hours: policy.min_advance_hours,
        });
    }
    if let (Some(max_ms), Some(max_days)) = (policy.max_advance_ms(), policy.max_advance_days)
        && lead > max_ms
    {
        return Err(TimeRangeError::TooFarInAdvance {
            max_advance_days: max_days,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use ulid::Ulid;

    use super::*;

    fn monday_at(h: u32, m: u32) -> Ms {
        NaiveDate::from_ymd_opt(2030, 1, 7)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn salon() -> Location {
        let mut hours = [WeekdayHours::open(9 * 60, 17 * 60); 7];
        hours[6] = WeekdayHours::closed();
        Location {
            id: Ulid::new(),
            name: "Salon".into(),
            utc_offset_minutes: 0,
            auto_confirm: false,
            hours,
        }
    }

    const LONG_AGO: Ms = 0;

    #[test]
    fn inside_hours_passes() {
        let span = Span::new(monday_at(9, 0), monday_at(10, 0));
        assert_eq!(validate(&BookingPolicy::default(), &salon(), &span, LONG_AGO), Ok(()));
        // Ending exactly at close is fine.
        let last = Span::new(monday_at(16, 0), monday_at(17, 0));
        assert_eq!(validate(&BookingPolicy::default(), &salon(), &last, LONG_AGO), Ok(()));
    }

    #[test]
    fn before_open_is_rejected() {
        let span = Span::new(monday_at(8, 0), monday_at(9, 0));
        assert_eq!(
            validate(&BookingPolicy::default(), &salon(), &span, LONG_AGO),
            Err(TimeRangeError::OutsideBusinessHours)
        );
    }

    #[test]
    fn running_past_close_is_rejected() {
        let span = Span::new(monday_at(16, 30), monday_at(17, 30));
        assert_eq!(
            validate(&BookingPolicy::default(), &salon(), &span, LONG_AGO),
            Err(TimeRangeError::OutsideBusinessHours)
        );
    }

    #[test]
    fn closed_day_is_rejected() {
        let sunday = monday_at(10, 0) - DAY_MS;
        let span = Span::new(sunday, sunday + HOUR_MS);
        assert_eq!(
            validate(&BookingPolicy::default(), &salon(), &span, LONG_AGO),
            Err(TimeRangeError::OutsideBusinessHours)
        );
    }

    #[test]
    fn empty_interval_is_rejected_first() {
        let span = Span {
            start: monday_at(10, 0),
            end: monday_at(10, 0),
        };
        assert_eq!(
            validate(&BookingPolicy::default(), &salon(), &span, LONG_AGO),
            Err(TimeRangeError::InvalidInterval)
        );
    }

    #[test]
    fn lead_time_enforced() {
        let policy = BookingPolicy {
            min_advance_hours: 2,
            ..BookingPolicy::default()
        };
        let span = Span::new(monday_at(10, 0), monday_at(11, 0));
        let now = monday_at(9, 0);
        assert_eq!(
            validate(&policy, &salon(), &span, now),
            Err(TimeRangeError::LeadTimeViolation { min_advance_hours: 2 })
        );
        assert_eq!(validate(&policy, &salon(), &span, monday_at(8, 0)), Ok(()));
    }

    #[test]
    fn default_policy_rejects_the_past() {
        let span = Span::new(monday_at(10, 0), monday_at(11, 0));
        assert!(matches!(
            validate(&BookingPolicy::default(), &salon(), &span, monday_at(12, 0)),
            Err(TimeRangeError::LeadTimeViolation { .. })
        ));
    }

    #[test]
    fn advance_window_enforced() {
        let policy = BookingPolicy {
            max_advance_days: Some(30),
            ..BookingPolicy::default()
        };
        let span = Span::new(monday_at(10, 0), monday_at(11, 0));
        let now = span.start - 31 * DAY_MS;
        assert_eq!(
            validate(&policy, &salon(), &span, now),
            Err(TimeRangeError::TooFarInAdvance { max_advance_days: 30 })
        );
        assert_eq!(validate(&policy, &salon(), &span, span.start - 30 * DAY_MS), Ok(()));
    }
}
