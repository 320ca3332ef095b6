use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::model::*;
use crate::timegrid::{MINUTES_PER_DAY, local_now};

use super::availability::{DayOverlay, normalize, subtract_intervals};
use super::error::UnavailableReason;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Earliest bookable start on `date` in the provider's zone.
/// Past dates are fully cut off; future dates not at all.
pub(crate) fn cutoff_for(tz: Tz, date: NaiveDate) -> Minute {
    let (today, now) = local_now(tz);
    if date < today {
        MINUTES_PER_DAY
    } else if date == today {
        now
    } else {
        0
    }
}

/// Sorted, merged spans held by active bookings.
pub fn active_booking_spans(bookings: &[Booking]) -> Vec<Span> {
    normalize(
        bookings
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.span)
            .collect(),
    )
}

/// Open intervals minus active bookings.
pub fn free_intervals(open: &[Span], bookings: &[Booking]) -> Vec<Span> {
    subtract_intervals(open, &active_booking_spans(bookings))
}

/// Start candidates of `duration` minutes on the clock grid of `granularity`.
///
/// A slot is emitted only if it fits entirely inside one free interval and
/// starts at or after `not_before`.
pub fn enumerate_slots(
    free: &[Span],
    duration: Minute,
    granularity: Minute,
    not_before: Minute,
) -> Vec<Span> {
    let mut slots = Vec::new();
    if duration == 0 || granularity == 0 {
        return slots;
    }
    let (duration, step) = (u32::from(duration), u32::from(granularity));

    for interval in free {
        if u32::from(interval.duration()) < duration {
            continue;
        }
        let floor = u32::from(interval.start.max(not_before));
        let mut start = floor.div_ceil(step) * step;
        let end = u32::from(interval.end);
        while start + duration <= end {
            // start + duration <= end <= 1440, both fit a u16
            slots.push(Span::new(start as Minute, (start + duration) as Minute));
            start += step;
        }
    }
    slots
}

/// Check one candidate against the day's open set and bookings.
pub fn validate_candidate(
    overlay: &DayOverlay,
    bookings: &[Booking],
    candidate: Span,
    duration: Minute,
    not_before: Minute,
) -> Result<(), EngineError> {
    if candidate.duration() < duration {
        return Err(EngineError::SlotTooShort {
            required: duration,
            available: candidate.duration(),
        });
    }
    if candidate.start < not_before {
        return Err(EngineError::unavailable(UnavailableReason::InPast, candidate));
    }

    if !overlay.open.iter().any(|o| o.contains_span(&candidate)) {
        if overlay.closed_all_day || overlay.blocked.iter().any(|b| b.overlaps(&candidate)) {
            return Err(EngineError::unavailable(
                UnavailableReason::ExceptionBlocked,
                candidate,
            ));
        }
        if let Some(open) = overlay.open.iter().find(|o| o.contains_minute(candidate.start)) {
            return Err(EngineError::SlotTooShort {
                required: candidate.duration(),
                available: open.end - candidate.start,
            });
        }
        return Err(EngineError::unavailable(
            UnavailableReason::OutsideHours,
            candidate,
        ));
    }

    if let Some(existing) = bookings
        .iter()
        .find(|b| b.is_active() && b.span.overlaps(&candidate))
    {
        return Err(EngineError::SlotUnavailable {
            reason: UnavailableReason::BookingConflict,
            span: candidate,
            conflicting: Some(existing.id),
        });
    }
    Ok(())
}
