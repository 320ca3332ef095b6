use chrono::NaiveDate;

use crate::model::*;
use crate::timegrid::weekday_index;

// ── Interval arithmetic ───────────────────────────────────────────

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

/// Sort then merge.
pub fn normalize(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// `base - to_remove`. Both inputs must be sorted by start.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        for r in to_remove[ri..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            if cursor >= b.end {
                break;
            }
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

pub fn union_intervals(a: &[Span], b: &[Span]) -> Vec<Span> {
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    normalize(all)
}

// ── Recurring resolution ──────────────────────────────────────────

/// Weekly windows minus weekly breaks for one weekday.
///
/// Each window is cut independently (a break may split it in two, or remove
/// it entirely); the survivors are then sorted and merged.
pub fn resolve_recurring(windows: &[Span], breaks: &[Span]) -> Vec<Span> {
    let breaks = normalize(breaks.to_vec());
    let mut open = Vec::with_capacity(windows.len() + breaks.len());
    for window in windows {
        open.extend(subtract_intervals(std::slice::from_ref(window), &breaks));
    }
    normalize(open)
}

// ── Exception overlay ─────────────────────────────────────────────

/// Open time for one date after exceptions, before bookings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DayOverlay {
    /// Sorted, disjoint.
    pub open: Vec<Span>,
    /// Exception blocks still in force after additions.
    pub blocked: Vec<Span>,
    pub closed_all_day: bool,
}

/// Apply date exceptions on top of the recurring schedule.
///
/// Precedence: a full-day block empties the day outright. Otherwise a
/// full-day opening replaces the recurring schedule with the whole day,
/// partial blocks are subtracted, then partial openings are added back.
pub fn apply_exceptions(recurring: &[Span], exceptions: &[AvailabilityException]) -> DayOverlay {
    if exceptions.iter().any(|e| !e.is_available && e.span.is_none()) {
        return DayOverlay {
            open: Vec::new(),
            blocked: vec![Span::full_day()],
            closed_all_day: true,
        };
    }

    let open_all_day = exceptions.iter().any(|e| e.is_available && e.span.is_none());
    let base = if open_all_day {
        vec![Span::full_day()]
    } else {
        recurring.to_vec()
    };

    let blocks = normalize(
        exceptions
            .iter()
            .filter(|e| !e.is_available)
            .filter_map(|e| e.span)
            .collect(),
    );
    let additions = normalize(
        exceptions
            .iter()
            .filter(|e| e.is_available)
            .filter_map(|e| e.span)
            .collect(),
    );

    let open = union_intervals(&subtract_intervals(&base, &blocks), &additions);
    let blocked = subtract_intervals(&blocks, &additions);

    DayOverlay {
        open,
        blocked,
        closed_all_day: false,
    }
}

/// Resolve a provider's open intervals for `date` (recurring rows, then exceptions).
pub fn day_overlay(state: &ProviderState, date: NaiveDate) -> DayOverlay {
    let weekday = weekday_index(date);
    let windows: Vec<Span> = state
        .availabilities
        .iter()
        .filter(|a| a.weekday == weekday)
        .map(|a| a.span)
        .collect();
    let breaks: Vec<Span> = state
        .breaks
        .iter()
        .filter(|b| b.weekday == weekday)
        .map(|b| b.span)
        .collect();
    let recurring = resolve_recurring(&windows, &breaks);
    apply_exceptions(&recurring, state.exceptions_on(date))
}
