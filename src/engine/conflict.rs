use chrono::{NaiveDateTime, Utc};

use crate::limits::{MAX_TRIP_DAYS, MAX_VALID_YEAR, MIN_VALID_YEAR};
use crate::model::{BusState, DateSpan};

use super::EngineError;

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub(crate) fn validate_window(window: &DateSpan) -> Result<(), EngineError> {
    use chrono::Datelike;
    if window.start.year() < MIN_VALID_YEAR || window.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if window.days() > MAX_TRIP_DAYS {
        return Err(EngineError::LimitExceeded("trip window too wide"));
    }
    Ok(())
}

/// Scan a bus's committed (pending/approved) reservations for collisions
/// with a candidate window. Deterministic and side-effect free; the caller
/// decides whether the answer is advisory or authoritative by choosing
/// what lock it holds.
///
/// Two deliberately separate tests:
///
/// - A genuine window (`end != start`) collides with an existing window
///   `[e_start, e_end]` when the existing departure falls inside the
///   candidate, the existing return falls inside the candidate, or the
///   existing window fully contains the candidate.
/// - A single-day probe (`end == start`) collides when the probed date
///   falls anywhere inside an existing window.
///
/// The two paths are kept apart on purpose; boundary-equal dates are
/// pinned by tests rather than merged into one formula.
pub fn scan(bus: &BusState, window: &DateSpan) -> Vec<DateSpan> {
    let mut hits = Vec::new();
    for existing in bus.occupying().map(|r| r.window()) {
        let collides = if window.is_single_day() {
            existing.contains(window.start)
        } else {
            window.contains(existing.start)
                || window.contains(existing.end)
                || (existing.start <= window.start && existing.end >= window.end)
        };
        if collides {
            hits.push(existing);
        }
    }
    hits
}

/// Human-readable summary of a set of colliding windows.
pub fn describe(windows: &[DateSpan]) -> String {
    let rendered: Vec<String> = windows.iter().map(|w| w.to_string()).collect();
    format!("already booked on: {}", rendered.join(", "))
}

/// Summary for an open window.
pub fn describe_free(window: &DateSpan) -> String {
    if window.is_single_day() {
        format!("available on {}", window.start)
    } else {
        format!("available from {} to {}", window.start, window.end)
    }
}
