use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use ulid::Ulid;

use crate::limits::{MAX_RESERVATIONS_PER_BUS, MAX_TEXT_LEN, MAX_TRIP_DAYS};
use crate::model::*;

use super::conflict::{self, now};
use super::{Engine, EngineError};

/// Minimum gap between submission and departure.
pub const LEAD_TIME_HOURS: i64 = 72;

/// Fleet-wide passenger ceiling per reservation.
pub const MAX_PASSENGERS: u32 = 30;

/// No departure or return may fall on this weekday.
pub const BLACKOUT_WEEKDAY: Weekday = Weekday::Sun;

/// An unvalidated reservation request, exactly as it arrived. `None` marks
/// an absent field; admission reports every missing or invalid field in
/// one pass rather than stopping at the first.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationDraft {
    pub id: Ulid,
    pub requester: Ulid,
    pub bus_id: Option<Ulid>,
    pub purpose: Option<String>,
    pub destination: Option<String>,
    pub departure_date: Option<NaiveDate>,
    pub departure_time: Option<NaiveTime>,
    pub return_date: Option<NaiveDate>,
    pub return_time: Option<NaiveTime>,
    pub passengers: Option<u32>,
}

impl Default for ReservationDraft {
    /// A fully blank draft: nil identifiers, every field absent.
    fn default() -> Self {
        Self {
            id: Ulid::nil(),
            requester: Ulid::nil(),
            bus_id: None,
            purpose: None,
            destination: None,
            departure_date: None,
            departure_time: None,
            return_date: None,
            return_time: None,
            passengers: None,
        }
    }
}

impl ReservationDraft {
    /// The window this draft asks for, when both dates are present and
    /// ordered. Conflict checking is inapplicable otherwise.
    pub fn window(&self) -> Option<DateSpan> {
        match (self.departure_date, self.return_date) {
            (Some(dep), Some(ret)) if dep <= ret => Some(DateSpan::new(dep, ret)),
            _ => None,
        }
    }

    /// Departure instant for the lead-time rules. A missing time counts as
    /// midnight, so a date-only draft is still checked.
    fn departure_instant(&self) -> Option<NaiveDateTime> {
        self.departure_date
            .map(|d| d.and_time(self.departure_time.unwrap_or(NaiveTime::MIN)))
    }
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Draft-local admission rules (everything that needs no bus state), with
/// reasons in presentation order. Pure so the clock can be pinned in tests.
pub fn draft_reasons(draft: &ReservationDraft, now: NaiveDateTime) -> Vec<String> {
    let mut reasons = Vec::new();

    // Required fields
    if !present(&draft.purpose) {
        reasons.push("purpose is required".to_string());
    }
    if !present(&draft.destination) {
        reasons.push("destination is required".to_string());
    }
    if draft.departure_date.is_none() {
        reasons.push("departure date is required".to_string());
    }
    if draft.departure_time.is_none() {
        reasons.push("departure time is required".to_string());
    }
    if draft.return_date.is_none() {
        reasons.push("return date is required".to_string());
    }
    if draft.return_time.is_none() {
        reasons.push("return time is required".to_string());
    }
    if draft.passengers.is_none() {
        reasons.push("passenger count is required".to_string());
    }
    if draft.bus_id.is_none() {
        reasons.push("bus selection is required".to_string());
    }

    // Lead time, then the past-date guard. Both fire for a past departure.
    if let Some(departure) = draft.departure_instant() {
        let earliest = now + Duration::hours(LEAD_TIME_HOURS);
        if departure < earliest {
            reasons.push(format!(
                "departure must be at least {LEAD_TIME_HOURS} hours from now; earliest eligible departure is {}",
                earliest.format("%Y-%m-%d %H:%M")
            ));
        }
        if departure <= now {
            reasons.push("departure is in the past".to_string());
        }
    }

    // Blackout weekday, departure and return checked independently
    if let Some(dep) = draft.departure_date
        && dep.weekday() == BLACKOUT_WEEKDAY
    {
        reasons.push("departure date falls on Sunday; Sunday trips are not allowed".to_string());
    }
    if let Some(ret) = draft.return_date
        && ret.weekday() == BLACKOUT_WEEKDAY
    {
        reasons.push("return date falls on Sunday; Sunday trips are not allowed".to_string());
    }

    // Round-trip consistency
    if let (Some(dep), Some(ret)) = (draft.departure_date, draft.return_date) {
        if ret < dep {
            reasons.push("return date is before departure date".to_string());
        } else if dep == ret
            && let (Some(dep_t), Some(ret_t)) = (draft.departure_time, draft.return_time)
            && ret_t <= dep_t
        {
            reasons.push(
                "return time must be after departure time on a same-day trip".to_string(),
            );
        }
    }

    if let Some(window) = draft.window()
        && window.days() > MAX_TRIP_DAYS
    {
        reasons.push(format!("trip is longer than {MAX_TRIP_DAYS} days"));
    }

    // Passenger bound
    if let Some(n) = draft.passengers {
        if n < 1 {
            reasons.push("passenger count must be at least 1".to_string());
        } else if n > MAX_PASSENGERS {
            reasons.push(format!("passenger count exceeds the {MAX_PASSENGERS}-passenger ceiling"));
        }
    }

    if let Some(p) = draft.purpose.as_deref()
        && p.len() > MAX_TEXT_LEN
    {
        reasons.push("purpose text too long".to_string());
    }
    if let Some(d) = draft.destination.as_deref()
        && d.len() > MAX_TEXT_LEN
    {
        reasons.push("destination text too long".to_string());
    }

    reasons
}

/// Eligibility of the selected bus: it must exist, be in service and be
/// enabled. `None` means the id resolved to nothing.
fn eligibility_reasons(bus: Option<&BusState>) -> Vec<String> {
    match bus {
        None => vec!["selected bus does not exist".to_string()],
        Some(rs) => {
            let mut reasons = Vec::new();
            if rs.is_retired() {
                reasons.push("selected bus has been retired from service".to_string());
            }
            if !rs.enabled {
                reasons.push("selected bus is disabled by the administrator".to_string());
            }
            reasons
        }
    }
}

impl Engine {
    /// Authoritative admission: validate everything, re-check conflicts and
    /// create the reservation as one atomic unit under the bus write lock.
    /// Any advisory answer the requester saw earlier carries no weight here.
    ///
    /// Classification: conflict as the sole failure is returned as a typed
    /// `Conflict`; any other failure set comes back as `Validation` with
    /// the full ordered reason list (conflict summary last).
    pub async fn submit_reservation(
        &self,
        draft: ReservationDraft,
    ) -> Result<Ulid, EngineError> {
        let submitted_at = now();

        // Take the bus write lock first when there is a bus to lock — the
        // conflict scan and the insert must see the same reservation set.
        let bus_arc = draft.bus_id.and_then(|bid| self.get_bus(&bid));
        let mut bus_guard = match bus_arc {
            Some(ref arc) => Some(arc.write().await),
            None => None,
        };

        let mut reasons = draft_reasons(&draft, submitted_at);
        if draft.bus_id.is_some() {
            reasons.extend(eligibility_reasons(bus_guard.as_deref()));
        }

        let conflicts = match (&bus_guard, draft.window()) {
            (Some(guard), Some(window)) if guard.enabled && !guard.is_retired() => {
                conflict::scan(guard, &window)
            }
            _ => Vec::new(),
        };

        if !reasons.is_empty() {
            if !conflicts.is_empty() {
                reasons.push(conflict::describe(&conflicts));
            }
            metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "outcome" => "rejected")
                .increment(1);
            return Err(EngineError::Validation(reasons));
        }
        if !conflicts.is_empty() {
            metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "outcome" => "conflict")
                .increment(1);
            return Err(EngineError::Conflict(conflicts));
        }

        // All rules passed — an empty reason list implies a complete draft.
        let (Some(guard), Some(dep_date), Some(dep_time), Some(ret_date), Some(ret_time), Some(passengers)) = (
            bus_guard.as_mut(),
            draft.departure_date,
            draft.departure_time,
            draft.return_date,
            draft.return_time,
            draft.passengers,
        ) else {
            unreachable!("required-field rules admit only complete drafts");
        };
        if self.reservation_to_bus.contains_key(&draft.id) {
            return Err(EngineError::AlreadyExists(draft.id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_BUS {
            return Err(EngineError::LimitExceeded("too many reservations on bus"));
        }

        let bus_id = guard.id;
        let event = Event::ReservationCreated {
            id: draft.id,
            bus_id,
            requester: draft.requester,
            purpose: draft.purpose.unwrap_or_default(),
            destination: draft.destination.unwrap_or_default(),
            departure_date: dep_date,
            departure_time: dep_time,
            return_date: ret_date,
            return_time: ret_time,
            passengers,
            created_at: submitted_at,
        };
        self.persist_and_apply(bus_id, guard, &event).await?;
        metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "outcome" => "granted")
            .increment(1);
        Ok(draft.id)
    }
}
