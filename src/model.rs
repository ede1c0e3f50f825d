use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Inclusive calendar-date span `[start, end]` — the window a bus is
/// occupied by one reservation. A same-day trip collapses to a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateSpan start must not be after end");
        Self { start, end }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    /// Number of calendar days covered, counting both endpoints.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl std::fmt::Display for DateSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single_day() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

/// Reservation lifecycle. `Pending` is the only state with outgoing
/// transitions; the other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    /// Does a reservation in this status occupy its bus for conflict and
    /// retirement purposes?
    pub fn occupies(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single booking. Never deleted — status transitions only, so the full
/// history stays addressable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub requester: Ulid,
    /// Assigned by an administrator on approval, never by the requester.
    pub driver: Option<Ulid>,
    pub purpose: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub departure_time: NaiveTime,
    pub return_date: NaiveDate,
    pub return_time: NaiveTime,
    pub passengers: u32,
    pub status: ReservationStatus,
    pub created_at: NaiveDateTime,
    pub decided_at: Option<NaiveDateTime>,
    /// Required on rejection, absent otherwise.
    pub notes: Option<String>,
}

impl Reservation {
    /// The inclusive date window this reservation occupies its bus.
    pub fn window(&self) -> DateSpan {
        DateSpan::new(self.departure_date, self.return_date)
    }

    pub fn departure_instant(&self) -> NaiveDateTime {
        self.departure_date.and_time(self.departure_time)
    }
}

/// In-memory state of one bus: identity, lifecycle, and its reservations
/// in creation order.
#[derive(Debug, Clone)]
pub struct BusState {
    pub id: Ulid,
    pub name: String,
    pub plate_no: String,
    /// Seat count, informational for the requester-facing listing.
    pub capacity: u32,
    /// Operational toggle. A disabled bus blocks new admissions only;
    /// reservations already granted against it are untouched.
    pub enabled: bool,
    /// `Some` while the bus is retired from service. Retired buses stay
    /// addressable for history but are excluded from active listings and
    /// new admissions.
    pub retired_at: Option<NaiveDateTime>,
    pub reservations: Vec<Reservation>,
}

impl BusState {
    pub fn new(id: Ulid, name: String, plate_no: String, capacity: u32) -> Self {
        Self {
            id,
            name,
            plate_no,
            capacity,
            enabled: true,
            retired_at: None,
            reservations: Vec::new(),
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// Reservations that currently occupy the bus (pending or approved),
    /// in creation order.
    pub fn occupying(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.status.occupies())
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// Events carry their timestamps so replay is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusRegistered {
        id: Ulid,
        name: String,
        plate_no: String,
        capacity: u32,
    },
    BusUpdated {
        id: Ulid,
        name: String,
        plate_no: String,
        capacity: u32,
    },
    BusStatusSet {
        id: Ulid,
        enabled: bool,
    },
    BusRetired {
        id: Ulid,
        at: NaiveDateTime,
    },
    BusRestored {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        bus_id: Ulid,
        requester: Ulid,
        purpose: String,
        destination: String,
        departure_date: NaiveDate,
        departure_time: NaiveTime,
        return_date: NaiveDate,
        return_time: NaiveTime,
        passengers: u32,
        created_at: NaiveDateTime,
    },
    /// `from_bus_id != bus_id` when the administrator rebound the vehicle
    /// as part of the approval.
    ReservationApproved {
        id: Ulid,
        from_bus_id: Ulid,
        bus_id: Ulid,
        driver: Option<Ulid>,
        decided_at: NaiveDateTime,
    },
    ReservationRejected {
        id: Ulid,
        bus_id: Ulid,
        notes: String,
        decided_at: NaiveDateTime,
    },
    ReservationCancelled {
        id: Ulid,
        bus_id: Ulid,
        at: NaiveDateTime,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusInfo {
    pub id: Ulid,
    pub name: String,
    pub plate_no: String,
    pub capacity: u32,
    pub enabled: bool,
    pub retired_at: Option<NaiveDateTime>,
}

impl BusInfo {
    pub fn from_state(rs: &BusState) -> Self {
        Self {
            id: rs.id,
            name: rs.name.clone(),
            plate_no: rs.plate_no.clone(),
            capacity: rs.capacity,
            enabled: rs.enabled,
            retired_at: rs.retired_at,
        }
    }
}

/// Advisory availability answer. Carries no authority — admission
/// re-derives the same determination against fresh state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReport {
    pub bus_id: Ulid,
    pub window: DateSpan,
    pub available: bool,
    pub conflicts: Vec<DateSpan>,
    pub message: String,
}
