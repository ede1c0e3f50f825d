use ulid::Ulid;

use crate::model::{DateSpan, ReservationStatus};

/// Every failure the engine can hand back. Errors are data — callers
/// inspect them, the wire layer maps them to SQLSTATEs, and nothing is
/// ever swallowed or used as internal control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Admission failed with the full ordered reason list. Recoverable by
    /// correcting the request; nothing was written.
    Validation(Vec<String>),
    /// The requested window overlaps these committed windows on the bus.
    Conflict(Vec<DateSpan>),
    /// The bus exists but is not bookable: `state` is "retired" or "disabled".
    Lifecycle { id: Ulid, state: &'static str },
    /// An illegal status transition was attempted. The reservation keeps
    /// its prior status.
    StateTransition {
        id: Ulid,
        status: ReservationStatus,
        action: &'static str,
    },
    /// Retirement blocked by reservations still occupying the bus.
    RetireBlocked { id: Ulid, blocking: Vec<Ulid> },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(reasons) => {
                write!(f, "validation failed: {}", reasons.join("; "))
            }
            EngineError::Conflict(windows) => {
                let rendered: Vec<String> = windows.iter().map(|w| w.to_string()).collect();
                write!(f, "already booked on: {}", rendered.join(", "))
            }
            EngineError::Lifecycle { id, state } => write!(f, "bus {id} is {state}"),
            EngineError::StateTransition { id, status, action } => {
                write!(f, "cannot {action} reservation {id} in status {status}")
            }
            EngineError::RetireBlocked { id, blocking } => {
                let ids: Vec<String> = blocking.iter().map(|b| b.to_string()).collect();
                write!(
                    f,
                    "cannot retire bus {id}: blocked by reservations {}",
                    ids.join(", ")
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
