use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{AvailabilityReport, DateSpan};

use super::{conflict, Engine, EngineError};

impl Engine {
    /// Advisory availability probe, issued while a requester composes a
    /// form. Carries no authority: admission re-derives the same answer
    /// under the bus write lock, so a stale "available" here can never
    /// double-book.
    ///
    /// A missing `return_date`, or one equal to `date`, probes the single
    /// day; anything else probes the inclusive round-trip window.
    pub async fn check_availability(
        &self,
        bus_id: Ulid,
        date: NaiveDate,
        return_date: Option<NaiveDate>,
    ) -> Result<AvailabilityReport, EngineError> {
        let window = match return_date {
            Some(ret) if ret != date => {
                if ret < date {
                    return Err(EngineError::Validation(vec![
                        "return date is before departure date".into(),
                    ]));
                }
                DateSpan::new(date, ret)
            }
            _ => DateSpan::single(date),
        };
        conflict::validate_window(&window)?;

        let rs = self.get_bus(&bus_id).ok_or(EngineError::NotFound(bus_id))?;
        let guard = rs.read().await;

        if guard.is_retired() {
            return Err(EngineError::Lifecycle { id: bus_id, state: "retired" });
        }
        if !guard.enabled {
            // Distinct from interval occupancy: the administrator pulled
            // the bus, whatever its calendar looks like.
            return Ok(AvailabilityReport {
                bus_id,
                window,
                available: false,
                conflicts: Vec::new(),
                message: "bus is administratively disabled".to_string(),
            });
        }

        let conflicts = conflict::scan(&guard, &window);
        let available = conflicts.is_empty();
        let message = if available {
            conflict::describe_free(&window)
        } else {
            conflict::describe(&conflicts)
        };

        Ok(AvailabilityReport {
            bus_id,
            window,
            available,
            conflicts,
            message,
        })
    }
}
