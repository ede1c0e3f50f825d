use ulid::Ulid;

use crate::limits::MAX_TEXT_LEN;
use crate::model::*;

use super::conflict::now;
use super::{Engine, EngineError};

/// An administrator's verdict on a pending reservation.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Approve, optionally binding a driver and rebinding the vehicle.
    Approve {
        driver: Option<Ulid>,
        bus: Option<Ulid>,
    },
    /// Reject with mandatory reason text.
    Reject { notes: String },
}

impl Engine {
    /// Apply an administrator decision. Only `pending` reservations accept
    /// one; anything else fails and the reservation keeps its status.
    pub async fn decide_reservation(
        &self,
        id: Ulid,
        decision: Decision,
    ) -> Result<Reservation, EngineError> {
        match decision {
            Decision::Approve { driver, bus } => self.approve(id, driver, bus).await,
            Decision::Reject { notes } => self.reject(id, notes).await,
        }
    }

    async fn approve(
        &self,
        id: Ulid,
        driver: Option<Ulid>,
        new_bus: Option<Ulid>,
    ) -> Result<Reservation, EngineError> {
        let current_bus = self
            .bus_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let target_bus = new_bus.unwrap_or(current_bus);

        if target_bus == current_bus {
            let (bus_id, mut guard) = self.resolve_reservation_write(&id).await?;
            let status = guard
                .reservation(id)
                .ok_or(EngineError::NotFound(id))?
                .status;
            if status != ReservationStatus::Pending {
                return Err(EngineError::StateTransition { id, status, action: "approve" });
            }

            let event = Event::ReservationApproved {
                id,
                from_bus_id: bus_id,
                bus_id,
                driver,
                decided_at: now(),
            };
            self.persist_and_apply(bus_id, &mut guard, &event).await?;
            return Ok(guard.reservation(id).cloned().expect("just approved"));
        }

        // Vehicle rebind: lock both buses in sorted id order, then move.
        // The rebind is an administrative act the engine records as given —
        // the admission-time conflict rules do not re-run here.
        let source_arc = self
            .get_bus(&current_bus)
            .ok_or(EngineError::NotFound(current_bus))?;
        let target_arc = self
            .get_bus(&target_bus)
            .ok_or(EngineError::NotFound(target_bus))?;

        let (mut first, mut second) = if current_bus < target_bus {
            let a = source_arc.write_owned().await;
            let b = target_arc.write_owned().await;
            (a, b)
        } else {
            let b = target_arc.write_owned().await;
            let a = source_arc.write_owned().await;
            (a, b)
        };
        let (source, target): (&mut BusState, &mut BusState) = if current_bus < target_bus {
            (&mut first, &mut second)
        } else {
            (&mut second, &mut first)
        };

        let status = source
            .reservation(id)
            .ok_or(EngineError::NotFound(id))?
            .status;
        if status != ReservationStatus::Pending {
            return Err(EngineError::StateTransition { id, status, action: "approve" });
        }
        if target.is_retired() {
            return Err(EngineError::Lifecycle { id: target_bus, state: "retired" });
        }

        let decided_at = now();
        let event = Event::ReservationApproved {
            id,
            from_bus_id: current_bus,
            bus_id: target_bus,
            driver,
            decided_at,
        };
        self.wal_append(&event).await?;
        self.apply_approval_move(source, target, id, driver, decided_at);
        self.notify.send(current_bus, &event);
        self.notify.send(target_bus, &event);

        Ok(target.reservation(id).cloned().expect("just moved"))
    }

    async fn reject(&self, id: Ulid, notes: String) -> Result<Reservation, EngineError> {
        if notes.trim().is_empty() {
            return Err(EngineError::Validation(vec![
                "a rejection reason is required".into(),
            ]));
        }
        if notes.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("rejection notes too long"));
        }

        let (bus_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let status = guard
            .reservation(id)
            .ok_or(EngineError::NotFound(id))?
            .status;
        if status != ReservationStatus::Pending {
            return Err(EngineError::StateTransition { id, status, action: "reject" });
        }

        let event = Event::ReservationRejected {
            id,
            bus_id,
            notes,
            decided_at: now(),
        };
        self.persist_and_apply(bus_id, &mut guard, &event).await?;
        Ok(guard.reservation(id).cloned().expect("just rejected"))
    }

    /// Requester-initiated cancellation: allowed only while the reservation
    /// is still pending and the departure instant has not passed.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (bus_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let reservation = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        let status = reservation.status;
        let departure = reservation.departure_instant();

        let at = now();
        if status != ReservationStatus::Pending || departure <= at {
            return Err(EngineError::StateTransition { id, status, action: "cancel" });
        }

        let event = Event::ReservationCancelled { id, bus_id, at };
        self.persist_and_apply(bus_id, &mut guard, &event).await?;
        Ok(guard.reservation(id).cloned().expect("just cancelled"))
    }
}
