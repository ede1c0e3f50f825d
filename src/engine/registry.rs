use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now;
use super::{Engine, EngineError};

fn check_bus_fields(name: &str, plate_no: &str, capacity: u32) -> Result<(), EngineError> {
    if name.len() > MAX_BUS_NAME_LEN {
        return Err(EngineError::LimitExceeded("bus name too long"));
    }
    if plate_no.len() > MAX_PLATE_LEN {
        return Err(EngineError::LimitExceeded("plate number too long"));
    }
    if capacity == 0 {
        return Err(EngineError::Validation(vec![
            "bus capacity must be at least 1".into(),
        ]));
    }
    Ok(())
}

impl Engine {
    /// Register a new bus. Buses start active and enabled.
    pub async fn register_bus(
        &self,
        id: Ulid,
        name: String,
        plate_no: String,
        capacity: u32,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_BUSES_PER_FLEET {
            return Err(EngineError::LimitExceeded("too many buses"));
        }
        check_bus_fields(&name, &plate_no, capacity)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::BusRegistered {
            id,
            name: name.clone(),
            plate_no: plate_no.clone(),
            capacity,
        };
        self.wal_append(&event).await?;
        let rs = BusState::new(id, name, plate_no, capacity);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Edit name, plate and seat count. Does not touch lifecycle, status
    /// or reservations.
    pub async fn update_bus(
        &self,
        id: Ulid,
        name: String,
        plate_no: String,
        capacity: u32,
    ) -> Result<(), EngineError> {
        check_bus_fields(&name, &plate_no, capacity)?;
        let rs = self.get_bus(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::BusUpdated { id, name, plate_no, capacity };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Administrative enable/disable toggle. Independent of lifecycle and
    /// without effect on reservations already granted — it only gates
    /// future admissions and advisory queries.
    pub async fn set_bus_status(&self, id: Ulid, enabled: bool) -> Result<(), EngineError> {
        let rs = self.get_bus(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::BusStatusSet { id, enabled };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Soft-retire a bus. Refused while any reservation still occupies it;
    /// the error carries exactly the blocking reservation ids.
    pub async fn retire_bus(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_bus(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let blocking: Vec<Ulid> = guard.occupying().map(|r| r.id).collect();
        if !blocking.is_empty() {
            return Err(EngineError::RetireBlocked { id, blocking });
        }

        let event = Event::BusRetired { id, at: now() };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Return a retired bus to service. No guard — a bus can always come
    /// back. Restoring a bus that was never retired is a no-op write.
    pub async fn restore_bus(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_bus(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::BusRestored { id };
        self.persist_and_apply(id, &mut guard, &event).await
    }
}
