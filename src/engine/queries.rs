use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedBusState};

impl Engine {
    /// Snapshot the per-bus arcs so no map shard lock is held across an
    /// await point.
    fn bus_arcs(&self) -> Vec<SharedBusState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    /// Buses currently in service, sorted by name for display.
    pub async fn list_active_buses(&self) -> Vec<BusInfo> {
        let mut buses = Vec::new();
        for rs in self.bus_arcs() {
            let guard = rs.read().await;
            if !guard.is_retired() {
                buses.push(BusInfo::from_state(&guard));
            }
        }
        buses.sort_by(|a, b| a.name.cmp(&b.name));
        buses
    }

    /// Retired buses, newest retirement first — the restore view.
    pub async fn list_retired_buses(&self) -> Vec<BusInfo> {
        let mut buses = Vec::new();
        for rs in self.bus_arcs() {
            let guard = rs.read().await;
            if guard.is_retired() {
                buses.push(BusInfo::from_state(&guard));
            }
        }
        buses.sort_by(|a, b| b.retired_at.cmp(&a.retired_at));
        buses
    }

    pub async fn get_bus_info(&self, id: Ulid) -> Result<BusInfo, EngineError> {
        let rs = self.get_bus(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(BusInfo::from_state(&guard))
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let bus_id = self
            .bus_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self.get_bus(&bus_id).ok_or(EngineError::NotFound(bus_id))?;
        let guard = rs.read().await;
        guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// All reservations on one bus, in creation order. The full history —
    /// terminal reservations included.
    pub async fn list_reservations(&self, bus_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let rs = self.get_bus(&bus_id).ok_or(EngineError::NotFound(bus_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    /// Every reservation in the fleet, for reporting reads.
    pub async fn list_all_reservations(&self) -> Vec<Reservation> {
        let mut all = Vec::new();
        for rs in self.bus_arcs() {
            let guard = rs.read().await;
            all.extend(guard.reservations.iter().cloned());
        }
        all.sort_by_key(|r| r.created_at);
        all
    }
}
