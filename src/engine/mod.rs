mod admission;
mod availability;
mod conflict;
mod error;
mod queries;
mod registry;
mod transitions;

pub use admission::{
    draft_reasons, ReservationDraft, BLACKOUT_WEEKDAY, LEAD_TIME_HOURS, MAX_PASSENGERS,
};
pub use conflict::{describe, describe_free, scan};
pub use error::EngineError;
pub use transitions::Decision;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedBusState = Arc<RwLock<BusState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One fleet's reservation engine: per-bus state behind per-bus locks,
/// a durable event log, and a notification hub.
pub struct Engine {
    pub state: DashMap<Ulid, SharedBusState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → bus id currently holding it.
    pub(super) reservation_to_bus: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a BusState (no locking — caller holds the
/// lock). Bus registration and approval-with-rebind are handled at the
/// engine level, not here.
fn apply_to_bus(rs: &mut BusState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BusUpdated { name, plate_no, capacity, .. } => {
            rs.name = name.clone();
            rs.plate_no = plate_no.clone();
            rs.capacity = *capacity;
        }
        Event::BusStatusSet { enabled, .. } => {
            rs.enabled = *enabled;
        }
        Event::BusRetired { at, .. } => {
            rs.retired_at = Some(*at);
        }
        Event::BusRestored { .. } => {
            rs.retired_at = None;
        }
        Event::ReservationCreated {
            id,
            bus_id,
            requester,
            purpose,
            destination,
            departure_date,
            departure_time,
            return_date,
            return_time,
            passengers,
            created_at,
        } => {
            rs.reservations.push(Reservation {
                id: *id,
                requester: *requester,
                driver: None,
                purpose: purpose.clone(),
                destination: destination.clone(),
                departure_date: *departure_date,
                departure_time: *departure_time,
                return_date: *return_date,
                return_time: *return_time,
                passengers: *passengers,
                status: ReservationStatus::Pending,
                created_at: *created_at,
                decided_at: None,
                notes: None,
            });
            index.insert(*id, *bus_id);
        }
        Event::ReservationApproved { id, driver, decided_at, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = ReservationStatus::Approved;
                r.driver = *driver;
                r.decided_at = Some(*decided_at);
            }
        }
        Event::ReservationRejected { id, notes, decided_at, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = ReservationStatus::Rejected;
                r.notes = Some(notes.clone());
                r.decided_at = Some(*decided_at);
            }
        }
        Event::ReservationCancelled { id, at, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = ReservationStatus::Cancelled;
                r.decided_at = Some(*at);
            }
        }
        // Registration is handled at the DashMap level, not here
        Event::BusRegistered { .. } => {}
    }
}

/// Move a reservation between two bus states during replay or an approval
/// that rebinds the vehicle. Both guards must be held by the caller.
fn apply_move(
    source: &mut BusState,
    target: &mut BusState,
    id: Ulid,
    driver: Option<Ulid>,
    decided_at: chrono::NaiveDateTime,
    index: &DashMap<Ulid, Ulid>,
) {
    if let Some(pos) = source.reservations.iter().position(|r| r.id == id) {
        let mut moved = source.reservations.remove(pos);
        moved.status = ReservationStatus::Approved;
        moved.driver = driver;
        moved.decided_at = Some(decided_at);
        target.reservations.push(moved);
        index.insert(id, target.id);
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            reservation_to_bus: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use
        // blocking_write here because this may run inside an async context
        // (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::BusRegistered { id, name, plate_no, capacity } => {
                    let rs = BusState::new(*id, name.clone(), plate_no.clone(), *capacity);
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ReservationApproved { id, from_bus_id, bus_id, driver, decided_at }
                    if from_bus_id != bus_id =>
                {
                    let (Some(src), Some(dst)) =
                        (engine.state.get(from_bus_id), engine.state.get(bus_id))
                    else {
                        continue;
                    };
                    let src_arc = src.value().clone();
                    let dst_arc = dst.value().clone();
                    drop(src);
                    drop(dst);
                    let mut src_guard = src_arc.try_write().expect("replay: uncontended write");
                    let mut dst_guard = dst_arc.try_write().expect("replay: uncontended write");
                    apply_move(
                        &mut src_guard,
                        &mut dst_guard,
                        *id,
                        *driver,
                        *decided_at,
                        &engine.reservation_to_bus,
                    );
                }
                other => {
                    if let Some(bus_id) = event_bus_id(other)
                        && let Some(entry) = engine.state.get(&bus_id)
                    {
                        let rs_arc = entry.value().clone();
                        drop(entry);
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_bus(&mut guard, other, &engine.reservation_to_bus);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_bus(&self, id: &Ulid) -> Option<SharedBusState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn bus_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_bus.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call, under the caller's lock.
    pub(super) async fn persist_and_apply(
        &self,
        bus_id: Ulid,
        rs: &mut BusState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_bus(rs, event, &self.reservation_to_bus);
        self.notify.send(bus_id, event);
        Ok(())
    }

    /// Lookup reservation → bus, get the bus, acquire its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<BusState>), EngineError> {
        let bus_id = self
            .bus_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let rs = self
            .get_bus(&bus_id)
            .ok_or(EngineError::NotFound(bus_id))?;
        let guard = rs.write_owned().await;
        Ok((bus_id, guard))
    }

    /// Move a reservation onto another bus as part of an approval, both
    /// guards held. Exposed to the transitions module.
    pub(super) fn apply_approval_move(
        &self,
        source: &mut BusState,
        target: &mut BusState,
        id: Ulid,
        driver: Option<Ulid>,
        decided_at: chrono::NaiveDateTime,
    ) {
        apply_move(source, target, id, driver, decided_at, &self.reservation_to_bus);
    }

    /// Compact the WAL down to the events needed to recreate the current
    /// state. Terminal reservations are preserved — the audit trail never
    /// shrinks, only bus churn (status flips, restores) collapses.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.state.iter() {
            let rs_arc = entry.value().clone();
            let guard = rs_arc.try_read().expect("compact: uncontended read");

            events.push(Event::BusRegistered {
                id: guard.id,
                name: guard.name.clone(),
                plate_no: guard.plate_no.clone(),
                capacity: guard.capacity,
            });
            if !guard.enabled {
                events.push(Event::BusStatusSet { id: guard.id, enabled: false });
            }
            if let Some(at) = guard.retired_at {
                events.push(Event::BusRetired { id: guard.id, at });
            }

            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    bus_id: guard.id,
                    requester: r.requester,
                    purpose: r.purpose.clone(),
                    destination: r.destination.clone(),
                    departure_date: r.departure_date,
                    departure_time: r.departure_time,
                    return_date: r.return_date,
                    return_time: r.return_time,
                    passengers: r.passengers,
                    created_at: r.created_at,
                });
                match r.status {
                    ReservationStatus::Pending => {}
                    ReservationStatus::Approved => events.push(Event::ReservationApproved {
                        id: r.id,
                        from_bus_id: guard.id,
                        bus_id: guard.id,
                        driver: r.driver,
                        decided_at: r.decided_at.unwrap_or(r.created_at),
                    }),
                    ReservationStatus::Rejected => events.push(Event::ReservationRejected {
                        id: r.id,
                        bus_id: guard.id,
                        notes: r.notes.clone().unwrap_or_default(),
                        decided_at: r.decided_at.unwrap_or(r.created_at),
                    }),
                    ReservationStatus::Cancelled => events.push(Event::ReservationCancelled {
                        id: r.id,
                        bus_id: guard.id,
                        at: r.decided_at.unwrap_or(r.created_at),
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the bus id an event applies to (None for registration, which is
/// handled at the map level).
fn event_bus_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BusUpdated { id, .. }
        | Event::BusStatusSet { id, .. }
        | Event::BusRetired { id, .. }
        | Event::BusRestored { id } => Some(*id),
        Event::ReservationCreated { bus_id, .. }
        | Event::ReservationApproved { bus_id, .. }
        | Event::ReservationRejected { bus_id, .. }
        | Event::ReservationCancelled { bus_id, .. } => Some(*bus_id),
        Event::BusRegistered { .. } => None,
    }
}
