use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-bus event notification. Every committed event is
/// published here; external dispatch (mail, web sockets, …) subscribes and
/// does its own delivery — the engine never blocks on it.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a bus. Creates the channel if needed.
    pub fn subscribe(&self, bus_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(bus_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, bus_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&bus_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a bus is retired for good).
    #[allow(dead_code)]
    pub fn remove(&self, bus_id: &Ulid) {
        self.channels.remove(bus_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let bus_id = Ulid::new();
        let mut rx = hub.subscribe(bus_id);

        let event = Event::BusRegistered {
            id: bus_id,
            name: "Bus 1".into(),
            plate_no: "ABC-123".into(),
            capacity: 30,
        };
        hub.send(bus_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let bus_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(bus_id, &Event::BusRestored { id: bus_id });
    }
}
