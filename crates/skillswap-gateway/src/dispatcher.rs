use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use skillswap_types::events::ChatEvent;

/// Per-room broadcast capacity. Chat rooms have two human participants;
/// a slow consumer lagging past this just re-syncs via the REST listing.
const ROOM_CAPACITY: usize = 256;

/// Publish/subscribe fan-out keyed by exchange id. Each exchange gets its
/// own broadcast channel, created lazily on first subscribe and pruned once
/// the last subscriber is gone.
#[derive(Clone)]
pub struct Dispatcher {
    rooms: Arc<RwLock<HashMap<i64, broadcast::Sender<ChatEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to one exchange's events. Authorization happens before this
    /// is called; the dispatcher only does delivery.
    pub async fn subscribe(&self, exchange_id: i64) -> broadcast::Receiver<ChatEvent> {
        let mut rooms = self.rooms.write().await;
        // Sweep rooms whose last subscriber left without another broadcast
        // ever touching them, so abandoned entries cannot accumulate.
        rooms.retain(|_, tx| tx.receiver_count() > 0);
        rooms
            .entry(exchange_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Broadcast an event to every subscriber of the exchange's room.
    /// At-most-once, best-effort: no room or no listeners means the event is
    /// simply dropped.
    pub async fn broadcast(&self, exchange_id: i64, event: ChatEvent) {
        let stale = {
            let rooms = self.rooms.read().await;
            match rooms.get(&exchange_id) {
                Some(tx) => tx.send(event).is_err(),
                None => return,
            }
        };

        // Last subscriber left: drop the empty room.
        if stale {
            let mut rooms = self.rooms.write().await;
            if let Some(tx) = rooms.get(&exchange_id) {
                if tx.receiver_count() == 0 {
                    rooms.remove(&exchange_id);
                }
            }
        }
    }

    /// Number of live rooms. Diagnostic only.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_event(exchange_id: i64, user_id: i64) -> ChatEvent {
        ChatEvent::Read { exchange_id, user_id }
    }

    #[tokio::test]
    async fn events_are_scoped_to_their_room() {
        let dispatcher = Dispatcher::new();
        let mut rx_a = dispatcher.subscribe(1).await;
        let mut rx_b = dispatcher.subscribe(2).await;

        dispatcher.broadcast(1, read_event(1, 10)).await;

        match rx_a.recv().await.unwrap() {
            ChatEvent::Read { exchange_id, user_id } => {
                assert_eq!((exchange_id, user_id), (1, 10));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_rooms_are_pruned() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher.subscribe(7).await;
        assert_eq!(dispatcher.room_count().await, 1);

        drop(rx);
        dispatcher.broadcast(7, read_event(7, 1)).await;
        assert_eq!(dispatcher.room_count().await, 0);

        // Broadcasting into a nonexistent room is a no-op.
        dispatcher.broadcast(99, read_event(99, 1)).await;
    }

    #[tokio::test]
    async fn subscribe_sweeps_abandoned_rooms() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher.subscribe(1).await;
        drop(rx);

        // No broadcast ever hits room 1; a later subscribe still clears it.
        let _rx2 = dispatcher.subscribe(2).await;
        assert_eq!(dispatcher.room_count().await, 1);
    }
}
