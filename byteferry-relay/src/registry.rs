use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use byteferry_core::generate_room_id;
use parking_lot::Mutex;

use crate::conn::Connection;
use crate::room::{ReceiverQueue, Room};

const ROOM_ID_ATTEMPTS: usize = 100;

// Process-wide room-id -> room map. The lock covers map operations only;
// per-room state has its own discipline.
pub struct RoomRegistry {
    max_rooms: usize,
    room_ttl: Duration,
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new(max_rooms: usize, room_ttl: Duration) -> Self {
        Self {
            max_rooms,
            room_ttl,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// None when the registry is full or id generation ran out of attempts.
    pub fn create(&self, sender: Arc<Connection>) -> Option<(Arc<Room>, ReceiverQueue)> {
        let mut rooms = self.rooms.lock();
        if rooms.len() >= self.max_rooms {
            return None;
        }
        let mut room_id = None;
        for _ in 0..ROOM_ID_ATTEMPTS {
            let candidate = generate_room_id();
            if !rooms.contains_key(&candidate) {
                room_id = Some(candidate);
                break;
            }
        }
        let room_id = room_id?;
        let (room, queue) = Room::new(room_id.clone(), sender);
        let room = Arc::new(room);
        rooms.insert(room_id, Arc::clone(&room));
        Some((room, queue))
    }

    /// Closed or TTL-expired rooms are reported as absent even before the
    /// sweeper gets to them.
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        let rooms = self.rooms.lock();
        let room = rooms.get(room_id)?;
        if room.is_closed() || room.age() > self.room_ttl {
            return None;
        }
        Some(Arc::clone(room))
    }

    pub fn remove(&self, room_id: &str) {
        self.rooms.lock().remove(room_id);
    }

    pub fn expired(&self) -> Vec<Arc<Room>> {
        self.rooms
            .lock()
            .values()
            .filter(|room| room.age() > self.room_ttl)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::testutil::connection_pair;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn create_then_get() {
        let registry = RoomRegistry::new(10, TTL);
        let (sender, _client) = connection_pair(1024).await;
        let (room, _queue) = registry.create(sender).unwrap();

        assert_eq!(registry.len(), 1);
        let found = registry.get(room.id()).unwrap();
        assert_eq!(found.id(), room.id());
    }

    #[tokio::test]
    async fn get_unknown_room_is_none() {
        let registry = RoomRegistry::new(10, TTL);
        assert!(registry.get("abc123").is_none());
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let registry = RoomRegistry::new(2, TTL);
        let (a, _ca) = connection_pair(1024).await;
        let (b, _cb) = connection_pair(1024).await;
        let (c, _cc) = connection_pair(1024).await;

        assert!(registry.create(a).is_some());
        assert!(registry.create(b).is_some());
        assert!(registry.create(c).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn closed_rooms_are_not_found() {
        let registry = RoomRegistry::new(10, TTL);
        let (sender, _client) = connection_pair(1024).await;
        let (room, _queue) = registry.create(sender).unwrap();

        assert!(room.begin_close());
        assert!(registry.get(room.id()).is_none());
    }

    #[tokio::test]
    async fn expired_rooms_are_not_found_and_are_listed_for_sweeping() {
        let registry = RoomRegistry::new(10, Duration::ZERO);
        let (sender, _client) = connection_pair(1024).await;
        let (room, _queue) = registry.create(sender).unwrap();

        // Zero TTL: any age is past the deadline.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(registry.get(room.id()).is_none());

        let expired = registry.expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id(), room.id());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = RoomRegistry::new(10, TTL);
        let (sender, _client) = connection_pair(1024).await;
        let (room, _queue) = registry.create(sender).unwrap();

        registry.remove(room.id());
        registry.remove(room.id());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn room_ids_are_distinct() {
        let registry = RoomRegistry::new(10, TTL);
        let (a, _ca) = connection_pair(1024).await;
        let (b, _cb) = connection_pair(1024).await;
        let (room_a, _qa) = registry.create(a).unwrap();
        let (room_b, _qb) = registry.create(b).unwrap();
        assert_ne!(room_a.id(), room_b.id());
    }
}
