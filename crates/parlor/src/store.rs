//! Versioned room storage with optimistic concurrency.
//!
//! Commits carry the version they read; a commit against a stale version
//! fails with [`StoreError::Conflict`] and the applier re-reads and
//! re-reduces. The in-memory store here is the test/reference backend —
//! a database-backed implementation satisfies the same trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use parlor_engine::Room;
use parlor_protocol::RoomId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The version the caller read is no longer current. Retryable.
    #[error("write conflict on {room}: version {expected} is stale")]
    Conflict { room: RoomId, expected: u64 },

    #[error("room {0} not found")]
    NotFound(RoomId),
}

impl StoreError {
    fn conflict(room: RoomId, expected: u64) -> Self {
        Self::Conflict { room, expected }
    }
}

/// A room value together with the version it was read at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// The storage seam for rooms.
///
/// The contract is optimistic concurrency: `load` hands back the value
/// together with a version number, and `commit` only succeeds if that
/// version is still current. Two writers can both load version 3, but
/// only the first commit lands; the loser gets [`StoreError::Conflict`]
/// and must re-read. There are no locks to hold or leak, which is why
/// this works for a store accessed from short-lived request handlers.
///
/// `Send + Sync` because one store instance is shared behind the applier
/// across whatever threads drive it.
pub trait RoomStore: Send + Sync {
    /// Persists a new room and assigns its id.
    fn create(&self, room: Room) -> Result<RoomId, StoreError>;

    /// Reads the current room value and its version.
    fn load(&self, id: RoomId) -> Result<Versioned<Room>, StoreError>;

    /// Replaces the room value if `expected_version` is still current.
    /// Returns the new version.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] when another writer committed first.
    fn commit(&self, id: RoomId, expected_version: u64, room: Room) -> Result<u64, StoreError>;

    /// Removes a room. Used to roll a creation back when admission
    /// fails after the row was written.
    fn delete(&self, id: RoomId) -> Result<(), StoreError>;
}

/// In-memory [`RoomStore`].
#[derive(Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<RoomId, (u64, Room)>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for MemoryStore {
    fn create(&self, room: Room) -> Result<RoomId, StoreError> {
        let id = RoomId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.rooms.lock().unwrap().insert(id, (1, room));
        Ok(id)
    }

    fn load(&self, id: RoomId) -> Result<Versioned<Room>, StoreError> {
        let rooms = self.rooms.lock().unwrap();
        let (version, room) = rooms.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(Versioned {
            version: *version,
            value: room.clone(),
        })
    }

    fn commit(&self, id: RoomId, expected_version: u64, room: Room) -> Result<u64, StoreError> {
        let mut rooms = self.rooms.lock().unwrap();
        let slot = rooms.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if slot.0 != expected_version {
            return Err(StoreError::conflict(id, expected_version));
        }
        slot.0 += 1;
        slot.1 = room;
        Ok(slot.0)
    }

    fn delete(&self, id: RoomId) -> Result<(), StoreError> {
        self.rooms
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use parlor_engine::{CreationParams, EngineCtx, find_definition, init};
    use parlor_protocol::{PlayerId, TimerMode};

    use super::*;

    fn sample_room() -> Room {
        let def = find_definition("glyphs").unwrap();
        let params = CreationParams {
            creator: PlayerId::new("a"),
            creator_handle: None,
            is_player: true,
            is_async: false,
            timer_mode: TimerMode::Normal,
        };
        init(&params, &def, &mut EngineCtx::new(0, 1))
    }

    #[test]
    fn test_create_assigns_distinct_ids() {
        let store = MemoryStore::new();
        let a = store.create(sample_room()).unwrap();
        let b = store.create(sample_room()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_commit_with_current_version_succeeds() {
        let store = MemoryStore::new();
        let id = store.create(sample_room()).unwrap();
        let loaded = store.load(id).unwrap();
        let v2 = store.commit(id, loaded.version, loaded.value).unwrap();
        assert_eq!(v2, loaded.version + 1);
    }

    #[test]
    fn test_commit_with_stale_version_conflicts() {
        let store = MemoryStore::new();
        let id = store.create(sample_room()).unwrap();
        let loaded = store.load(id).unwrap();
        store
            .commit(id, loaded.version, loaded.value.clone())
            .unwrap();
        let err = store.commit(id, loaded.version, loaded.value).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn test_delete_removes_the_room() {
        let store = MemoryStore::new();
        let id = store.create(sample_room()).unwrap();
        store.delete(id).unwrap();
        assert!(matches!(store.load(id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_load_missing_room_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.load(RoomId(404)),
            Err(StoreError::NotFound(_))
        ));
    }
}
