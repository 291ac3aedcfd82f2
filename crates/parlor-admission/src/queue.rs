//! The creation pacing queue.
//!
//! Every new room passes through here before its game may start, which
//! spreads the burst of generation traffic that follows a game launch.
//! Entries are advisory: clients poll with pings and are released when
//! their start time arrives. A room whose client stopped pinging past
//! the max-wait cutoff is treated as abandoned and stops occupying a
//! position.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use parlor_protocol::RoomId;

use crate::error::AdmissionError;

/// Default gap between consecutive game starts, ms.
pub const DEFAULT_SPACING_MS: u64 = 15_000;

/// Default cap on simultaneously queued rooms.
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Entries older than this no longer hold a position.
pub const DEFAULT_MAX_WAIT_MS: u64 = 120_000;

/// One room's place in the queue, as reported to its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// False once the room has been released to start.
    pub in_queue: bool,
    /// Epoch ms at which the room may start.
    pub start_time: u64,
    pub created_at: u64,
}

/// Spaces room starts out over time, bounded in depth.
#[derive(Debug)]
pub struct QueueController {
    entries: BTreeMap<RoomId, QueueEntry>,
    spacing_ms: u64,
    max_depth: usize,
    max_wait_ms: u64,
}

impl Default for QueueController {
    fn default() -> Self {
        Self::new(DEFAULT_SPACING_MS, DEFAULT_MAX_DEPTH, DEFAULT_MAX_WAIT_MS)
    }
}

impl QueueController {
    pub fn new(spacing_ms: u64, max_depth: usize, max_wait_ms: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            spacing_ms,
            max_depth,
            max_wait_ms,
        }
    }

    /// Adds a room to the queue and assigns its start time: `now` plus
    /// one spacing interval per room already waiting.
    ///
    /// # Errors
    /// [`AdmissionError::QueueFull`] when the waiting count is at the
    /// configured depth.
    pub fn enqueue(&mut self, room: RoomId, now: u64) -> Result<QueueEntry, AdmissionError> {
        if let Some(existing) = self.entries.get(&room) {
            return Ok(*existing);
        }
        let position = self.waiting(now);
        if position >= self.max_depth {
            return Err(AdmissionError::QueueFull(position));
        }
        let entry = QueueEntry {
            in_queue: true,
            start_time: now + position as u64 * self.spacing_ms,
            created_at: now,
        };
        self.entries.insert(room, entry);
        tracing::debug!(%room, position, start_time = entry.start_time, "room queued");
        Ok(entry)
    }

    /// A client's poll. Releases the room once its start time has
    /// arrived; returns the current entry either way.
    pub fn ping(&mut self, room: RoomId, now: u64) -> Option<QueueEntry> {
        let entry = self.entries.get_mut(&room)?;
        if entry.in_queue && now >= entry.start_time {
            entry.in_queue = false;
            tracing::debug!(%room, "room released from queue");
        }
        Some(*entry)
    }

    /// Forgets a room (finished, or never started).
    pub fn remove(&mut self, room: RoomId) {
        self.entries.remove(&room);
    }

    /// Count of rooms currently holding a position: still queued, and
    /// not abandoned past the max-wait cutoff.
    pub fn waiting(&self, now: u64) -> usize {
        self.entries
            .values()
            .filter(|e| e.in_queue && now.saturating_sub(e.created_at) <= self.max_wait_ms)
            .count()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_room_starts_immediately() {
        let mut q = QueueController::default();
        let entry = q.enqueue(RoomId(1), 1_000).unwrap();
        assert!(entry.in_queue);
        assert_eq!(entry.start_time, 1_000);
    }

    #[test]
    fn test_later_rooms_are_spaced_out() {
        let mut q = QueueController::new(10_000, 50, 120_000);
        q.enqueue(RoomId(1), 0).unwrap();
        let second = q.enqueue(RoomId(2), 0).unwrap();
        let third = q.enqueue(RoomId(3), 0).unwrap();
        assert_eq!(second.start_time, 10_000);
        assert_eq!(third.start_time, 20_000);
    }

    #[test]
    fn test_ping_releases_at_start_time() {
        let mut q = QueueController::new(10_000, 50, 120_000);
        q.enqueue(RoomId(1), 0).unwrap();
        let second = q.enqueue(RoomId(2), 0).unwrap();
        assert_eq!(second.start_time, 10_000);

        // Too early: still queued.
        let polled = q.ping(RoomId(2), 9_999).unwrap();
        assert!(polled.in_queue);
        // At the deadline: released, and no longer holds a position.
        let polled = q.ping(RoomId(2), 10_000).unwrap();
        assert!(!polled.in_queue);
        assert_eq!(q.waiting(10_000), 1);
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut q = QueueController::new(10_000, 2, 120_000);
        q.enqueue(RoomId(1), 0).unwrap();
        q.enqueue(RoomId(2), 0).unwrap();
        let err = q.enqueue(RoomId(3), 0).unwrap_err();
        assert!(matches!(err, AdmissionError::QueueFull(2)));
    }

    #[test]
    fn test_abandoned_entries_stop_holding_positions() {
        let mut q = QueueController::new(10_000, 2, 60_000);
        q.enqueue(RoomId(1), 0).unwrap();
        q.enqueue(RoomId(2), 0).unwrap();
        // Both clients went silent past the cutoff: a new room gets in
        // at position zero.
        let entry = q.enqueue(RoomId(3), 100_000).unwrap();
        assert_eq!(entry.start_time, 100_000);
    }

    #[test]
    fn test_enqueue_is_idempotent_per_room() {
        let mut q = QueueController::default();
        let first = q.enqueue(RoomId(1), 0).unwrap();
        let again = q.enqueue(RoomId(1), 5_000).unwrap();
        assert_eq!(first, again);
    }
}
