//! The transaction applier: the one writer of room state.
//!
//! Every inbound message funnels through [`Applier::apply`]:
//! load → dedupe → reduce → commit, retried under optimistic-concurrency
//! conflicts. Because engines are pure over an injected context, a retry
//! re-reduces against the fresh room value and produces exactly the
//! outcome a first-time apply would have — effects are returned to the
//! caller only after the commit they belong to succeeded, so nothing
//! external ever observes a losing attempt.

use std::sync::Mutex;

use parlor_admission::{QueueController, QueueEntry, ShortcodeStore};
use parlor_engine::{
    CreationParams, Effect, EngineCtx, GameMessage, Reduced, Room, find_definition, init, reduce,
};
use parlor_protocol::{Envelope, MessageId, RoomCreationRequest, RoomId};

use crate::error::ApplyError;
use crate::store::{RoomStore, StoreError, Versioned};

/// Commit attempts before an apply gives up as contended.
const DEFAULT_MAX_RETRIES: u32 = 5;

/// The outcome of a successful apply.
#[derive(Debug)]
pub struct Applied {
    pub room: Room,
    /// Deferred generation work; dispatch these now that the room has
    /// committed.
    pub effects: Vec<Effect>,
    /// True when the message had already been applied and this call
    /// changed nothing.
    pub deduped: bool,
}

/// Everything a creation call hands back to the client.
#[derive(Debug)]
pub struct CreatedRoom {
    pub room_id: RoomId,
    /// The join code players type.
    pub shortcode: String,
    pub queue: QueueEntry,
    pub room: Room,
}

/// Owns the write path for rooms, plus the admission bookkeeping that
/// happens at creation time.
pub struct Applier<S> {
    store: S,
    shortcodes: Mutex<ShortcodeStore>,
    queue: Mutex<QueueController>,
    max_retries: u32,
}

impl<S: RoomStore> Applier<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            shortcodes: Mutex::new(ShortcodeStore::new()),
            queue: Mutex::new(QueueController::default()),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_queue(store: S, queue: QueueController) -> Self {
        Self {
            queue: Mutex::new(queue),
            ..Self::new(store)
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a room from a catalog entry: builds the initial room
    /// value, persists it, issues a shortcode, and takes a queue slot.
    pub fn create_room(
        &self,
        req: &RoomCreationRequest,
        now: u64,
        seed: u64,
    ) -> Result<CreatedRoom, ApplyError> {
        let definition = find_definition(&req.game_id)?;
        let params = CreationParams {
            creator: req.creator_id.clone(),
            creator_handle: None,
            is_player: req.is_player,
            is_async: req.is_async,
            timer_mode: req.timer_mode,
        };
        let mut ctx = EngineCtx::new(now, seed);
        let room = init(&params, &definition, &mut ctx);
        let room_id = self.store.create(room.clone())?;

        // Creation failure must mean no room: if admission rejects, the
        // row just written is rolled back before the error surfaces.
        let queue = match self.queue.lock().unwrap().enqueue(room_id, now) {
            Ok(entry) => entry,
            Err(err) => {
                self.rollback(room_id);
                return Err(err.into());
            }
        };
        let issued = self.shortcodes.lock().unwrap().issue(room_id, now, ctx.rng());
        let shortcode = match issued {
            Ok(code) => code,
            Err(err) => {
                self.queue.lock().unwrap().remove(room_id);
                self.rollback(room_id);
                return Err(err.into());
            }
        };

        tracing::info!(%room_id, game = req.game_id, shortcode, "room created");
        Ok(CreatedRoom {
            room_id,
            shortcode,
            queue,
            room,
        })
    }

    fn rollback(&self, room_id: RoomId) {
        if let Err(err) = self.store.delete(room_id) {
            tracing::warn!(%room_id, error = %err, "rollback of failed creation did not delete");
        }
    }

    /// Looks a join code up. Expired codes resolve to nothing.
    pub fn resolve_shortcode(&self, code: &str, now: u64) -> Option<RoomId> {
        self.shortcodes.lock().unwrap().resolve(code, now)
    }

    /// A queued room's poll; releases it once its start time arrives.
    pub fn queue_ping(&self, room: RoomId, now: u64) -> Option<QueueEntry> {
        self.queue.lock().unwrap().ping(room, now)
    }

    /// Applies one decoded message to a room.
    ///
    /// The context (clock reading and rng seed) is fixed across retries,
    /// so a re-reduce after a conflict differs only by the fresher room
    /// value it starts from.
    pub fn apply(
        &self,
        room_id: RoomId,
        msg_id: MessageId,
        msg: &GameMessage,
        now: u64,
        seed: u64,
    ) -> Result<Applied, ApplyError> {
        for attempt in 1..=self.max_retries {
            let Versioned { version, value } = self.store.load(room_id)?;
            if value.core.seen_messages.contains(&msg_id) {
                tracing::debug!(%room_id, %msg_id, "duplicate message, no-op");
                return Ok(Applied {
                    room: value,
                    effects: Vec::new(),
                    deduped: true,
                });
            }

            let mut ctx = EngineCtx::new(now, seed);
            let Reduced { mut room, effects } = reduce(value, msg, &mut ctx);
            room.core.seen_messages.insert(msg_id);

            match self.store.commit(room_id, version, room.clone()) {
                Ok(_) => return Ok(Applied {
                    room,
                    effects,
                    deduped: false,
                }),
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(%room_id, attempt, "commit conflict, re-reducing");
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(ApplyError::Contention {
            room: room_id,
            attempts: self.max_retries,
        })
    }

    /// Decodes an envelope against the room's engine kind and applies it.
    pub fn apply_envelope(
        &self,
        env: &Envelope,
        now: u64,
        seed: u64,
    ) -> Result<Applied, ApplyError> {
        let kind = self.store.load(env.room_id)?.value.core.definition.kind;
        let msg = GameMessage::decode(kind, &env.game)?;
        self.apply(env.room_id, env.id, &msg, now, seed)
    }
}

// =========================================================================
// Tests
// =========================================================================
