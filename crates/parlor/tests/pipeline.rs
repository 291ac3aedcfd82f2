//! Full write-path test: create a room, play into the prompt phase,
//! dispatch the resulting generation effects against a canned runner,
//! and feed the fulfillments back through the applier.

use std::sync::Arc;

use async_trait::async_trait;
use parlor::prelude::*;
use parlor_engine::GameState;
use parlor_gen::{
    ChatCompletionRequest, ImageRequest, RunnerError, TextCompletionRequest,
};
use parlor_protocol::TimerMode;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Runner that always answers; enough to drive the pipeline offline.
struct CannedRunner;

#[async_trait]
impl ModelRunner for CannedRunner {
    async fn text_completion(&self, req: TextCompletionRequest) -> Result<String, RunnerError> {
        Ok(format!("completion for: {}", req.prompt))
    }

    async fn chat_completion(
        &self,
        _req: ChatCompletionRequest,
    ) -> Result<serde_json::Value, RunnerError> {
        Ok(serde_json::json!({"score": 6, "comment": "fine"}))
    }

    async fn image_diffusion(&self, _req: ImageRequest) -> Result<String, RunnerError> {
        Ok("https://img.example/out.png".into())
    }

    async fn image_direct(&self, _req: ImageRequest) -> Result<String, RunnerError> {
        Ok("https://img.example/out.png".into())
    }
}

fn envelope(id: u64, room_id: RoomId, game: serde_json::Value) -> Envelope {
    Envelope {
        id: MessageId(id),
        room_id,
        timestamp: 0,
        game,
    }
}

#[tokio::test]
async fn test_effects_dispatch_and_fulfill_back_into_the_room() {
    init_logging();

    let applier = Applier::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(Arc::new(CannedRunner));

    let created = applier
        .create_room(
            &RoomCreationRequest {
                game_id: "glyphs".into(),
                creator_id: PlayerId::new("ana"),
                is_player: true,
                is_async: false,
                timer_mode: TimerMode::Normal,
            },
            0,
            42,
        )
        .unwrap();
    let room_id = created.room_id;

    // Two more players join, the game starts, everyone prompts.
    let mut msg_id = 0;
    let mut next = |game: serde_json::Value| {
        msg_id += 1;
        envelope(msg_id, room_id, game)
    };
    for p in ["bo", "cy"] {
        applier
            .apply_envelope(&next(serde_json::json!({"type": "NewPlayer", "sender": p})), 10, 1)
            .unwrap();
    }
    applier
        .apply_envelope(&next(serde_json::json!({"type": "Start", "sender": "ana"})), 20, 2)
        .unwrap();

    let mut effects = Vec::new();
    for p in ["ana", "bo", "cy"] {
        let out = applier
            .apply_envelope(
                &next(serde_json::json!({
                    "type": "Prompt",
                    "sender": p,
                    "value": format!("{p}'s idea"),
                })),
                30,
                3,
            )
            .unwrap();
        effects.extend(out.effects);
    }
    assert_eq!(effects.len(), 3);

    // Dispatch after commit, then feed each fulfillment back.
    for effect in effects {
        let Effect::Generate { key, record } = effect;
        let fulfillment = dispatcher.dispatch(&key, &record).await;
        assert!(fulfillment.error.is_none());
        applier
            .apply_envelope(&next(fulfillment.into_message()), 40, 4)
            .unwrap();
    }

    let room = applier.store().load(room_id).unwrap().value;
    match &room.game {
        GameState::PromptGuess(st) => {
            assert_eq!(st.generations.len(), 3);
            assert!(st.generations.values().all(|r| r.is_ok()));
            assert!(
                st.generations
                    .values()
                    .all(|r| r.generation.as_str().unwrap().starts_with("completion for:"))
            );
        }
        _ => panic!("expected a PromptGuess room"),
    }
}

#[tokio::test]
async fn test_redelivered_fulfillment_does_not_double_apply() {
    init_logging();

    let applier = Applier::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(Arc::new(CannedRunner));
    let created = applier
        .create_room(
            &RoomCreationRequest {
                game_id: "glyphs".into(),
                creator_id: PlayerId::new("ana"),
                is_player: true,
                is_async: false,
                timer_mode: TimerMode::Normal,
            },
            0,
            42,
        )
        .unwrap();
    let room_id = created.room_id;

    applier
        .apply_envelope(
            &envelope(1, room_id, serde_json::json!({"type": "NewPlayer", "sender": "bo"})),
            10,
            1,
        )
        .unwrap();
    applier
        .apply_envelope(
            &envelope(2, room_id, serde_json::json!({"type": "Start", "sender": "ana"})),
            20,
            2,
        )
        .unwrap();
    let out = applier
        .apply_envelope(
            &envelope(
                3,
                room_id,
                serde_json::json!({"type": "Prompt", "sender": "ana", "value": "an idea"}),
            ),
            30,
            3,
        )
        .unwrap();
    let Effect::Generate { key, record } = out.effects.into_iter().next().unwrap();
    let payload = dispatcher.dispatch(&key, &record).await.into_message();

    let first = applier
        .apply_envelope(&envelope(4, room_id, payload.clone()), 40, 4)
        .unwrap();
    assert!(!first.deduped);
    let second = applier
        .apply_envelope(&envelope(4, room_id, payload), 41, 5)
        .unwrap();
    assert!(second.deduped);
    assert_eq!(first.room, second.room);
}
