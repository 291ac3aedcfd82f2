//! MITM: two players chat; after a hidden number of messages a language
//! model silently takes over one side. The other player wins by calling
//! the robot as early as possible.
//!
//! The takeover step and the intercepted player are drawn from the
//! injected rng at Start, so neither client can predict or observe them
//! before the reveal.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use parlor_protocol::PlayerId;

use crate::definition::GameDefinition;
use crate::engine::{CreationParams, Effect};
use crate::games::default_true;
use crate::machine::{self, EngineCtx, Phase, ready_quorum, timer_expired};
use crate::room::{ENGINE_KEY, GenerationRecord, PlayerRecord, RoomCore, Timer, UNBOUNDED};

/// Chat lines are clipped to this many characters before they enter the
/// transcript (and before they reach the model prompt).
const MAX_LINE_CHARS: usize = 200;

/// Fallback inter-message gap when a player has no samples yet, ms.
const DEFAULT_GAP_MS: u64 = 3_000;

/// Clamp bounds for the synthetic-reply delay, ms.
const MIN_REPLY_DELAY_MS: u64 = 800;
const MAX_REPLY_DELAY_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MitmPhase {
    Lobby,
    Chat,
    Mitm,
    Reveal,
    Finish,
}

impl Phase for MitmPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Lobby => "Lobby",
            Self::Chat => "Chat",
            Self::Mitm => "Mitm",
            Self::Reveal => "Reveal",
            Self::Finish => "Finish",
        }
    }

    fn all() -> &'static [Self] {
        &[Self::Lobby, Self::Chat, Self::Mitm, Self::Reveal, Self::Finish]
    }

    fn base_duration(&self) -> u64 {
        match self {
            Self::Lobby | Self::Finish => UNBOUNDED,
            Self::Chat => 180_000,
            Self::Mitm => 180_000,
            Self::Reveal => 30_000,
        }
    }
}

/// One transcript line. `relayed` marks lines the model produced on the
/// intercepted player's behalf; clients render by `display_at` so the
/// synthetic lines land with a human-looking delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLine {
    pub author: PlayerId,
    pub text: String,
    pub at: u64,
    pub display_at: u64,
    pub relayed: bool,
}

/// Running mean of one player's inter-message gaps, used to pace the
/// model's replies like a human typist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStats {
    pub last_sent: Option<u64>,
    pub avg_gap_ms: u64,
    pub samples: u32,
}

impl TypingStats {
    fn observe(&mut self, now: u64) {
        if let Some(last) = self.last_sent {
            let gap = now.saturating_sub(last);
            let total = self.avg_gap_ms as u128 * self.samples as u128 + gap as u128;
            self.samples += 1;
            self.avg_gap_ms = (total / self.samples as u128) as u64;
        }
        self.last_sent = Some(now);
    }

    /// Humanized delay for the next synthetic reply: the clamped mean
    /// gap, jittered 0.8–1.4×.
    fn reply_delay(&self, rng: &mut impl Rng) -> u64 {
        let base = if self.samples == 0 {
            DEFAULT_GAP_MS
        } else {
            self.avg_gap_ms.clamp(MIN_REPLY_DELAY_MS, MAX_REPLY_DELAY_MS)
        };
        let jitter: f64 = rng.random_range(0.8..1.4);
        (base as f64 * jitter) as u64
    }
}

/// How the game ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// Who called the robot; `None` when the clock ran out first.
    pub caller: Option<PlayerId>,
    /// Transcript length at the moment of the call.
    pub called_at_step: usize,
    /// Whether the takeover had already happened. A call before the
    /// takeover is a false accusation.
    pub after_takeover: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub state: MitmPhase,
    /// Transcript length at which the model takes over, drawn at Start.
    pub steps_before_mitm: usize,
    /// The player whose side the model takes over.
    pub intercepted: Option<PlayerId>,
    pub transcript: Vec<ChatLine>,
    /// In-flight model reply; at most one at a time.
    pub pending_reply: Option<GenerationRecord>,
    pub typing: BTreeMap<PlayerId, TypingStats>,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Msg {
    NewPlayer {
        sender: PlayerId,
        #[serde(default)]
        handle: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
        #[serde(default = "default_true")]
        is_player: bool,
    },
    Start {
        sender: PlayerId,
    },
    Chat {
        sender: PlayerId,
        value: String,
    },
    CallRobot {
        sender: PlayerId,
    },
    GenerationResult {
        key: String,
        generation: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    OutOfTime {
        sender: PlayerId,
    },
    ReadyToContinue {
        sender: PlayerId,
    },
}

pub(crate) fn init(
    params: &CreationParams,
    _def: &GameDefinition,
    ctx: &mut EngineCtx,
) -> (State, BTreeMap<String, String>, Option<Timer>) {
    let state = State {
        state: MitmPhase::Lobby,
        steps_before_mitm: 0,
        intercepted: None,
        transcript: Vec::new(),
        pending_reply: None,
        typing: BTreeMap::new(),
        outcome: None,
    };
    let transitions = BTreeMap::from([
        ("Chat".to_string(), "Reveal".to_string()),
        ("Mitm".to_string(), "Reveal".to_string()),
        ("Reveal".to_string(), "Finish".to_string()),
    ]);
    let timer = machine::build_timer(params.effective_timer_mode(), MitmPhase::Lobby, ctx.now_ms);
    (state, transitions, timer)
}

pub(crate) fn reduce(
    core: &mut RoomCore,
    st: &mut State,
    msg: &Msg,
    ctx: &mut EngineCtx,
    effects: &mut Vec<Effect>,
) {
    match msg {
        Msg::NewPlayer {
            sender,
            handle,
            avatar,
            is_player,
        } => {
            if st.state != MitmPhase::Lobby || core.players.contains_key(sender) {
                return;
            }
            // Strictly two-seat game: late joiners watch.
            let seat_open = core.active_players() < 2;
            let mut rec =
                PlayerRecord::new(st.state.name(), *is_player && seat_open, handle.clone());
            rec.avatar = avatar.clone();
            core.players.insert(sender.clone(), rec);
        }

        Msg::Start { sender } => {
            if st.state != MitmPhase::Lobby
                || !is_active(core, sender)
                || core.active_players() != 2
            {
                return;
            }
            st.steps_before_mitm = ctx.rng().random_range(10..=39);
            let actives: Vec<PlayerId> = core
                .players
                .iter()
                .filter(|(_, p)| p.is_player)
                .map(|(id, _)| id.clone())
                .collect();
            st.intercepted = actives.choose(ctx.rng()).cloned();
            machine::enter(&mut st.state, core, MitmPhase::Chat, ctx.now_ms);
        }

        Msg::Chat { sender, value } => {
            if !matches!(st.state, MitmPhase::Chat | MitmPhase::Mitm) || !is_active(core, sender) {
                return;
            }
            // Once the model holds a side, lines from that side go
            // nowhere: the model speaks for them.
            if st.state == MitmPhase::Mitm && st.intercepted.as_ref() == Some(sender) {
                return;
            }
            // Strict alternation, with one carve-out: after the takeover
            // the live player may speak again when no reply is in flight
            // (their turn was consumed by a reply that never landed).
            if st.transcript.last().map(|l| &l.author) == Some(sender)
                && !(st.state == MitmPhase::Mitm && st.pending_reply.is_none())
            {
                return;
            }

            st.typing.entry(sender.clone()).or_default().observe(ctx.now_ms);
            st.transcript.push(ChatLine {
                author: sender.clone(),
                text: truncate(value),
                at: ctx.now_ms,
                display_at: ctx.now_ms,
                relayed: false,
            });

            if st.state == MitmPhase::Chat && st.transcript.len() >= st.steps_before_mitm {
                machine::enter(&mut st.state, core, MitmPhase::Mitm, ctx.now_ms);
            }
            // The model replies whenever the live player spoke last.
            if st.state == MitmPhase::Mitm && st.intercepted.as_ref() != Some(sender) {
                request_reply(core, st, ctx, effects);
            }
        }

        Msg::CallRobot { sender } => {
            if !matches!(st.state, MitmPhase::Chat | MitmPhase::Mitm) || !is_active(core, sender) {
                return;
            }
            finish_chat(core, st, ctx, Some(sender.clone()));
        }

        Msg::GenerationResult {
            key,
            generation,
            error,
        } => {
            if key != ENGINE_KEY {
                return;
            }
            let Some(mut record) = st.pending_reply.take() else {
                return;
            };
            record.generation = generation.clone();
            record.fulfilled = true;
            record.error = error.clone();

            if record.error.is_some() {
                core.quarantine([record]);
                return;
            }
            let Some(reply) = extract_reply(&record.generation) else {
                // Unusable reply: drop the turn, keep the evidence.
                record.error = Some("no bracketed reply in completion".to_string());
                core.quarantine([record]);
                return;
            };
            if st.state != MitmPhase::Mitm {
                return;
            }
            let Some(intercepted) = st.intercepted.clone() else {
                return;
            };
            let delay = st
                .typing
                .get(&intercepted)
                .copied()
                .unwrap_or_default()
                .reply_delay(ctx.rng());
            st.transcript.push(ChatLine {
                author: intercepted,
                text: truncate(&reply),
                at: ctx.now_ms,
                display_at: ctx.now_ms + delay,
                relayed: true,
            });
        }

        Msg::OutOfTime { sender } => {
            if !is_active(core, sender) || !timer_expired(core, ctx.now_ms) {
                return;
            }
            match st.state {
                MitmPhase::Chat | MitmPhase::Mitm => finish_chat(core, st, ctx, None),
                MitmPhase::Reveal => {
                    machine::enter(&mut st.state, core, MitmPhase::Finish, ctx.now_ms);
                }
                MitmPhase::Lobby | MitmPhase::Finish => {}
            }
        }

        Msg::ReadyToContinue { sender } => {
            if st.state != MitmPhase::Reveal {
                return;
            }
            let Some(p) = core.players.get_mut(sender) else {
                return;
            };
            if !p.is_player {
                return;
            }
            p.is_ready_to_continue = true;
            if ready_quorum(&core.players) {
                machine::enter(&mut st.state, core, MitmPhase::Finish, ctx.now_ms);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn is_active(core: &RoomCore, id: &PlayerId) -> bool {
    core.players.get(id).is_some_and(|p| p.is_player)
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_LINE_CHARS).collect()
}

/// Files a chat-completion request for the intercepted side. At most one
/// reply is in flight; a second trigger while one is pending is dropped.
fn request_reply(
    core: &mut RoomCore,
    st: &mut State,
    _ctx: &mut EngineCtx,
    effects: &mut Vec<Effect>,
) {
    if st.pending_reply.is_some() {
        return;
    }
    let Some(intercepted) = st.intercepted.clone() else {
        return;
    };
    let handle_of = |core: &RoomCore, id: &PlayerId| -> String {
        core.players
            .get(id)
            .and_then(|p| p.handle.clone())
            .unwrap_or_else(|| id.to_string())
    };
    let mut prompt = String::from(
        "You are impersonating a person in a one-on-one text chat. \
         Continue the conversation as the last-listed speaker's partner. \
         Match their tone and message length. \
         Reply with exactly one message wrapped in square brackets, like [hey what's up].\n\n",
    );
    for line in &st.transcript {
        prompt.push_str(&handle_of(core, &line.author));
        prompt.push_str(": ");
        prompt.push_str(&line.text);
        prompt.push('\n');
    }
    let record = GenerationRecord::pending(
        intercepted,
        core.definition.model.clone(),
        None,
        prompt,
    );
    st.pending_reply = Some(record.clone());
    effects.push(Effect::Generate {
        key: ENGINE_KEY.to_string(),
        record,
    });
}

/// Pulls the first `[...]` span out of a completion. Models ramble;
/// anything outside the brackets is discarded.
fn extract_reply(generation: &serde_json::Value) -> Option<String> {
    let text = generation.as_str()?;
    let open = text.find('[')?;
    let close = text[open + 1..].find(']')? + open + 1;
    let reply = text[open + 1..close].trim();
    if reply.is_empty() {
        None
    } else {
        Some(reply.to_string())
    }
}

fn finish_chat(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx, caller: Option<PlayerId>) {
    let outcome = Outcome {
        caller,
        called_at_step: st.transcript.len(),
        after_takeover: st.state == MitmPhase::Mitm,
    };
    core.push_history(
        ctx.now_ms,
        serde_json::json!({
            "outcome": outcome,
            "stepsBeforeMitm": st.steps_before_mitm,
            "intercepted": st.intercepted,
            "transcript": st.transcript,
        }),
    );
    st.outcome = Some(outcome);
    machine::enter(&mut st.state, core, MitmPhase::Reveal, ctx.now_ms);
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::find_definition;
    use crate::engine::{GameMessage, GameState, init as engine_init, reduce as engine_reduce};
    use crate::room::Room;
    use parlor_protocol::TimerMode;

    fn pid(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    fn apply(room: Room, m: Msg, now: u64, seed: u64) -> (Room, Vec<Effect>) {
        let out = engine_reduce(room, &GameMessage::Mitm(m), &mut EngineCtx::new(now, seed));
        (out.room, out.effects)
    }

    fn state(room: &Room) -> &State {
        match &room.game {
            GameState::Mitm(s) => s,
            _ => panic!("wrong engine"),
        }
    }

    fn room_in_chat() -> Room {
        let def = find_definition("mitm").unwrap();
        let params = CreationParams {
            creator: pid("a"),
            creator_handle: Some("Ana".into()),
            is_player: true,
            is_async: false,
            timer_mode: TimerMode::Normal,
        };
        let mut room = engine_init(&params, &def, &mut EngineCtx::new(0, 9));
        room = apply(
            room,
            Msg::NewPlayer {
                sender: pid("b"),
                handle: Some("Bo".into()),
                avatar: None,
                is_player: true,
            },
            0,
            9,
        )
        .0;
        let (room, _) = apply(room, Msg::Start { sender: pid("a") }, 100, 9);
        assert_eq!(state(&room).state, MitmPhase::Chat);
        let st = state(&room);
        assert!((10..=39).contains(&st.steps_before_mitm));
        assert!(st.intercepted.is_some());
        room
    }

    /// Chats up to one message short of the takeover threshold, arranged
    /// so the live (non-intercepted) player speaks next.
    fn chat_until_one_before_takeover(mut room: Room) -> Room {
        let st = state(&room);
        let threshold = st.steps_before_mitm;
        let intercepted = st.intercepted.clone().unwrap();
        let live = if intercepted == pid("a") { pid("b") } else { pid("a") };
        // If the threshold is odd the live player must also open.
        let (first, second) = if threshold % 2 == 1 {
            (live.clone(), intercepted.clone())
        } else {
            (intercepted.clone(), live.clone())
        };
        for i in 0..threshold - 1 {
            let sender = if i % 2 == 0 { first.clone() } else { second.clone() };
            room = apply(
                room,
                Msg::Chat {
                    sender,
                    value: format!("line {i}"),
                },
                1_000 + i as u64 * 2_000,
                9,
            )
            .0;
        }
        assert_eq!(state(&room).transcript.len(), threshold - 1);
        assert_eq!(state(&room).state, MitmPhase::Chat);
        room
    }

    #[test]
    fn test_third_seat_becomes_observer() {
        let def = find_definition("mitm").unwrap();
        let params = CreationParams {
            creator: pid("a"),
            creator_handle: None,
            is_player: true,
            is_async: false,
            timer_mode: TimerMode::Normal,
        };
        let mut fresh = engine_init(&params, &def, &mut EngineCtx::new(0, 1));
        for p in ["b", "c"] {
            fresh = apply(
                fresh,
                Msg::NewPlayer {
                    sender: pid(p),
                    handle: None,
                    avatar: None,
                    is_player: true,
                },
                0,
                1,
            )
            .0;
        }
        assert_eq!(fresh.core.active_players(), 2);
        assert!(!fresh.core.players[&pid("c")].is_player);
    }

    #[test]
    fn test_alternation_enforced() {
        let room = room_in_chat();
        let (room, _) = apply(
            room,
            Msg::Chat {
                sender: pid("a"),
                value: "hi".into(),
            },
            1_000,
            9,
        );
        let (room, _) = apply(
            room,
            Msg::Chat {
                sender: pid("a"),
                value: "hello??".into(),
            },
            2_000,
            9,
        );
        assert_eq!(state(&room).transcript.len(), 1);
    }

    #[test]
    fn test_threshold_message_triggers_takeover_and_reply_same_step() {
        let room = room_in_chat();
        let mut room = chat_until_one_before_takeover(room);
        let intercepted = state(&room).intercepted.clone().unwrap();
        let live = if intercepted == pid("a") { pid("b") } else { pid("a") };

        // The live player sends the threshold-hitting message: the room
        // flips to Mitm and the model is asked to answer immediately.
        let (next, effects) = apply(
            room.clone(),
            Msg::Chat {
                sender: live,
                value: "you there?".into(),
            },
            90_000,
            9,
        );
        room = next;
        let st = state(&room);
        assert_eq!(st.state, MitmPhase::Mitm);
        assert_eq!(st.transcript.len(), st.steps_before_mitm);
        assert!(st.pending_reply.is_some());
        assert_eq!(effects.len(), 1);
        let Effect::Generate { key, record } = &effects[0];
        assert_eq!(key, ENGINE_KEY);
        assert!(record.prompt.contains("you there?"));
    }

    #[test]
    fn test_intercepted_player_lines_dropped_after_takeover() {
        let room = room_in_chat();
        let room = chat_until_one_before_takeover(room);
        let intercepted = state(&room).intercepted.clone().unwrap();
        let live = if intercepted == pid("a") { pid("b") } else { pid("a") };
        let (room, _) = apply(
            room,
            Msg::Chat {
                sender: live,
                value: "hm".into(),
            },
            90_000,
            9,
        );
        assert_eq!(state(&room).state, MitmPhase::Mitm);
        let before = state(&room).transcript.len();
        let (room, effects) = apply(
            room,
            Msg::Chat {
                sender: intercepted,
                value: "it's really me I swear".into(),
            },
            91_000,
            9,
        );
        assert_eq!(state(&room).transcript.len(), before);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_bracketed_reply_lands_as_relayed_line() {
        let room = room_in_chat();
        let room = chat_until_one_before_takeover(room);
        let intercepted = state(&room).intercepted.clone().unwrap();
        let live = if intercepted == pid("a") { pid("b") } else { pid("a") };
        let (room, _) = apply(
            room,
            Msg::Chat {
                sender: live,
                value: "so what are you up to".into(),
            },
            90_000,
            9,
        );
        let before = state(&room).transcript.len();
        let (room, _) = apply(
            room,
            Msg::GenerationResult {
                key: ENGINE_KEY.into(),
                generation: serde_json::json!("Sure! Here is my reply: [not much, just chilling] hope that helps"),
                error: None,
            },
            92_000,
            9,
        );
        let st = state(&room);
        assert_eq!(st.transcript.len(), before + 1);
        let line = st.transcript.last().unwrap();
        assert_eq!(line.author, intercepted);
        assert_eq!(line.text, "not much, just chilling");
        assert!(line.relayed);
        assert!(line.display_at > line.at);
        assert!(st.pending_reply.is_none());
    }

    #[test]
    fn test_unparseable_reply_dropped_and_quarantined() {
        let room = room_in_chat();
        let room = chat_until_one_before_takeover(room);
        let intercepted = state(&room).intercepted.clone().unwrap();
        let live = if intercepted == pid("a") { pid("b") } else { pid("a") };
        let (room, _) = apply(
            room,
            Msg::Chat {
                sender: live,
                value: "hello?".into(),
            },
            90_000,
            9,
        );
        let before = state(&room).transcript.len();
        let (room, _) = apply(
            room,
            Msg::GenerationResult {
                key: ENGINE_KEY.into(),
                generation: serde_json::json!("I'm sorry, I can't continue this conversation."),
                error: None,
            },
            92_000,
            9,
        );
        let st = state(&room);
        assert_eq!(st.transcript.len(), before);
        assert!(st.pending_reply.is_none());
        let quarantined = room.core.generation_errors.as_ref().unwrap();
        assert_eq!(quarantined.len(), 1);
        assert!(quarantined[0].error.is_some());
    }

    #[test]
    fn test_chat_resumes_after_dropped_reply() {
        let room = room_in_chat();
        let room = chat_until_one_before_takeover(room);
        let intercepted = state(&room).intercepted.clone().unwrap();
        let live = if intercepted == pid("a") { pid("b") } else { pid("a") };
        let (room, _) = apply(
            room,
            Msg::Chat {
                sender: live.clone(),
                value: "hello?".into(),
            },
            90_000,
            9,
        );
        let (room, _) = apply(
            room,
            Msg::GenerationResult {
                key: ENGINE_KEY.into(),
                generation: serde_json::json!("no brackets here"),
                error: None,
            },
            92_000,
            9,
        );
        // The turn was consumed without a line landing; the live player
        // must be able to speak again and re-trigger a reply.
        let before = state(&room).transcript.len();
        let (room, effects) = apply(
            room,
            Msg::Chat {
                sender: live.clone(),
                value: "you still there?".into(),
            },
            95_000,
            9,
        );
        let st = state(&room);
        assert_eq!(st.transcript.len(), before + 1);
        assert_eq!(st.transcript.last().unwrap().author, live);
        assert!(st.pending_reply.is_some());
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_call_robot_records_outcome_and_reveals() {
        let room = room_in_chat();
        let room = chat_until_one_before_takeover(room);
        let intercepted = state(&room).intercepted.clone().unwrap();
        let live = if intercepted == pid("a") { pid("b") } else { pid("a") };
        let steps = state(&room).transcript.len();

        // Calling before the takeover is a false accusation.
        let (room, _) = apply(room, Msg::CallRobot { sender: live.clone() }, 50_000, 9);
        let st = state(&room);
        assert_eq!(st.state, MitmPhase::Reveal);
        let outcome = st.outcome.as_ref().unwrap();
        assert_eq!(outcome.caller.as_ref(), Some(&live));
        assert_eq!(outcome.called_at_step, steps);
        assert!(!outcome.after_takeover);
        assert_eq!(room.core.history.len(), 1);
    }

    #[test]
    fn test_lines_truncated() {
        let room = room_in_chat();
        let long = "x".repeat(500);
        let (room, _) = apply(room, Msg::Chat { sender: pid("a"), value: long }, 1_000, 9);
        assert_eq!(state(&room).transcript[0].text.chars().count(), MAX_LINE_CHARS);
    }

    #[test]
    fn test_start_requires_two_players() {
        let def = find_definition("mitm").unwrap();
        let params = CreationParams {
            creator: pid("a"),
            creator_handle: None,
            is_player: true,
            is_async: false,
            timer_mode: TimerMode::Normal,
        };
        let room = engine_init(&params, &def, &mut EngineCtx::new(0, 1));
        let (room, _) = apply(room, Msg::Start { sender: pid("a") }, 5, 1);
        assert_eq!(state(&room).state, MitmPhase::Lobby);
    }
}
