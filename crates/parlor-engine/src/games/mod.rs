//! The five concrete game engines.
//!
//! All of them follow the same skeleton —
//! `Lobby → [Intro] → input phase(s) → reveal/vote → Score → (loop | Finish)`
//! — with transitions driven only by quorum completion and validated
//! timer expiry, through the shared machinery in [`crate::machine`].

pub mod ai_judge;
pub mod group_think;
pub mod mitm;
pub mod prompt_guess;
pub mod quip;

/// Serde default for message flags that are true unless stated.
pub(crate) fn default_true() -> bool {
    true
}
