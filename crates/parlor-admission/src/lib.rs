//! Room admission for Parlor.
//!
//! Two small controllers used at room creation and join time:
//!
//! - [`ShortcodeStore`] — the four-letter codes players type to find a
//!   room, with expiry and bounded-collision issuance
//! - [`QueueController`] — paces game starts so a burst of creations
//!   doesn't land on the generation backend all at once

mod error;
mod queue;
mod shortcode;

pub use error::AdmissionError;
pub use queue::{
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_WAIT_MS, DEFAULT_SPACING_MS, QueueController, QueueEntry,
};
pub use shortcode::{CODE_TTL_MS, ShortcodeStore};
