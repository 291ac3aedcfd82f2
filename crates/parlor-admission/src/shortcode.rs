//! Join shortcodes: the four-letter codes players type to find a room.
//!
//! Codes are drawn from an injected rng (26^4 ≈ 457k combinations) and
//! expire after 24 hours, after which the code is free for reuse. A
//! bounded retry keeps issuance from spinning when the space fills up.

use std::collections::HashMap;

use rand::Rng;

use parlor_protocol::RoomId;

use crate::error::AdmissionError;

/// Codes older than this no longer resolve and may be reissued.
pub const CODE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Collision draws before issuance gives up.
const MAX_ISSUE_ATTEMPTS: u32 = 8;

const CODE_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CodeEntry {
    room: RoomId,
    issued_at: u64,
}

/// In-memory shortcode table.
#[derive(Debug, Default)]
pub struct ShortcodeStore {
    codes: HashMap<String, CodeEntry>,
}

impl ShortcodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh code for a room. A slot whose previous code has
    /// expired counts as free.
    ///
    /// # Errors
    /// [`AdmissionError::CodesExhausted`] when every draw collided.
    pub fn issue(
        &mut self,
        room: RoomId,
        now: u64,
        rng: &mut impl Rng,
    ) -> Result<String, AdmissionError> {
        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let code = draw_code(rng);
            let live = self
                .codes
                .get(&code)
                .is_some_and(|e| now < e.issued_at.saturating_add(CODE_TTL_MS));
            if live {
                continue;
            }
            self.codes.insert(
                code.clone(),
                CodeEntry {
                    room,
                    issued_at: now,
                },
            );
            tracing::debug!(%room, code, "shortcode issued");
            return Ok(code);
        }
        Err(AdmissionError::CodesExhausted(MAX_ISSUE_ATTEMPTS))
    }

    /// Resolves a code to its room. Lookup is case-insensitive; expired
    /// codes don't resolve.
    pub fn resolve(&self, code: &str, now: u64) -> Option<RoomId> {
        let code = code.trim().to_ascii_uppercase();
        self.codes
            .get(&code)
            .filter(|e| now < e.issued_at.saturating_add(CODE_TTL_MS))
            .map(|e| e.room)
    }

    /// Drops expired entries. Called periodically; resolution is correct
    /// without it.
    pub fn sweep(&mut self, now: u64) {
        self.codes
            .retain(|_, e| now < e.issued_at.saturating_add(CODE_TTL_MS));
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

fn draw_code(rng: &mut impl Rng) -> String {
    (0..CODE_LEN)
        .map(|_| (b'A' + rng.random_range(0..26u8)) as char)
        .collect()
}

// =========================================================================
// Tests
// =========================================================================
