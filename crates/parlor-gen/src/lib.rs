//! Generation dispatch for Parlor.
//!
//! Engines emit pending generation records as effects; this crate runs
//! them against a [`ModelRunner`] and produces the `GenerationResult`
//! payload the room is fed afterwards. The runner trait is the single
//! seam to model providers, so everything above it stays testable
//! offline.

mod dispatch;
mod runner;

pub use dispatch::{Dispatcher, Fulfillment};
pub use runner::{
    ChatCompletionRequest, ImageRequest, ModelRunner, RunnerError, TextCompletionRequest,
};
