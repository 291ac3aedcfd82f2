//! Top-level error type for room operations.

use parlor_protocol::RoomId;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Engine(#[from] parlor_engine::EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Admission(#[from] parlor_admission::AdmissionError),

    /// Every commit attempt lost the optimistic-concurrency race.
    #[error("giving up on {room} after {attempts} conflicting commits")]
    Contention { room: RoomId, attempts: u32 },
}
