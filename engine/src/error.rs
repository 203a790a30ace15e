use thiserror::Error;

use sb_core::error::{StoreError, UpstreamError};

/// Typed failures surfaced by the function-calling loop and the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No user-facing text was generated across all rounds.
    #[error("no text generated after {rounds} rounds (forced round attempted: {forced_round})")]
    EmptyResponse { rounds: u32, forced_round: bool },

    /// A single round exceeded its wall-clock budget.
    #[error("round timed out after {seconds}s")]
    LoopTimeout { seconds: u64 },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The client went away; the event channel is closed. Not an error to
    /// report anywhere, just a signal to stop and release the stream.
    #[error("client disconnected")]
    Cancelled,
}

pub type EngineResult<T> = Result<T, EngineError>;
