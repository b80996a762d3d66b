//! Error types for the behavior engine.
//!
//! Nothing in this crate is fatal to the host: callers inside the engine
//! recover from every variant locally. The enum exists so that collaborators
//! (samplers, stores, parsers) can report *what* went wrong and the engine
//! can decide which fallback applies.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BehaviorError {
    /// A signal sampler failed (subprocess error, unparsable output).
    #[error("sampler error: {0}")]
    Sampler(String),

    /// The current platform has no way to provide the requested signal.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// Filesystem failure while reading or writing persisted state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value supplied by a collaborator was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The engine event loop is no longer running.
    #[error("behavior engine stopped")]
    EngineStopped,
}

impl BehaviorError {
    pub fn sampler(message: impl Into<String>) -> Self {
        Self::Sampler(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

pub type Result<T> = std::result::Result<T, BehaviorError>;
