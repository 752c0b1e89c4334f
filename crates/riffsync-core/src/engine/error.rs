//! Engine orchestrator errors

use thiserror::Error;

use crate::assets::FetchError;
use crate::audio::ResourceError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Audio output could not be acquired or resumed
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("Engine has been disposed")]
    Disposed,

    /// Payload failed validation; holds the validation errors
    #[error("Invalid workflow: {}", .0.join("; "))]
    InvalidWorkflow(Vec<String>),

    #[error("Failed to load asset {url}: {source}")]
    AssetLoad {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Asset loading was cancelled")]
    LoadCancelled,

    #[error("Unknown audio source: {0}")]
    UnknownSource(String),

    #[error("Audio source already registered: {0}")]
    DuplicateSource(String),

    #[error("Invalid audio source: {0}")]
    InvalidSource(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
