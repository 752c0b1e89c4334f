//! Riffsync Core - Playback engine for interactive music lessons

pub mod assets;
pub mod audio;
pub mod config;
pub mod engine;
pub mod observer;
pub mod retry;
pub mod sync;
pub mod types;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError, EngineResult, PlaybackState};
pub use sync::{EventPayload, EventType, SyncBus, SyncEvent};
pub use types::*;
