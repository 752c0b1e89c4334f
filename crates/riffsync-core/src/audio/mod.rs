//! Shared audio output: acquisition, lifecycle and backends
//!
//! # Architecture
//!
//! - **ResourceManager**: owns the one platform output per session. Async
//!   `initialize`/`resume`/`suspend`, synchronous idempotent `dispose`, and
//!   token-based state/error observers.
//! - **OutputBackend**: opens streams. CPAL for real devices (cpal-backend
//!   feature), a null backend for headless hosts.
//! - **Render path**: the backend's audio thread calls the installed
//!   `RenderCallback` once per block; the manager counts rendered frames on
//!   an `OutputClock` that any thread can read without locks.
//!
//! # Example Usage
//!
//! ```ignore
//! use riffsync_core::audio::{ResourceConfig, ResourceManager};
//!
//! let manager = ResourceManager::from_config(ResourceConfig::default());
//! manager.on_error(|e| eprintln!("audio unavailable: {}", e));
//!
//! // From a click handler:
//! manager.initialize().await?;
//! ```

mod backend;
mod config;
mod error;
mod manager;
mod state;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
#[cfg(feature = "cpal-backend")]
mod device;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    build_backend, NullBackend, OutputBackend, OutputClock, OutputStream, RenderCallback,
    StreamEvent, StreamEventSink, StreamRequest,
};
pub use config::{BackendKind, BufferSize, DeviceId, ResourceConfig, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use error::{sanitize_message, AudioError, AudioResult, ResourceError, ResourceErrorKind};
pub use manager::ResourceManager;
pub use state::ResourceState;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;
#[cfg(feature = "cpal-backend")]
pub use device::{list_output_devices, OutputDevice};
