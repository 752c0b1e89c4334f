//! Engine orchestrator - transport, mixer, tempo/pitch, asset loading
//!
//! This module ties the other components together:
//! - Engine: the façade hosts and widgets call (play/pause/stop, sources,
//!   master volume, tempo, pitch, workflow loading)
//! - Renderer: lock-free render-thread side, fed through a command queue
//! - Mixer: per-source channel strips and master gain
//! - TimeStretcher: tempo and transposition on the mixed signal

mod command;
mod error;
mod mixer;
mod orchestrator;
mod renderer;
mod source;
mod timeline;
mod timestretch;

pub use command::*;
pub use error::*;
pub use mixer::*;
pub use orchestrator::*;
pub use renderer::{Renderer, RendererSetup, TransportAtomics, MAX_SOURCES};
pub use source::AudioSourceConfig;
pub use timestretch::*;
