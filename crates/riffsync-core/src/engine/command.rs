//! Lock-free command queue between the engine and the render thread
//!
//! The engine pushes commands from any thread holding its control lock; the
//! render callback pops them at the start of each block. Anything the render
//! thread removes (voices, replaced samples) travels back on a second queue so
//! it is freed off the audio thread.

use std::sync::Arc;

use crate::types::StereoBuffer;

use super::mixer::ChannelStrip;

/// Render-side handle for a registered source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSlot(pub u32);

/// Decoded audio ready for the render thread
#[derive(Debug, Clone)]
pub struct SourceSample {
    pub frames: Arc<StereoBuffer>,
    pub sample_rate: u32,
}

/// Commands sent to the render thread
pub enum EngineCommand {
    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    Play,
    Pause,
    /// Pause and rewind to the start
    Stop,

    // ─────────────────────────────────────────────────────────────
    // Master
    // ─────────────────────────────────────────────────────────────
    SetMasterVolume(f32),
    /// Tempo as a stretch ratio against the written BPM
    SetTempoRatio(f64),
    SetPitch(f32),

    // ─────────────────────────────────────────────────────────────
    // Sources
    // ─────────────────────────────────────────────────────────────
    AddSource {
        slot: SourceSlot,
        strip: ChannelStrip,
        sample: Option<Box<SourceSample>>,
    },
    RemoveSource { slot: SourceSlot },
    SetStrip { slot: SourceSlot, strip: ChannelStrip },
    SetSample {
        slot: SourceSlot,
        sample: Option<Box<SourceSample>>,
    },
}

/// Things the render thread hands back to be dropped elsewhere
pub enum Retired {
    Sample(Box<SourceSample>),
}

pub const COMMAND_QUEUE_CAPACITY: usize = 256;

pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

pub fn retire_channel() -> (rtrb::Producer<Retired>, rtrb::Consumer<Retired>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
