//! Mixer - per-source channel strips and master volume
//!
//! Pan uses a constant-power law: a centered source sits at -3 dB in each
//! channel and a hard-panned source at unity in one channel.

use std::f32::consts::FRAC_PI_4;

use super::source::{clamp_pan, clamp_volume, AudioSourceConfig};
use crate::types::StereoSample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStrip {
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
}

impl Default for ChannelStrip {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            muted: false,
            solo: false,
        }
    }
}

impl From<&AudioSourceConfig> for ChannelStrip {
    fn from(config: &AudioSourceConfig) -> Self {
        Self {
            volume: clamp_volume(config.volume),
            pan: clamp_pan(config.pan),
            muted: config.muted,
            solo: config.solo,
        }
    }
}

impl ChannelStrip {
    /// Left/right gain including volume
    pub fn gains(&self) -> (f32, f32) {
        let angle = (self.pan + 1.0) * FRAC_PI_4;
        (angle.cos() * self.volume, angle.sin() * self.volume)
    }

    /// Muted strips are silent; while any strip is soloed only soloed
    /// strips are heard
    pub fn is_audible(&self, any_solo: bool) -> bool {
        !self.muted && (!any_solo || self.solo)
    }
}

/// Add `input` into `output` with the strip's gains applied
#[inline]
pub fn mix_into(output: &mut [StereoSample], input: &[StereoSample], strip: &ChannelStrip) {
    let (gain_l, gain_r) = strip.gains();
    for (out, sample) in output.iter_mut().zip(input) {
        out.left += sample.left * gain_l;
        out.right += sample.right * gain_r;
    }
}

/// Master section
#[derive(Debug, Clone)]
pub struct Mixer {
    master_volume: f32,
}

impl Default for Mixer {
    fn default() -> Self {
        Self { master_volume: 1.0 }
    }
}

impl Mixer {
    pub fn new(master_volume: f32) -> Self {
        Self {
            master_volume: clamp_volume(master_volume),
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = clamp_volume(volume);
    }

    pub fn apply_master(&self, output: &mut [StereoSample]) {
        if (self.master_volume - 1.0).abs() < f32::EPSILON {
            return;
        }
        for sample in output {
            *sample = *sample * self.master_volume;
        }
    }
}
