//! Tempo and pitch via signalsmith-stretch
//!
//! Tempo is a stretch ratio against the exercise's written BPM; pitch is a
//! semitone transpose. Both apply to the mixed source bus.

use signalsmith_stretch::Stretch;

use crate::types::StereoSample;

const CHANNELS: u32 = 2;

/// Ratio limits (half to double speed)
pub const MIN_RATIO: f64 = 0.5;
pub const MAX_RATIO: f64 = 2.0;

/// Transpose limit in semitones (one octave either way)
pub const MAX_SEMITONES: f32 = 12.0;

pub struct TimeStretcher {
    stretcher: Stretch,
    /// output_bpm / written_bpm
    ratio: f64,
    pitch_semitones: f32,
}

impl TimeStretcher {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
            ratio: 1.0,
            pitch_semitones: 0.0,
        }
    }

    pub fn set_ratio(&mut self, ratio: f64) {
        self.ratio = if ratio.is_finite() {
            ratio.clamp(MIN_RATIO, MAX_RATIO)
        } else {
            1.0
        };
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn ratio_from_bpm(written_bpm: f64, target_bpm: f64) -> f64 {
        if written_bpm > 0.0 {
            target_bpm / written_bpm
        } else {
            1.0
        }
    }

    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.pitch_semitones = semitones.clamp(-MAX_SEMITONES, MAX_SEMITONES);
        self.stretcher
            .set_transpose_factor_semitones(self.pitch_semitones, None);
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_semitones
    }

    /// Unity ratio and no transpose: the renderer skips the stretcher
    pub fn is_neutral(&self) -> bool {
        (self.ratio - 1.0).abs() < 1e-6 && self.pitch_semitones == 0.0
    }

    /// Input frames needed to produce `output_frames` at the current ratio
    pub fn input_frames_for(&self, output_frames: usize) -> usize {
        ((output_frames as f64) * self.ratio).round().max(1.0) as usize
    }

    pub fn reset(&mut self) {
        self.stretcher.reset();
    }

    /// Stretch `input` into `output`; the length difference sets the ratio
    pub fn process(&mut self, input: &[StereoSample], output: &mut [StereoSample]) {
        if input.is_empty() {
            output.fill(StereoSample::silence());
            return;
        }
        let input: &[f32] = bytemuck::cast_slice(input);
        let output: &mut [f32] = bytemuck::cast_slice_mut(output);
        output.fill(0.0);
        self.stretcher.process(input, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_from_bpm() {
        let ratio = TimeStretcher::ratio_from_bpm(90.0, 120.0);
        assert!((ratio - 120.0 / 90.0).abs() < 1e-9);
        assert_eq!(TimeStretcher::ratio_from_bpm(0.0, 120.0), 1.0);
    }

    #[test]
    fn test_limits() {
        let mut stretcher = TimeStretcher::new(48000);
        assert!(stretcher.is_neutral());

        stretcher.set_ratio(5.0);
        assert_eq!(stretcher.ratio(), MAX_RATIO);
        assert_eq!(stretcher.input_frames_for(256), 512);

        stretcher.set_ratio(1.0);
        stretcher.set_pitch_semitones(-30.0);
        assert_eq!(stretcher.pitch_semitones(), -MAX_SEMITONES);
        assert!(!stretcher.is_neutral());
    }

    #[test]
    fn test_process_fills_output() {
        let mut stretcher = TimeStretcher::new(48000);
        stretcher.set_ratio(1.5);
        let input = vec![StereoSample::mono(0.1); stretcher.input_frames_for(512)];
        let mut output = vec![StereoSample::mono(9.0); 512];
        stretcher.process(&input, &mut output);
        assert!(output.iter().all(|s| s.left.is_finite() && s.left.abs() < 9.0));
    }
}
