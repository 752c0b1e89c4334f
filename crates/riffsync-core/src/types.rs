//! Sample types shared by the output backends, decoded assets and the
//! render-thread mixer

use std::ops::{Add, AddAssign, Index, IndexMut, Mul};

/// Rate requested from output devices until one is negotiated (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

pub type Sample = f32;

/// One stereo frame
///
/// `#[repr(C)]` so `&[StereoSample]` casts to interleaved `&[f32]` through
/// bytemuck; the time-stretcher depends on that layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Duplicate a mono value into both channels
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self::new(value, value)
    }
}

impl Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.left + rhs.left, self.right + rhs.right)
    }
}

impl AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, gain: Sample) -> Self {
        Self::new(self.left * gain, self.right * gain)
    }
}

/// Owned run of stereo frames
///
/// Render scratch space is allocated once at its largest size and sliced per
/// block, so nothing here grows on the audio thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoBuffer {
    frames: Vec<StereoSample>,
}

impl StereoBuffer {
    pub fn silence(len: usize) -> Self {
        Self {
            frames: vec![StereoSample::silence(); len],
        }
    }

    pub fn from_vec(frames: Vec<StereoSample>) -> Self {
        Self { frames }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.frames
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.frames
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &StereoSample {
        &self.frames[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut StereoSample {
        &mut self.frames[index]
    }
}
