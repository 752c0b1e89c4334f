//! Decoded asset payloads

use std::sync::Arc;

use crate::types::{StereoBuffer, StereoSample};

/// Interleaved PCM decoded from an audio sample asset
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved f32 samples, `length() * channels` long
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            samples,
        }
    }

    /// Length in frames
    pub fn length(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Estimated memory footprint: length × channels × 4 bytes
    pub fn size_bytes(&self) -> usize {
        self.length() * self.channels as usize * std::mem::size_of::<f32>()
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.length() as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Stereo view for the mixer: mono is duplicated, extra channels dropped
    pub fn to_stereo(&self) -> StereoBuffer {
        let channels = self.channels.max(1) as usize;
        let frames = self
            .samples
            .chunks_exact(channels)
            .map(|frame| match frame {
                [mono] => StereoSample::mono(*mono),
                [left, right, ..] => StereoSample::new(*left, *right),
                [] => StereoSample::silence(),
            })
            .collect();
        StereoBuffer::from_vec(frames)
    }
}

/// What `mark_asset_loaded` records: raw event-stream bytes or decoded audio
#[derive(Debug, Clone, PartialEq)]
pub enum AssetData {
    Bytes(Arc<[u8]>),
    Audio(Arc<DecodedAudio>),
}

impl AssetData {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        AssetData::Bytes(Arc::from(data))
    }

    pub fn audio(audio: DecodedAudio) -> Self {
        AssetData::Audio(Arc::new(audio))
    }

    /// Cache accounting size
    pub fn size_bytes(&self) -> usize {
        match self {
            AssetData::Bytes(bytes) => bytes.len(),
            AssetData::Audio(audio) => audio.size_bytes(),
        }
    }

    pub fn as_audio(&self) -> Option<&Arc<DecodedAudio>> {
        match self {
            AssetData::Audio(audio) => Some(audio),
            AssetData::Bytes(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_accounting() {
        assert_eq!(AssetData::bytes(vec![0u8; 10]).size_bytes(), 10);

        let audio = DecodedAudio::new(48000, 2, vec![0.0; 2 * 480]);
        assert_eq!(audio.length(), 480);
        assert_eq!(AssetData::audio(audio).size_bytes(), 480 * 2 * 4);
    }

    #[test]
    fn test_mono_to_stereo() {
        let audio = DecodedAudio::new(48000, 1, vec![0.25, -0.5]);
        let stereo = audio.to_stereo();
        assert_eq!(stereo.len(), 2);
        assert_eq!(stereo[1], StereoSample::new(-0.5, -0.5));
    }

    #[test]
    fn test_duration() {
        let audio = DecodedAudio::new(1000, 2, vec![0.0; 2000]);
        assert!((audio.duration_ms() - 1000.0).abs() < 1e-9);
    }
}
