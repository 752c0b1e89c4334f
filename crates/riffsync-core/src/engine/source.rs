//! Mixable audio source descriptions supplied by the UI host

use serde::{Deserialize, Serialize};

/// One mixable input, e.g. a bass sample track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSourceConfig {
    /// Unique within an engine session
    pub id: String,
    /// 0.0 - 1.0
    pub volume: f32,
    pub muted: bool,
    pub solo: bool,
    /// -1.0 (left) to 1.0 (right)
    pub pan: f32,
    /// Loaded audio asset this source plays, if any
    pub asset_url: Option<String>,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            volume: 1.0,
            muted: false,
            solo: false,
            pan: 0.0,
            asset_url: None,
        }
    }
}

impl AudioSourceConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    pub fn with_asset(mut self, url: impl Into<String>) -> Self {
        self.asset_url = Some(url.into());
        self
    }

    /// Clamp volume and pan into range; NaN falls back to the default
    pub fn normalized(mut self) -> Self {
        self.volume = clamp_volume(self.volume);
        self.pan = clamp_pan(self.pan);
        self
    }
}

pub(crate) fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        1.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

pub(crate) fn clamp_pan(pan: f32) -> f32 {
    if pan.is_nan() {
        0.0
    } else {
        pan.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_clamps() {
        let config = AudioSourceConfig::new("bass-1")
            .with_volume(1.5)
            .with_pan(f32::NAN)
            .normalized();
        assert_eq!(config.volume, 1.0);
        assert_eq!(config.pan, 0.0);
    }

    #[test]
    fn test_deserialize_host_json() {
        let config: AudioSourceConfig =
            serde_json::from_str(r#"{"id": "bass-1", "volume": 0.8, "assetUrl": "s/e1.wav"}"#).unwrap();
        assert_eq!(config.id, "bass-1");
        assert_eq!(config.volume, 0.8);
        assert!(!config.muted);
        assert_eq!(config.asset_url.as_deref(), Some("s/e1.wav"));
    }
}
