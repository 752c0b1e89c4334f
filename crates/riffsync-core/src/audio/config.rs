//! Output resource configuration
//!
//! Selects the backend, the device and the stream shape the resource manager
//! asks for when it acquires the platform output.

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Largest render block handed to the render callback in one call (frames)
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Default buffer size when no preference is specified (frames)
/// 512 frames is a safe default that works on most systems
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Which output implementation acquires the platform resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// System audio through CPAL
    #[default]
    Cpal,
    /// Silent output driven by the wall clock (headless hosts, CI)
    Null,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Cpal => write!(f, "cpal"),
            BackendKind::Null => write!(f, "null"),
        }
    }
}

/// Preferred buffer size for audio streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferSize {
    /// Let the backend choose
    #[default]
    Default,
    /// Request a specific buffer size in frames (clamped by the backend)
    Fixed(u32),
    /// Smallest size that is still safe on most hardware
    LowLatency,
}

impl BufferSize {
    /// Resolved size in frames, clamped to what the render path supports
    pub fn frames(&self) -> u32 {
        match self {
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
            BufferSize::Fixed(frames) => (*frames).clamp(64, MAX_BUFFER_SIZE as u32),
            BufferSize::LowLatency => 256,
        }
    }

    /// Latency in milliseconds for a given sample rate
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        (self.frames() as f32 / sample_rate as f32) * 1000.0
    }
}

/// Audio device identifier
///
/// Includes the host backend (ALSA, JACK, CoreAudio...) so a device can be
/// picked from a specific host on systems that expose several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier; None searches every host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for acquiring the shared output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub backend: BackendKind,

    /// Output device (None = system default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,

    /// Preferred sample rate (None = 48kHz, or the device maximum if unsupported)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,

    pub buffer_size: BufferSize,

    /// Open the stream paused, the way browsers hand out a muted context
    /// until a gesture resumes it
    pub start_suspended: bool,

    /// Attempts made inside a single `initialize()` call
    pub acquisition_retry: RetryPolicy,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpal,
            device: None,
            sample_rate: None,
            buffer_size: BufferSize::Default,
            start_suspended: false,
            acquisition_retry: RetryPolicy::once(),
        }
    }
}

impl ResourceConfig {
    /// Null backend with defaults, for headless hosts
    pub fn null() -> Self {
        Self {
            backend: BackendKind::Null,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: BufferSize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.acquisition_retry = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_clamped() {
        assert_eq!(BufferSize::Fixed(8).frames(), 64);
        assert_eq!(BufferSize::Fixed(1_000_000).frames(), MAX_BUFFER_SIZE as u32);
        assert_eq!(BufferSize::Default.frames(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_latency_ms() {
        let latency = BufferSize::Fixed(480).latency_ms(48000);
        assert!((latency - 10.0).abs() < 0.001);
        assert_eq!(BufferSize::Default.latency_ms(0), 0.0);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ResourceConfig = serde_yaml::from_str("backend: \"null\"\nunknown_key: 3\n").unwrap();
        assert_eq!(config.backend, BackendKind::Null);
        assert_eq!(config.buffer_size, BufferSize::Default);
        assert!(!config.start_suspended);
        assert_eq!(config.acquisition_retry, RetryPolicy::once());
    }

    #[test]
    fn test_device_label() {
        assert_eq!(DeviceId::with_host("hw:0,0", "ALSA").display_label(), "[ALSA] hw:0,0");
        assert_eq!(DeviceId::new("Speakers").display_label(), "Speakers");
    }
}
