//! Engine configuration
//!
//! One YAML file holds every section. Each section is `#[serde(default)]`, so
//! a partial file fills the rest with defaults and unknown keys are ignored.
//!
//! ```yaml
//! audio:
//!   backend: cpal
//!   buffer_size: low_latency
//! assets:
//!   asset_timeout_ms: 5000
//! transport:
//!   base_bpm: 100
//! ```

mod io;
mod paths;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::assets::AssetConfig;
use crate::audio::ResourceConfig;
use crate::sync::BusConfig;

pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path};

/// Transport clock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TIMELINE_UPDATE period while playing
    pub timeline_interval_ms: u64,
    /// Tempo assumed until a workflow supplies one
    pub base_bpm: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeline_interval_ms: 16,
            base_bpm: 120.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: ResourceConfig,
    pub assets: AssetConfig,
    pub bus: BusConfig,
    pub transport: TransportConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Self {
        load_config(path)
    }

    /// Load from `default_config_path()`
    pub fn load_default() -> Self {
        load_config(&default_config_path())
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        save_config(self, path)
    }

    /// Null output backend, otherwise defaults. For headless hosts and tests.
    pub fn headless() -> Self {
        Self {
            audio: ResourceConfig::null(),
            ..Default::default()
        }
    }
}
