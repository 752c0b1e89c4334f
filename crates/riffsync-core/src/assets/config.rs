//! Asset processing options

use serde::{Deserialize, Serialize};

use crate::retry::{Backoff, RetryPolicy};

/// Default cache budget: 256 MiB
pub const DEFAULT_MAX_CACHE_SIZE_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub enable_caching: bool,
    /// Budget reported by `is_over_budget()`; never enforced by eviction
    pub max_cache_size_bytes: usize,
    /// Per-asset fetch timeout, enforced by the engine's loader
    pub asset_timeout_ms: u64,
    /// Retries after the first failed fetch of an asset
    pub retry_attempts: u32,
    /// Keep loading past failed optional assets instead of aborting
    pub fallback_enabled: bool,
    /// Prefix for library drum patterns and metronome styles
    pub library_base_url: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE_BYTES,
            asset_timeout_ms: 10_000,
            retry_attempts: 2,
            fallback_enabled: true,
            library_base_url: "library".to_string(),
        }
    }
}

impl AssetConfig {
    /// Fetch retry strategy derived from `retry_attempts`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.retry_attempts).with_backoff(Backoff::Exponential {
            base_ms: 200,
            factor: 2.0,
            max_ms: 2_000,
        })
    }

    pub fn apply(&mut self, patch: &AssetConfigPatch) {
        if let Some(v) = patch.enable_caching {
            self.enable_caching = v;
        }
        if let Some(v) = patch.max_cache_size_bytes {
            self.max_cache_size_bytes = v;
        }
        if let Some(v) = patch.asset_timeout_ms {
            self.asset_timeout_ms = v;
        }
        if let Some(v) = patch.retry_attempts {
            self.retry_attempts = v;
        }
        if let Some(v) = patch.fallback_enabled {
            self.fallback_enabled = v;
        }
        if let Some(v) = &patch.library_base_url {
            self.library_base_url = v.clone();
        }
    }
}

/// Partial update; absent fields are left alone, unknown keys are ignored
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetConfigPatch {
    pub enable_caching: Option<bool>,
    pub max_cache_size_bytes: Option<usize>,
    pub asset_timeout_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub fallback_enabled: Option<bool>,
    pub library_base_url: Option<String>,
}
