//! Asset Payload Processor
//!
//! Pure transformation plus cache. The processor never fetches anything and
//! never fails on a malformed payload: it reports through `validate_payload`
//! and records only the outcomes its caller hands it.

use log::{debug, info, warn};

use super::cache::{AssetCache, LoadingState};
use super::config::{AssetConfig, AssetConfigPatch};
use super::data::AssetData;
use super::manifest::{build_manifest, AssetManifest};
use super::payload::WorkflowPayload;
use super::validation::{self, ValidationReport};

#[derive(Debug, Default)]
pub struct AssetProcessor {
    config: AssetConfig,
    manifest: Option<AssetManifest>,
    loading: LoadingState,
    cache: AssetCache,
}

impl AssetProcessor {
    pub fn new(config: AssetConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &AssetConfig {
        &self.config
    }

    pub fn update_config(&mut self, patch: &AssetConfigPatch) {
        self.config.apply(patch);
        debug!("[ASSETS] Config updated: {:?}", self.config);
    }

    /// Resolve `payload` into a manifest and start a fresh loading state
    /// sized to it. The cache is kept so repeated sessions reuse assets.
    pub fn extract_manifest(&mut self, payload: &WorkflowPayload) -> AssetManifest {
        let manifest = build_manifest(payload, &self.config.library_base_url);
        info!(
            "[ASSETS] Manifest: {} assets, ~{}ms estimated load",
            manifest.total_count(),
            manifest.estimated_load_time_ms()
        );
        self.loading = LoadingState::with_total(manifest.total_count());
        self.manifest = Some(manifest.clone());
        manifest
    }

    pub fn validate_payload(&self, payload: &WorkflowPayload) -> ValidationReport {
        let report = validation::validate_payload(payload);
        for warning in &report.warnings {
            debug!("[ASSETS] Validation warning: {}", warning);
        }
        report
    }

    pub fn manifest(&self) -> Option<&AssetManifest> {
        self.manifest.as_ref()
    }

    /// Record a fetched asset. Urls outside the current manifest are accepted
    /// (speculative prefetch) but do not move progress.
    pub fn mark_asset_loaded(&mut self, url: &str, data: AssetData) {
        let in_manifest = self.manifest.as_ref().is_some_and(|m| m.contains(url));
        if !in_manifest {
            debug!("[ASSETS] Recorded asset outside manifest: {}", url);
        }
        self.loading.record(url, &data, in_manifest);

        if self.config.enable_caching {
            let was_over = self.is_over_budget();
            self.cache.insert(url, data);
            if !was_over && self.is_over_budget() {
                warn!(
                    "[ASSETS] Cache size {} bytes exceeds budget of {} bytes",
                    self.cache.size_bytes(),
                    self.config.max_cache_size_bytes
                );
            }
        }
    }

    pub fn loading_state(&self) -> &LoadingState {
        &self.loading
    }

    pub fn loading_progress(&self) -> f64 {
        self.loading.progress_percent()
    }

    pub fn cached_asset(&self, url: &str) -> Option<AssetData> {
        self.cache.get(url).cloned()
    }

    /// Drop every cached asset and reset loading progress
    pub fn clear_cache(&mut self) {
        if !self.cache.is_empty() {
            info!(
                "[ASSETS] Clearing {} cached assets ({} bytes)",
                self.cache.len(),
                self.cache.size_bytes()
            );
        }
        self.cache.clear();
        self.loading = LoadingState::default();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.size_bytes()
    }

    pub fn is_over_budget(&self) -> bool {
        self.cache.size_bytes() > self.config.max_cache_size_bytes
    }
}
