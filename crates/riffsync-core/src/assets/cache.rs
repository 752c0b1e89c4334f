//! URL-keyed asset cache and per-session loading progress

use std::collections::HashMap;
use std::sync::Arc;

use super::data::{AssetData, DecodedAudio};

/// Decoded assets held for reuse
///
/// Size accounting sums raw byte length for event streams and
/// `length × channels × 4` for decoded audio. Entries only leave through
/// `clear()`; re-inserting a url replaces the entry and its accounted size.
#[derive(Debug, Default)]
pub struct AssetCache {
    entries: HashMap<String, AssetData>,
    size_bytes: usize,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &str, data: AssetData) {
        let added = data.size_bytes();
        if let Some(previous) = self.entries.insert(url.to_string(), data) {
            self.size_bytes -= previous.size_bytes();
        }
        self.size_bytes += added;
    }

    pub fn get(&self, url: &str) -> Option<&AssetData> {
        self.entries.get(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size_bytes = 0;
    }
}

/// Progress for the current manifest
///
/// `loaded_assets` counts distinct manifest urls, so it never exceeds
/// `total_assets`. Urls outside the manifest are recorded but not counted.
#[derive(Debug, Default, Clone)]
pub struct LoadingState {
    event_streams: HashMap<String, Arc<[u8]>>,
    audio_buffers: HashMap<String, Arc<DecodedAudio>>,
    total_assets: usize,
    loaded_assets: usize,
}

impl LoadingState {
    pub fn with_total(total_assets: usize) -> Self {
        Self {
            total_assets,
            ..Default::default()
        }
    }

    /// Record `data` for `url`. Returns true when this counted toward progress.
    pub(crate) fn record(&mut self, url: &str, data: &AssetData, in_manifest: bool) -> bool {
        let already_loaded = self.is_loaded(url);
        match data {
            AssetData::Bytes(bytes) => {
                self.event_streams.insert(url.to_string(), Arc::clone(bytes));
            }
            AssetData::Audio(audio) => {
                self.audio_buffers.insert(url.to_string(), Arc::clone(audio));
            }
        }
        if in_manifest && !already_loaded && self.loaded_assets < self.total_assets {
            self.loaded_assets += 1;
            true
        } else {
            false
        }
    }

    pub fn is_loaded(&self, url: &str) -> bool {
        self.event_streams.contains_key(url) || self.audio_buffers.contains_key(url)
    }

    pub fn event_stream(&self, url: &str) -> Option<&Arc<[u8]>> {
        self.event_streams.get(url)
    }

    pub fn audio_buffer(&self, url: &str) -> Option<&Arc<DecodedAudio>> {
        self.audio_buffers.get(url)
    }

    pub fn total_assets(&self) -> usize {
        self.total_assets
    }

    pub fn loaded_assets(&self) -> usize {
        self.loaded_assets
    }

    /// 0..=100, and 0 when there is nothing to load
    pub fn progress_percent(&self) -> f64 {
        if self.total_assets == 0 {
            return 0.0;
        }
        self.loaded_assets as f64 / self.total_assets as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.total_assets > 0 && self.loaded_assets == self.total_assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replacing_entry_adjusts_size() {
        let mut cache = AssetCache::new();
        cache.insert("a.mid", AssetData::bytes(vec![0u8; 100]));
        cache.insert("b.wav", AssetData::audio(DecodedAudio::new(48000, 2, vec![0.0; 20])));
        assert_eq!(cache.size_bytes(), 100 + 10 * 2 * 4);

        cache.insert("a.mid", AssetData::bytes(vec![0u8; 10]));
        assert_eq!(cache.size_bytes(), 10 + 80);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert_eq!(cache.size_bytes(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_progress_counts_each_manifest_url_once() {
        let mut state = LoadingState::with_total(2);
        let data = AssetData::bytes(vec![1, 2, 3]);

        assert!(state.record("a.mid", &data, true));
        assert!(!state.record("a.mid", &data, true));
        assert!(!state.record("prefetch.mid", &data, false));
        assert_eq!(state.loaded_assets(), 1);
        assert!((state.progress_percent() - 50.0).abs() < 1e-9);
        assert!(state.is_loaded("prefetch.mid"));
    }

    #[test]
    fn test_empty_state_has_zero_progress() {
        let state = LoadingState::default();
        assert_eq!(state.progress_percent(), 0.0);
        assert!(!state.is_complete());
    }
}
