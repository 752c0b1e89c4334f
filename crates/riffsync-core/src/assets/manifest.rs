//! Resolved, prioritized asset list for one playback session

use std::collections::HashSet;

use serde::Serialize;

use super::payload::WorkflowPayload;
use super::validation::DEFAULT_METRONOME_STYLE;

/// Rough per-asset fetch+decode estimates used for `estimated_load_time_ms`
const EVENTS_LOAD_ESTIMATE_MS: u64 = 50;
const SAMPLE_LOAD_ESTIMATE_MS: u64 = 150;
const AMBIENCE_LOAD_ESTIMATE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Note/timing data (MIDI-like)
    Events,
    /// Audio sample to decode
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Bassline,
    Chords,
    DrumPattern,
    Metronome,
    BassNote,
    DrumHit,
    Ambience,
}

impl AssetCategory {
    /// Assets the session cannot start without
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            AssetCategory::Bassline | AssetCategory::Chords | AssetCategory::BassNote
        )
    }
}

/// Load priority. Ordered so that `High < Medium < Low` sorts high first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetPriority {
    High,
    Medium,
    Low,
}

/// One fetchable unit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AssetReference {
    #[serde(rename = "type")]
    kind: AssetKind,
    category: AssetCategory,
    url: String,
    priority: AssetPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

impl AssetReference {
    /// Returns None for an empty or blank url
    pub fn new(
        kind: AssetKind,
        category: AssetCategory,
        url: &str,
        priority: AssetPriority,
    ) -> Option<Self> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            category,
            url: url.to_string(),
            priority,
            index: None,
            tag: None,
        })
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn category(&self) -> AssetCategory {
        self.category
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn priority(&self) -> AssetPriority {
        self.priority
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn load_estimate_ms(&self) -> u64 {
        match (self.kind, self.category) {
            (_, AssetCategory::Ambience) => AMBIENCE_LOAD_ESTIMATE_MS,
            (AssetKind::Events, _) => EVENTS_LOAD_ESTIMATE_MS,
            (AssetKind::Audio, _) => SAMPLE_LOAD_ESTIMATE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    assets: Vec<AssetReference>,
    total_count: usize,
    estimated_load_time_ms: u64,
}

impl AssetManifest {
    pub fn new(assets: Vec<AssetReference>) -> Self {
        let estimated_load_time_ms = assets.iter().map(AssetReference::load_estimate_ms).sum();
        Self {
            total_count: assets.len(),
            assets,
            estimated_load_time_ms,
        }
    }

    /// Assets in manifest order
    pub fn assets(&self) -> &[AssetReference] {
        &self.assets
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn estimated_load_time_ms(&self) -> u64 {
        self.estimated_load_time_ms
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.assets.iter().any(|a| a.url == url)
    }

    pub fn get(&self, url: &str) -> Option<&AssetReference> {
        self.assets.iter().find(|a| a.url == url)
    }

    /// Fetch order: by priority, manifest order within a priority
    pub fn load_order(&self) -> Vec<&AssetReference> {
        let mut ordered: Vec<&AssetReference> = self.assets.iter().collect();
        ordered.sort_by_key(|a| a.priority);
        ordered
    }
}

fn library_url(base: &str, folder: &str, id: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        format!("{}/{}.mid", folder, id)
    } else {
        format!("{}/{}/{}.mid", base, folder, id)
    }
}

/// Build the manifest for `payload`
///
/// Order: tutorial event streams (high), library event streams (medium),
/// then audio samples in payload order: bass notes (high), drum hits
/// (medium), ambience (low). Blank urls are skipped.
pub fn build_manifest(payload: &WorkflowPayload, library_base_url: &str) -> AssetManifest {
    use AssetCategory::*;
    use AssetKind::*;
    use AssetPriority::*;

    let mut assets = Vec::new();

    if let Some(url) = payload.bassline_url() {
        assets.extend(AssetReference::new(Events, Bassline, url, High));
    }
    if let Some(url) = payload.chords_url() {
        assets.extend(AssetReference::new(Events, Chords, url, High));
    }

    if let Some(id) = payload.drum_pattern_id() {
        let url = library_url(library_base_url, "drum-patterns", id);
        assets.extend(AssetReference::new(Events, DrumPattern, &url, Medium).map(|a| a.with_tag(id)));
    }
    let style = payload.metronome_style_id().unwrap_or(DEFAULT_METRONOME_STYLE);
    let url = library_url(library_base_url, "metronomes", style);
    assets.extend(AssetReference::new(Events, Metronome, &url, Medium).map(|a| a.with_tag(style)));

    for (i, url) in payload.bass_notes().iter().enumerate() {
        assets.extend(AssetReference::new(Audio, BassNote, url, High).map(|a| a.with_index(i)));
    }
    for (i, url) in payload.drum_hits().iter().enumerate() {
        assets.extend(AssetReference::new(Audio, DrumHit, url, Medium).map(|a| a.with_index(i)));
    }
    if let Some(url) = payload.ambience_track() {
        assets.extend(AssetReference::new(Audio, Ambience, url, Low));
    }

    // A url is loaded once; its first reference wins
    let mut seen = HashSet::new();
    assets.retain(|a| seen.insert(a.url().to_string()));

    AssetManifest::new(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::payload::{AudioSamples, LibraryMidi, Synchronization, TutorialMidi};

    fn full_payload() -> WorkflowPayload {
        WorkflowPayload {
            tutorial_specific_midi: Some(TutorialMidi {
                bassline_url: Some("tutorials/t1/bassline.mid".into()),
                chords_url: Some("tutorials/t1/chords.mid".into()),
            }),
            library_midi: Some(LibraryMidi {
                drum_pattern_id: Some("rock-basic".into()),
                metronome_style_id: Some("wood".into()),
            }),
            audio_samples: Some(AudioSamples {
                bass_notes: Some(vec!["samples/e1.wav".into(), "samples/a1.wav".into()]),
                drum_hits: Some(vec!["samples/kick.wav".into()]),
                ambience_track: Some("samples/room.wav".into()),
            }),
            synchronization: Some(Synchronization {
                bpm: Some(90.0),
                time_signature: Some("4/4".into()),
                key_signature: Some("E".into()),
            }),
        }
    }

    #[test]
    fn test_manifest_order() {
        let manifest = build_manifest(&full_payload(), "lib/");
        let urls: Vec<&str> = manifest.assets().iter().map(|a| a.url()).collect();
        assert_eq!(
            urls,
            vec![
                "tutorials/t1/bassline.mid",
                "tutorials/t1/chords.mid",
                "lib/drum-patterns/rock-basic.mid",
                "lib/metronomes/wood.mid",
                "samples/e1.wav",
                "samples/a1.wav",
                "samples/kick.wav",
                "samples/room.wav",
            ]
        );
        assert_eq!(manifest.total_count(), manifest.assets().len());
        assert_eq!(manifest.assets()[5].index(), Some(1));
        assert_eq!(manifest.assets()[7].priority(), AssetPriority::Low);
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let payload = full_payload();
        let a = build_manifest(&payload, "lib");
        let b = build_manifest(&payload, "lib");
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_order_is_stable_by_priority() {
        let manifest = build_manifest(&full_payload(), "lib");
        let order: Vec<AssetCategory> = manifest.load_order().iter().map(|a| a.category()).collect();
        assert_eq!(
            order,
            vec![
                AssetCategory::Bassline,
                AssetCategory::Chords,
                AssetCategory::BassNote,
                AssetCategory::BassNote,
                AssetCategory::DrumPattern,
                AssetCategory::Metronome,
                AssetCategory::DrumHit,
                AssetCategory::Ambience,
            ]
        );
    }

    #[test]
    fn test_missing_metronome_uses_default_style_and_blank_urls_skipped() {
        let mut payload = full_payload();
        payload.library_midi = None;
        if let Some(samples) = payload.audio_samples.as_mut() {
            samples.bass_notes = Some(vec!["".into(), "samples/e1.wav".into()]);
        }
        let manifest = build_manifest(&payload, "");
        assert!(manifest.contains("metronomes/classic.mid"));
        assert!(!manifest.assets().iter().any(|a| a.category() == AssetCategory::DrumPattern));
        assert_eq!(
            manifest
                .assets()
                .iter()
                .filter(|a| a.category() == AssetCategory::BassNote)
                .count(),
            1
        );
    }

    #[test]
    fn test_repeated_url_is_listed_once() {
        let mut payload = full_payload();
        payload.audio_samples = Some(AudioSamples {
            bass_notes: Some(vec!["samples/e1.wav".into(), "samples/e1.wav".into()]),
            drum_hits: Some(vec!["tutorials/t1/bassline.mid".into()]),
            ambience_track: None,
        });
        let manifest = build_manifest(&payload, "lib/");

        let urls: Vec<&str> = manifest.assets().iter().map(|a| a.url()).collect();
        assert_eq!(
            urls,
            vec![
                "tutorials/t1/bassline.mid",
                "tutorials/t1/chords.mid",
                "lib/drum-patterns/rock-basic.mid",
                "lib/metronomes/wood.mid",
                "samples/e1.wav",
            ]
        );
        assert_eq!(manifest.total_count(), 5);
        assert_eq!(manifest.assets()[0].kind(), AssetKind::Bassline);
    }

    #[test]
    fn test_estimated_load_time() {
        let manifest = build_manifest(&full_payload(), "lib");
        // 4 event streams, 3 samples, 1 ambience track
        assert_eq!(manifest.estimated_load_time_ms(), 4 * 50 + 3 * 150 + 500);
    }

    #[test]
    fn test_reference_rejects_empty_url() {
        assert!(AssetReference::new(AssetKind::Audio, AssetCategory::BassNote, " ", AssetPriority::High).is_none());
    }
}
