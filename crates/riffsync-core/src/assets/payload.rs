//! Workflow payload as produced by the content pipeline
//!
//! Every field is optional at this boundary; `validate_payload` decides what
//! is fatal and what falls back to a default.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowPayload {
    pub tutorial_specific_midi: Option<TutorialMidi>,
    pub library_midi: Option<LibraryMidi>,
    pub audio_samples: Option<AudioSamples>,
    pub synchronization: Option<Synchronization>,
}

/// Event streams written for this tutorial
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TutorialMidi {
    pub bassline_url: Option<String>,
    pub chords_url: Option<String>,
}

/// Shared event streams picked from the library by id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryMidi {
    pub drum_pattern_id: Option<String>,
    pub metronome_style_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSamples {
    pub bass_notes: Option<Vec<String>>,
    pub drum_hits: Option<Vec<String>>,
    pub ambience_track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Synchronization {
    pub bpm: Option<f64>,
    pub time_signature: Option<String>,
    pub key_signature: Option<String>,
}

/// Treat "" and whitespace-only strings as absent
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl WorkflowPayload {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn bassline_url(&self) -> Option<&str> {
        self.tutorial_specific_midi
            .as_ref()
            .and_then(|m| non_empty(&m.bassline_url))
    }

    pub fn chords_url(&self) -> Option<&str> {
        self.tutorial_specific_midi
            .as_ref()
            .and_then(|m| non_empty(&m.chords_url))
    }

    pub fn drum_pattern_id(&self) -> Option<&str> {
        self.library_midi
            .as_ref()
            .and_then(|m| non_empty(&m.drum_pattern_id))
    }

    pub fn metronome_style_id(&self) -> Option<&str> {
        self.library_midi
            .as_ref()
            .and_then(|m| non_empty(&m.metronome_style_id))
    }

    pub fn bass_notes(&self) -> &[String] {
        self.audio_samples
            .as_ref()
            .and_then(|s| s.bass_notes.as_deref())
            .unwrap_or(&[])
    }

    pub fn drum_hits(&self) -> &[String] {
        self.audio_samples
            .as_ref()
            .and_then(|s| s.drum_hits.as_deref())
            .unwrap_or(&[])
    }

    pub fn ambience_track(&self) -> Option<&str> {
        self.audio_samples
            .as_ref()
            .and_then(|s| non_empty(&s.ambience_track))
    }

    pub fn bpm(&self) -> Option<f64> {
        self.synchronization.as_ref().and_then(|s| s.bpm)
    }

    pub fn time_signature(&self) -> Option<&str> {
        self.synchronization
            .as_ref()
            .and_then(|s| non_empty(&s.time_signature))
    }

    pub fn key_signature(&self) -> Option<&str> {
        self.synchronization
            .as_ref()
            .and_then(|s| non_empty(&s.key_signature))
    }
}
