//! Payload validation
//!
//! Errors make a payload unusable. Warnings name a missing secondary field
//! and the default that replaces it.

use serde::Serialize;

use super::payload::WorkflowPayload;

pub const DEFAULT_METRONOME_STYLE: &str = "classic";
pub const DEFAULT_TIME_SIGNATURE: &str = "4/4";
pub const DEFAULT_KEY_SIGNATURE: &str = "C";

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Tempo and signatures for a session, with defaults filled in
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub bpm: f64,
    pub time_signature: String,
    pub key_signature: String,
    pub metronome_style: String,
}

impl SessionSettings {
    /// Resolve from a payload; `fallback_bpm` covers a missing or invalid tempo
    pub fn resolve(payload: &WorkflowPayload, fallback_bpm: f64) -> Self {
        Self {
            bpm: payload
                .bpm()
                .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
                .unwrap_or(fallback_bpm),
            time_signature: payload
                .time_signature()
                .unwrap_or(DEFAULT_TIME_SIGNATURE)
                .to_string(),
            key_signature: payload
                .key_signature()
                .unwrap_or(DEFAULT_KEY_SIGNATURE)
                .to_string(),
            metronome_style: payload
                .metronome_style_id()
                .unwrap_or(DEFAULT_METRONOME_STYLE)
                .to_string(),
        }
    }
}

pub fn validate_payload(payload: &WorkflowPayload) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if payload.bassline_url().is_none() {
        errors.push("Missing tutorial bassline URL (tutorialSpecificMidi.basslineUrl)".to_string());
    }
    if payload.chords_url().is_none() {
        errors.push("Missing tutorial chords URL (tutorialSpecificMidi.chordsUrl)".to_string());
    }

    let bass_notes = payload.bass_notes();
    let usable_bass_notes = bass_notes.iter().filter(|u| !u.trim().is_empty()).count();
    if usable_bass_notes == 0 {
        errors.push("Missing bass samples (audioSamples.bassNotes must list at least one URL)".to_string());
    } else if usable_bass_notes < bass_notes.len() {
        warnings.push(format!(
            "Skipping {} blank bass sample URL(s)",
            bass_notes.len() - usable_bass_notes
        ));
    }

    match payload.bpm() {
        None => errors.push("Missing tempo (synchronization.bpm)".to_string()),
        Some(bpm) if !bpm.is_finite() || bpm <= 0.0 => {
            errors.push(format!("Invalid tempo {} (synchronization.bpm must be positive)", bpm))
        }
        Some(_) => {}
    }

    if payload.metronome_style_id().is_none() {
        warnings.push(format!(
            "Missing metronome style (libraryMidi.metronomeStyleId); using \"{}\"",
            DEFAULT_METRONOME_STYLE
        ));
    }
    if payload.drum_pattern_id().is_none() {
        warnings.push("Missing drum pattern (libraryMidi.drumPatternId); playing without library drums".to_string());
    }
    if payload.drum_hits().iter().all(|u| u.trim().is_empty()) {
        warnings.push("No drum hit samples (audioSamples.drumHits)".to_string());
    }
    if payload.time_signature().is_none() {
        warnings.push(format!(
            "Missing time signature (synchronization.timeSignature); using {}",
            DEFAULT_TIME_SIGNATURE
        ));
    }
    if payload.key_signature().is_none() {
        warnings.push(format!(
            "Missing key signature (synchronization.keySignature); using {}",
            DEFAULT_KEY_SIGNATURE
        ));
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}
