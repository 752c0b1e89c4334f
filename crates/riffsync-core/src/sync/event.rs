//! Events broadcast to widgets

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::audio::{ResourceError, ResourceState};

/// Subscribable event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PlaybackState,
    TimelineUpdate,
    ExerciseChange,
    TempoChange,
    PitchChange,
    VolumeChange,
    SourceChange,
    ResourceState,
    ResourceError,
    LoadProgress,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::PlaybackState,
        EventType::TimelineUpdate,
        EventType::ExerciseChange,
        EventType::TempoChange,
        EventType::PitchChange,
        EventType::VolumeChange,
        EventType::SourceChange,
        EventType::ResourceState,
        EventType::ResourceError,
        EventType::LoadProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PlaybackState => "PLAYBACK_STATE",
            EventType::TimelineUpdate => "TIMELINE_UPDATE",
            EventType::ExerciseChange => "EXERCISE_CHANGE",
            EventType::TempoChange => "TEMPO_CHANGE",
            EventType::PitchChange => "PITCH_CHANGE",
            EventType::VolumeChange => "VOLUME_CHANGE",
            EventType::SourceChange => "SOURCE_CHANGE",
            EventType::ResourceState => "RESOURCE_STATE",
            EventType::ResourceError => "RESOURCE_ERROR",
            EventType::LoadProgress => "LOAD_PROGRESS",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    /// Bypasses subscriber throttling (stop, errors)
    High,
}

/// What changed on a mixable source
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceChangeKind {
    Registered,
    Unregistered,
    Muted { muted: bool },
    Solo { solo: bool },
    Pan { pan: f32 },
}

/// Summary of the workflow that was just loaded
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseInfo {
    pub bpm: f64,
    pub time_signature: String,
    pub key_signature: String,
    pub asset_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    PlaybackState { is_playing: bool },
    #[serde(rename_all = "camelCase")]
    TimelineUpdate { current_time_ms: f64 },
    ExerciseChange(ExerciseInfo),
    TempoChange { bpm: f64 },
    PitchChange { semitones: f32 },
    #[serde(rename_all = "camelCase")]
    VolumeChange { source_id: String, volume: f32 },
    #[serde(rename_all = "camelCase")]
    SourceChange { source_id: String, change: SourceChangeKind },
    ResourceState { state: ResourceState },
    ResourceError(ResourceError),
    LoadProgress { loaded: usize, total: usize, percent: f64 },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::PlaybackState { .. } => EventType::PlaybackState,
            EventPayload::TimelineUpdate { .. } => EventType::TimelineUpdate,
            EventPayload::ExerciseChange(_) => EventType::ExerciseChange,
            EventPayload::TempoChange { .. } => EventType::TempoChange,
            EventPayload::PitchChange { .. } => EventType::PitchChange,
            EventPayload::VolumeChange { .. } => EventType::VolumeChange,
            EventPayload::SourceChange { .. } => EventType::SourceChange,
            EventPayload::ResourceState { .. } => EventType::ResourceState,
            EventPayload::ResourceError(_) => EventType::ResourceError,
            EventPayload::LoadProgress { .. } => EventType::LoadProgress,
        }
    }
}

/// One broadcast unit on the bus
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    /// Milliseconds since the Unix epoch; clamped by the bus so it never goes
    /// backwards for one source
    pub timestamp_ms: u64,
    pub source_id: String,
    pub priority: EventPriority,
}

impl SyncEvent {
    pub fn new(source_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp_ms: now_ms(),
            source_id: source_id.into(),
            priority: EventPriority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority == EventPriority::High
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_follows_payload() {
        let event = SyncEvent::new("engine", EventPayload::TempoChange { bpm: 90.0 });
        assert_eq!(event.event_type(), EventType::TempoChange);
        assert_eq!(event.priority, EventPriority::Normal);
        assert!(event.timestamp_ms > 0);
    }

    #[test]
    fn test_wire_shape_for_widgets() {
        let event = SyncEvent::new("engine", EventPayload::PlaybackState { is_playing: true })
            .with_timestamp(5)
            .with_priority(EventPriority::High);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PLAYBACK_STATE");
        assert_eq!(json["payload"]["isPlaying"], true);
        assert_eq!(json["timestampMs"], 5);
        assert_eq!(json["sourceId"], "engine");
        assert_eq!(json["priority"], "high");
    }

    #[test]
    fn test_volume_change_fields_are_camel_case() {
        let payload = EventPayload::VolumeChange {
            source_id: "bass-1".into(),
            volume: 0.5,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["payload"]["sourceId"], "bass-1");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }
}
