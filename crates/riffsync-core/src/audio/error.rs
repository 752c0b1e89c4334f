//! Audio output error types
//!
//! Two layers:
//! - `AudioError`: what a backend reports (device lookup, stream build, ...)
//! - `ResourceError`: what leaves the resource manager. Categorized by kind and
//!   sanitized so UI-facing error displays never see paths, line numbers or
//!   stack frames.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Errors reported by output backends
#[derive(Error, Debug, Clone)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio output device found")]
    NoDevices,

    /// Configured device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Failed to pause stream
    #[error("Failed to pause audio stream: {0}")]
    StreamPauseError(String),

    /// Backend not compiled in or not available on this platform
    #[error("Audio backend not supported: {0}")]
    Unsupported(String),

    /// The backend's control thread went away
    #[error("Audio output thread stopped: {0}")]
    ThreadGone(String),
}

pub type AudioResult<T> = Result<T, AudioError>;

/// Category of a resource failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceErrorKind {
    /// The platform has no usable audio output
    Unsupported,
    /// Device/hardware failure
    Hardware,
    /// The platform refused access (autoplay policy, permissions)
    Permission,
    Unknown,
}

impl ResourceErrorKind {
    /// Classify a raw failure message
    ///
    /// Checked in order: unsupported, permission, hardware.
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("not supported")
            || lower.contains("unsupported")
            || lower.contains("undefined")
        {
            Self::Unsupported
        } else if lower.contains("permission") || lower.contains("access") {
            Self::Permission
        } else if lower.contains("hardware") || lower.contains("device") {
            Self::Hardware
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for ResourceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported"),
            Self::Hardware => write!(f, "hardware"),
            Self::Permission => write!(f, "permission"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Categorized, sanitized failure of the shared audio output
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind} audio error: {message}")]
pub struct ResourceError {
    pub kind: ResourceErrorKind,
    pub message: String,
}

impl ResourceError {
    /// Build from an untrusted message: classify first, then sanitize
    pub fn from_raw(raw: &str) -> Self {
        Self {
            kind: ResourceErrorKind::classify(raw),
            message: sanitize_message(raw),
        }
    }

    /// Build with an explicit kind (message is still sanitized)
    pub fn new(kind: ResourceErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: sanitize_message(message),
        }
    }
}

impl From<AudioError> for ResourceError {
    fn from(err: AudioError) -> Self {
        let kind = match &err {
            AudioError::Unsupported(_) => ResourceErrorKind::Unsupported,
            AudioError::NoDevices | AudioError::DeviceNotFound(_) => ResourceErrorKind::Hardware,
            other => ResourceErrorKind::classify(&other.to_string()),
        };
        Self::new(kind, &err.to_string())
    }
}

const FALLBACK_MESSAGE: &str = "Audio output error";

fn stack_frame_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // "    at foo (file.js:1:2)", "  0: module::fn", "stack backtrace:"
            Regex::new(r"^\s*(at\s|\d+:\s|stack backtrace:)").ok()
        })
        .as_ref()
}

fn path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // Absolute/relative paths and URLs, with optional :line:col suffix
            Regex::new(
                r"(?x)
                (?:[a-zA-Z][a-zA-Z0-9+.-]*://\S+)          # scheme://...
                | (?:[A-Za-z]:)?(?:[\\/][^\s\\/:()]+)+(?::\d+)*   # /usr/x.js:1:2 or C:\x
                | \b[\w.-]+\.[A-Za-z]{1,5}:\d+(?::\d+)?\b   # index.js:42:7
                | :\d+:\d+\b                                # dangling :line:col
                ",
            )
            .ok()
        })
        .as_ref()
}

/// Strip file paths, line:column references and stack frames
///
/// Falls back to a generic message if the patterns are unavailable, so raw
/// paths never reach subscribers.
pub fn sanitize_message(raw: &str) -> String {
    let (Some(frames), Some(paths)) = (stack_frame_pattern(), path_pattern()) else {
        log::warn!("[RESOURCE] Message patterns unavailable, using generic error text");
        return FALLBACK_MESSAGE.to_string();
    };
    let first_lines: Vec<&str> = raw
        .lines()
        .filter(|line| !frames.is_match(line))
        .collect();
    let joined = first_lines.join(" ");
    let stripped = paths.replace_all(&joined, "");

    let collapsed = stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("()", "")
        .replace(" ,", ",");
    let cleaned = collapsed
        .trim()
        .trim_end_matches([':', ',', '(', '-', ' '])
        .trim();

    if cleaned.is_empty() {
        FALLBACK_MESSAGE.to_string()
    } else {
        cleaned.to_string()
    }
}
