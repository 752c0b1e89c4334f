//! Lifecycle phase of the shared audio output

use serde::Serialize;

/// Lifecycle phase of the shared audio output
///
/// ```text
/// Uninitialized ──acquire ok──► Running ◄──resume/suspend──► Suspended
///       │ ▲                        │ ▲                          │
///       └─┘ acquire failed         ▼ │ resume                   │
///                              Interrupted (platform-driven)    │
///                                                               ▼
///                      dispose from any phase ──────────────► Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    #[default]
    Uninitialized,
    Suspended,
    Running,
    Closed,
    Interrupted,
}

impl ResourceState {
    /// Whether the manager may move from `self` to `next`
    pub fn can_transition_to(self, next: ResourceState) -> bool {
        use ResourceState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Uninitialized, Running | Suspended) => true,
            (Suspended, Running) | (Running, Suspended) => true,
            (Running | Suspended, Interrupted) => true,
            (Interrupted, Running | Suspended) => true,
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Suspended => "suspended",
            Self::Running => "running",
            Self::Closed => "closed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
