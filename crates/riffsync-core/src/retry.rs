//! Retry strategy for fallible acquisitions and asset fetches
//!
//! Both the resource manager (output acquisition) and the engine's asset
//! loader take a `RetryPolicy` instead of hard-coding their own loops.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay curve between attempts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// `base_ms * factor^(retry-1)`, capped at `max_ms`
    Exponential { base_ms: u64, factor: f64, max_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base_ms: 100,
            factor: 2.0,
            max_ms: 2_000,
        }
    }
}

/// How many times to try an operation and how long to wait in between
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (0 is treated as 1)
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// First attempt plus `retries` more, with the default exponential curve
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Effective number of attempts (never zero)
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let retry = attempt - 1;
        let ms = match self.backoff {
            Backoff::None => 0,
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential {
                base_ms,
                factor,
                max_ms,
            } => {
                let scaled = base_ms as f64 * factor.max(1.0).powi(retry as i32 - 1);
                if scaled.is_finite() {
                    (scaled as u64).min(max_ms)
                } else {
                    max_ms
                }
            }
        };
        Duration::from_millis(ms)
    }
}
