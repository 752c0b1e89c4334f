//! Bus health accounting

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Snapshot of bus health
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub total_events: u64,
    /// Mean emit-to-handle time over the most recent deliveries
    pub average_latency_ms: f64,
    pub dropped_updates: u64,
    pub subscriber_count: usize,
}

/// Counters plus a fixed-size window of delivery latencies
#[derive(Debug)]
pub(crate) struct BusMetrics {
    total_events: u64,
    dropped_updates: u64,
    latencies_ms: VecDeque<f64>,
    latency_sum_ms: f64,
    window: usize,
}

impl BusMetrics {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            total_events: 0,
            dropped_updates: 0,
            latencies_ms: VecDeque::with_capacity(window),
            latency_sum_ms: 0.0,
            window,
        }
    }

    pub fn record_event(&mut self) {
        self.total_events += 1;
    }

    pub fn record_dropped(&mut self, count: u64) {
        self.dropped_updates += count;
    }

    pub fn record_latency(&mut self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        if self.latencies_ms.len() == self.window {
            if let Some(oldest) = self.latencies_ms.pop_front() {
                self.latency_sum_ms -= oldest;
            }
        }
        self.latencies_ms.push_back(ms);
        self.latency_sum_ms += ms;
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            0.0
        } else {
            (self.latency_sum_ms / self.latencies_ms.len() as f64).max(0.0)
        }
    }

    pub fn snapshot(&self, subscriber_count: usize) -> PerformanceSample {
        PerformanceSample {
            total_events: self.total_events,
            average_latency_ms: self.average_latency_ms(),
            dropped_updates: self.dropped_updates,
            subscriber_count,
        }
    }

    pub fn reset(&mut self) {
        self.total_events = 0;
        self.dropped_updates = 0;
        self.latencies_ms.clear();
        self.latency_sum_ms = 0.0;
    }
}
