//! Per-subscription coalescing
//!
//! Trailing-edge: the first event of a window is parked, later events in the
//! same window replace it, and whatever is parked when the window closes is
//! delivered. A window therefore yields at most one delivery, always the
//! latest value. Nothing queues beyond a single slot.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::event::SyncEvent;

/// Result of offering an event to a throttle
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Parked as the first event of a new window; the caller must schedule a
    /// flush of `window` after `window()`
    Opened { window: u64 },
    /// Replaced the parked event, which is now dropped
    Superseded,
}

#[derive(Debug)]
pub(crate) struct Parked {
    pub event: SyncEvent,
    pub emitted_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    parked: Option<Parked>,
    /// Counts opened windows; a timer only closes the window it was scheduled for
    window: u64,
}

#[derive(Debug)]
pub(crate) struct Throttle {
    window: Duration,
    slot: Mutex<Slot>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn offer(&self, event: SyncEvent, emitted_at: Instant) -> Offer {
        let mut slot = self.slot();
        let offer = if slot.parked.is_some() {
            Offer::Superseded
        } else {
            slot.window += 1;
            Offer::Opened { window: slot.window }
        };
        slot.parked = Some(Parked { event, emitted_at });
        offer
    }

    /// Take the parked event, closing the current window
    pub fn take(&self) -> Option<Parked> {
        self.slot().parked.take()
    }

    /// Take the parked event only if `window` is still the open window
    pub fn take_window(&self, window: u64) -> Option<Parked> {
        let mut slot = self.slot();
        if slot.window != window {
            return None;
        }
        slot.parked.take()
    }

    pub fn has_parked(&self) -> bool {
        self.slot().parked.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::event::EventPayload;

    fn tick(ms: f64) -> SyncEvent {
        SyncEvent::new("engine", EventPayload::TimelineUpdate { current_time_ms: ms })
    }

    #[test]
    fn test_latest_value_wins() {
        let throttle = Throttle::new(Duration::from_millis(16));
        let now = Instant::now();
        assert_eq!(throttle.offer(tick(1.0), now), Offer::Opened { window: 1 });
        assert_eq!(throttle.offer(tick(2.0), now), Offer::Superseded);
        assert_eq!(throttle.offer(tick(3.0), now), Offer::Superseded);

        let parked = throttle.take().unwrap();
        assert_eq!(parked.event.payload, EventPayload::TimelineUpdate { current_time_ms: 3.0 });
        assert!(!throttle.has_parked());
    }

    #[test]
    fn test_take_opens_new_window() {
        let throttle = Throttle::new(Duration::from_millis(16));
        throttle.offer(tick(1.0), Instant::now());
        throttle.take();
        assert_eq!(throttle.offer(tick(2.0), Instant::now()), Offer::Opened { window: 2 });
    }

    #[test]
    fn test_closed_window_cannot_take_later_window() {
        let throttle = Throttle::new(Duration::from_millis(16));
        let Offer::Opened { window: first } = throttle.offer(tick(1.0), Instant::now()) else {
            panic!("first offer opens a window");
        };
        throttle.take();
        let Offer::Opened { window: second } = throttle.offer(tick(2.0), Instant::now()) else {
            panic!("offer after take opens a window");
        };

        assert!(throttle.take_window(first).is_none());
        assert!(throttle.has_parked());
        let parked = throttle.take_window(second).unwrap();
        assert_eq!(parked.event.payload, EventPayload::TimelineUpdate { current_time_ms: 2.0 });
    }
}
