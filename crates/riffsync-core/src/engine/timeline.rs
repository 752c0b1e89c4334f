//! TIMELINE_UPDATE ticker
//!
//! While the engine is playing a tokio task publishes the playhead every
//! `timeline_interval_ms`. `stop()` guarantees that no update is delivered
//! after it returns: it clears the active flag and then waits out a tick that
//! may be mid-emit on another worker.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::renderer::TransportAtomics;
use crate::sync::{EventPayload, SyncBus, SyncEvent};

thread_local! {
    /// Set while this thread is delivering a timeline update
    static IN_TICK: Cell<bool> = const { Cell::new(false) };
}

struct Gate {
    active: AtomicBool,
    emitting: Mutex<()>,
}

pub(crate) struct TimelineTicker {
    gate: Arc<Gate>,
    task: Option<JoinHandle<()>>,
}

impl TimelineTicker {
    /// Start ticking on the current tokio runtime. Returns None (no timeline
    /// updates) when called outside one.
    pub fn start(
        bus: SyncBus,
        transport: Arc<TransportAtomics>,
        source_id: String,
        interval: Duration,
    ) -> Option<Self> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::debug!("[ENGINE] No tokio runtime; timeline updates disabled");
                return None;
            }
        };

        let gate = Arc::new(Gate {
            active: AtomicBool::new(true),
            emitting: Mutex::new(()),
        });
        let task_gate = Arc::clone(&gate);
        let interval = interval.max(Duration::from_millis(1));

        let task = handle.spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if !task_gate.active.load(Ordering::SeqCst) {
                    break;
                }
                let _emitting = task_gate
                    .emitting
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if !task_gate.active.load(Ordering::SeqCst) {
                    break;
                }
                let event = SyncEvent::new(
                    source_id.clone(),
                    EventPayload::TimelineUpdate {
                        current_time_ms: transport.position_ms(),
                    },
                );
                IN_TICK.with(|t| t.set(true));
                bus.emit(event);
                IN_TICK.with(|t| t.set(false));
            }
        });

        Some(Self {
            gate,
            task: Some(task),
        })
    }

    /// Stop ticking. No update is delivered after this returns, except when
    /// called from inside a timeline handler (which is itself the last one).
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.gate.active.store(false, Ordering::SeqCst);
        if !IN_TICK.with(|t| t.get()) {
            drop(
                self.gate
                    .emitting
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TimelineTicker {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::EventType;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let bus = SyncBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        bus.on(EventType::TimelineUpdate, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let transport = Arc::new(TransportAtomics::new(48000));
        let ticker =
            TimelineTicker::start(bus.clone(), transport, "engine".into(), Duration::from_millis(5))
                .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        ticker.stop();

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_no_runtime_no_ticker() {
        let ticker = TimelineTicker::start(
            SyncBus::default(),
            Arc::new(TransportAtomics::default()),
            "engine".into(),
            Duration::from_millis(16),
        );
        assert!(ticker.is_none());
    }
}
