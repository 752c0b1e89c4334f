//! Typed publish/subscribe bus for widgets
//!
//! Delivery is synchronous: `emit` snapshots the subscribers of the event's
//! type, releases the registry lock, then calls each handler inside
//! `catch_unwind`. A panicking widget is logged and skipped; the others still
//! see the event, and handlers may subscribe or unsubscribe from inside their
//! own invocation.
//!
//! Throttled subscriptions park events in a one-slot trailing-edge throttle.
//! With a tokio runtime available, a timer task flushes each window; without
//! one, `flush_throttled()` does it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::event::{EventType, SyncEvent};
use super::metrics::{BusMetrics, PerformanceSample};
use super::throttle::{Offer, Throttle};
use crate::observer::panic_message;

pub type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bus tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Window used by `SubscribeOptions::throttled()` (16ms = 60Hz)
    pub default_throttle_ms: u64,
    /// Deliveries averaged in `average_latency_ms`
    pub latency_window: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_throttle_ms: 16,
            latency_window: 100,
        }
    }
}

/// Per-subscription delivery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeOptions {
    /// None = every event; Some(None) = bus default window
    throttle: Option<Option<u64>>,
}

impl SubscribeOptions {
    /// Coalesce to one delivery per default window
    pub fn throttled() -> Self {
        Self {
            throttle: Some(None),
        }
    }

    /// Coalesce to one delivery per `ms` (0 disables throttling)
    pub fn throttle_ms(ms: u64) -> Self {
        if ms == 0 {
            Self::default()
        } else {
            Self {
                throttle: Some(Some(ms)),
            }
        }
    }
}

/// Returned by `subscribe`; pass to `unsubscribe_handle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub event_type: EventType,
    id: u64,
}

struct Subscriber {
    id: u64,
    handler: Handler,
    throttle: Option<Throttle>,
    active: AtomicBool,
}

impl Subscriber {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(throttle) = &self.throttle {
            throttle.take();
        }
    }
}

struct BusInner {
    config: BusConfig,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<EventType, Vec<Arc<Subscriber>>>>,
    metrics: Mutex<BusMetrics>,
    /// Last timestamp per source, for the non-decreasing guarantee
    last_timestamps: Mutex<HashMap<String, u64>>,
}

/// Shared by reference across widgets; clones point at the same bus
#[derive(Clone)]
pub struct SyncBus {
    inner: Arc<BusInner>,
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl SyncBus {
    pub fn new(config: BusConfig) -> Self {
        let metrics = BusMetrics::new(config.latency_window);
        Self {
            inner: Arc::new(BusInner {
                config,
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
                metrics: Mutex::new(metrics),
                last_timestamps: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Register `handler` for `event_type`, delivering every event
    ///
    /// Registering the same handler (same `Arc`) twice for one type is a
    /// no-op that returns the original handle.
    pub fn subscribe(&self, event_type: EventType, handler: Handler) -> SubscriptionHandle {
        self.subscribe_with(event_type, handler, SubscribeOptions::default())
    }

    pub fn subscribe_with(
        &self,
        event_type: EventType,
        handler: Handler,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        let mut subscribers = lock(&self.inner.subscribers);
        let list = subscribers.entry(event_type).or_default();
        if let Some(existing) = list.iter().find(|s| same_handler(&s.handler, &handler)) {
            return SubscriptionHandle {
                event_type,
                id: existing.id,
            };
        }

        let throttle = options.throttle.map(|window| {
            let ms = window.unwrap_or(self.inner.config.default_throttle_ms).max(1);
            Throttle::new(Duration::from_millis(ms))
        });
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        list.push(Arc::new(Subscriber {
            id,
            handler,
            throttle,
            active: AtomicBool::new(true),
        }));
        log::debug!("[BUS] Subscribed #{} to {}", id, event_type);
        SubscriptionHandle { event_type, id }
    }

    /// Convenience for closures; every call registers a new subscription
    pub fn on<F>(&self, event_type: EventType, handler: F) -> SubscriptionHandle
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(handler))
    }

    /// Forward events of `event_type` into a bounded channel for a widget
    /// running on its own thread. A full channel drops the event and counts it.
    pub fn subscribe_channel(
        &self,
        event_type: EventType,
        capacity: usize,
    ) -> (SubscriptionHandle, crossbeam::channel::Receiver<SyncEvent>) {
        let (tx, rx) = crossbeam::channel::bounded(capacity.max(1));
        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        let handler: Handler = Arc::new(move |event: &SyncEvent| {
            if tx.try_send(event.clone()).is_err() {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner.metrics).record_dropped(1);
                }
            }
        });
        (self.subscribe(event_type, handler), rx)
    }

    /// Remove `handler` from `event_type`; false if it was not registered
    pub fn unsubscribe(&self, event_type: EventType, handler: &Handler) -> bool {
        self.remove_where(event_type, |s| same_handler(&s.handler, handler))
    }

    pub fn unsubscribe_handle(&self, handle: SubscriptionHandle) -> bool {
        self.remove_where(handle.event_type, |s| s.id == handle.id)
    }

    fn remove_where(&self, event_type: EventType, matches: impl Fn(&Subscriber) -> bool) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let Some(list) = subscribers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| {
            if matches(s) {
                s.deactivate();
                false
            } else {
                true
            }
        });
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&event_type);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).values().map(Vec::len).sum()
    }

    /// Deliver `event` to every subscriber of its type
    pub fn emit(&self, mut event: SyncEvent) {
        let emitted_at = Instant::now();
        {
            let mut last = lock(&self.inner.last_timestamps);
            let previous = last.entry(event.source_id.clone()).or_insert(0);
            if event.timestamp_ms < *previous {
                event.timestamp_ms = *previous;
            }
            *previous = event.timestamp_ms;
        }
        lock(&self.inner.metrics).record_event();

        let event_type = event.event_type();
        let snapshot: Vec<Arc<Subscriber>> = lock(&self.inner.subscribers)
            .get(&event_type)
            .cloned()
            .unwrap_or_default();

        for subscriber in snapshot {
            if !subscriber.is_active() {
                continue;
            }
            match &subscriber.throttle {
                Some(throttle) if !event.is_high_priority() => {
                    match throttle.offer(event.clone(), emitted_at) {
                        Offer::Opened { window } => {
                            self.schedule_flush(&subscriber, throttle.window(), window)
                        }
                        Offer::Superseded => lock(&self.inner.metrics).record_dropped(1),
                    }
                }
                Some(throttle) => {
                    // Delivering the parked value after this one would reorder
                    if throttle.take().is_some() {
                        lock(&self.inner.metrics).record_dropped(1);
                    }
                    self.inner.deliver(&subscriber, &event, emitted_at);
                }
                None => self.inner.deliver(&subscriber, &event, emitted_at),
            }
        }
    }

    fn schedule_flush(&self, subscriber: &Arc<Subscriber>, delay: Duration, window: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let subscriber = Arc::clone(subscriber);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.flush_window(&subscriber, window);
            }
        });
    }

    /// Deliver every parked throttled event now; returns how many were delivered
    pub fn flush_throttled(&self) -> usize {
        let all: Vec<Arc<Subscriber>> = lock(&self.inner.subscribers)
            .values()
            .flatten()
            .filter(|s| s.throttle.is_some())
            .cloned()
            .collect();
        all.iter().filter(|s| self.inner.flush_one(s)).count()
    }

    pub fn performance_metrics(&self) -> PerformanceSample {
        let subscriber_count = self.subscriber_count();
        lock(&self.inner.metrics).snapshot(subscriber_count)
    }

    /// Zero the counters; subscriptions are untouched
    pub fn reset_metrics(&self) {
        lock(&self.inner.metrics).reset();
    }

    /// Remove every subscription. Safe to call repeatedly.
    pub fn dispose(&self) {
        let drained: Vec<Arc<Subscriber>> = lock(&self.inner.subscribers)
            .drain()
            .flat_map(|(_, list)| list)
            .collect();
        if !drained.is_empty() {
            log::debug!("[BUS] Disposed {} subscriptions", drained.len());
        }
        for subscriber in drained {
            subscriber.deactivate();
        }
    }
}

impl BusInner {
    fn flush_one(&self, subscriber: &Subscriber) -> bool {
        if !subscriber.is_active() {
            return false;
        }
        let parked = subscriber.throttle.as_ref().and_then(Throttle::take);
        match parked {
            Some(parked) => {
                self.deliver(subscriber, &parked.event, parked.emitted_at);
                true
            }
            None => false,
        }
    }

    /// Timer-driven flush; a no-op once `window` was closed early
    fn flush_window(&self, subscriber: &Subscriber, window: u64) {
        if !subscriber.is_active() {
            return;
        }
        let parked = subscriber
            .throttle
            .as_ref()
            .and_then(|throttle| throttle.take_window(window));
        if let Some(parked) = parked {
            self.deliver(subscriber, &parked.event, parked.emitted_at);
        }
    }

    fn deliver(&self, subscriber: &Subscriber, event: &SyncEvent, emitted_at: Instant) {
        let handler = &subscriber.handler;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
            log::error!(
                "[BUS] Subscriber #{} panicked on {}: {}",
                subscriber.id,
                event.event_type(),
                panic_message(payload.as_ref())
            );
        }
        lock(&self.metrics).record_latency(emitted_at.elapsed());
    }
}
