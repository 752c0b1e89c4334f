//! Lifecycle manager for the single shared audio output
//!
//! # Acquisition
//!
//! `initialize()` is memoized: the first caller spawns one acquisition task
//! and parks a `watch` receiver in the pending slot. Every concurrent caller
//! clones that receiver and awaits the same outcome, so the backend is opened
//! at most once per attempt even if callers are cancelled midway.
//!
//! ```text
//!  initialize() ─┐
//!  initialize() ─┼──► pending slot ──► [acquisition task] ──► backend.open()
//!  initialize() ─┘        ▲                   │               (spawn_blocking)
//!                         └──── outcome ◄─────┘
//! ```
//!
//! # Locking
//!
//! Lock order is `pending → state` and `stream → state`. Observers are always
//! notified after every lock is released, so an observer may call back into
//! the manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;

use super::backend::{
    OutputBackend, OutputClock, OutputStream, RenderCallback, StreamEvent, StreamEventSink,
    StreamRequest,
};
use super::config::ResourceConfig;
use super::error::{AudioError, ResourceError, ResourceErrorKind};
use super::state::ResourceState;
use crate::observer::{ObserverRegistry, ObserverToken};
use crate::types::StereoSample;

type Outcome = Option<Result<(), ResourceError>>;
type RenderSlot = Arc<Mutex<Option<RenderCallback>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn disposed_error() -> ResourceError {
    ResourceError::new(ResourceErrorKind::Unknown, "Audio output has been disposed")
}

/// Owns the platform audio output for one session
pub struct ResourceManager {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn OutputBackend>,
    config: ResourceConfig,
    state: Mutex<ResourceState>,
    stream: Mutex<Option<Box<dyn OutputStream>>>,
    pending: Mutex<Option<watch::Receiver<Outcome>>>,
    clock: Arc<OutputClock>,
    render: RenderSlot,
    state_observers: ObserverRegistry<ResourceState>,
    error_observers: ObserverRegistry<ResourceError>,
    /// Number of times `backend.open` has been called
    acquisitions: AtomicUsize,
}

enum Entry {
    Ready,
    Resume,
    Closed,
    Wait(watch::Receiver<Outcome>),
}

impl ResourceManager {
    pub fn new(backend: Arc<dyn OutputBackend>, config: ResourceConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                state: Mutex::new(ResourceState::Uninitialized),
                stream: Mutex::new(None),
                pending: Mutex::new(None),
                clock: Arc::new(OutputClock::new()),
                render: Arc::new(Mutex::new(None)),
                state_observers: ObserverRegistry::new("[RESOURCE] state-change"),
                error_observers: ObserverRegistry::new("[RESOURCE] error"),
                acquisitions: AtomicUsize::new(0),
            }),
        }
    }

    /// Build the backend named in `config.backend`
    pub fn from_config(config: ResourceConfig) -> Self {
        let backend = super::backend::build_backend(config.backend);
        Self::new(backend, config)
    }

    pub fn state(&self) -> ResourceState {
        *lock(&self.shared.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ResourceState::Running
    }

    pub fn backend_name(&self) -> &'static str {
        self.shared.backend.name()
    }

    /// How many times the platform output has been opened
    pub fn acquisition_count(&self) -> usize {
        self.shared.acquisitions.load(Ordering::SeqCst)
    }

    /// Acquire the output. Call from (or causally after) a user gesture.
    ///
    /// Returns immediately when already running. Concurrent callers share a
    /// single acquisition. On failure the manager stays `Uninitialized` and a
    /// later call retries.
    pub async fn initialize(&self) -> Result<(), ResourceError> {
        match self.enter() {
            Entry::Ready => Ok(()),
            Entry::Closed => Err(disposed_error()),
            Entry::Resume => self.resume().await,
            Entry::Wait(mut rx) => {
                let outcome = match rx.wait_for(Option::is_some).await {
                    Ok(outcome) => outcome.clone(),
                    Err(_) => None,
                };
                outcome.unwrap_or_else(|| {
                    Err(ResourceError::new(
                        ResourceErrorKind::Unknown,
                        "Audio initialization was abandoned",
                    ))
                })
            }
        }
    }

    /// Join the in-flight acquisition or decide what `initialize` should do
    fn enter(&self) -> Entry {
        let mut pending = lock(&self.shared.pending);
        if let Some(rx) = pending.as_ref() {
            return Entry::Wait(rx.clone());
        }
        match *lock(&self.shared.state) {
            ResourceState::Running => Entry::Ready,
            ResourceState::Closed => Entry::Closed,
            ResourceState::Suspended | ResourceState::Interrupted => Entry::Resume,
            ResourceState::Uninitialized => {
                let (tx, rx) = watch::channel(None);
                *pending = Some(rx.clone());
                tokio::spawn(Shared::acquire(Arc::clone(&self.shared), tx));
                Entry::Wait(rx)
            }
        }
    }

    /// Resume a suspended or interrupted output. No-op in any other state.
    ///
    /// Failures are reported to error observers and returned.
    pub async fn resume(&self) -> Result<(), ResourceError> {
        Shared::resume(&self.shared).await
    }

    /// Suspend a running output. Best-effort: failures are logged only.
    pub async fn suspend(&self) {
        if self.state() != ResourceState::Running {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let result = tokio::task::spawn_blocking(move || shared.with_stream(|s| s.suspend())).await;
        match result {
            Ok(Some(Ok(()))) => {
                self.shared.transition(ResourceState::Suspended);
            }
            Ok(None) => {}
            Ok(Some(Err(e))) => log::warn!("[RESOURCE] Suspend failed (ignored): {}", e),
            Err(e) => log::warn!("[RESOURCE] Suspend task failed (ignored): {}", e),
        }
    }

    /// Release the output and move to `Closed`. Safe to call repeatedly.
    pub fn dispose(&self) {
        let taken = {
            let mut stream = lock(&self.shared.stream);
            let mut state = lock(&self.shared.state);
            if *state == ResourceState::Closed {
                return;
            }
            *state = ResourceState::Closed;
            stream.take()
        };

        if let Some(mut stream) = taken {
            stream.close();
        }
        lock(&self.shared.render).take();
        log::info!("[RESOURCE] Audio output disposed");

        self.shared.state_observers.notify(&ResourceState::Closed);
        self.shared.state_observers.clear();
        self.shared.error_observers.clear();
    }

    /// Milliseconds of audio rendered by the current stream; 0 when no
    /// stream is held
    pub fn current_time_ms(&self) -> f64 {
        if lock(&self.shared.stream).is_none() {
            return 0.0;
        }
        self.shared.clock.elapsed_ms()
    }

    /// Sample rate of the open stream, if any
    pub fn sample_rate(&self) -> Option<u32> {
        lock(&self.shared.stream).as_ref().map(|s| s.sample_rate())
    }

    /// Shared clock advanced by the audio thread
    pub fn clock(&self) -> Arc<OutputClock> {
        Arc::clone(&self.shared.clock)
    }

    /// Install the callback that fills output blocks. Until one is set (or
    /// while it is being swapped) the output renders silence.
    pub fn set_render_callback(&self, render: RenderCallback) {
        *lock(&self.shared.render) = Some(render);
    }

    pub fn on_state_change<F>(&self, observer: F) -> ObserverToken
    where
        F: Fn(&ResourceState) + Send + Sync + 'static,
    {
        self.shared.state_observers.register(observer)
    }

    pub fn on_error<F>(&self, observer: F) -> ObserverToken
    where
        F: Fn(&ResourceError) + Send + Sync + 'static,
    {
        self.shared.error_observers.register(observer)
    }

    /// Remove a state or error observer. Returns false if it was already gone.
    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        self.shared.state_observers.unregister(token) || self.shared.error_observers.unregister(token)
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn state(&self) -> ResourceState {
        *lock(&self.state)
    }

    /// Apply a legal transition and notify; returns false if refused
    fn transition(&self, next: ResourceState) -> bool {
        {
            let mut state = lock(&self.state);
            if *state == next || !state.can_transition_to(next) {
                return false;
            }
            log::debug!("[RESOURCE] {} -> {}", *state, next);
            *state = next;
        }
        self.state_observers.notify(&next);
        true
    }

    fn report(&self, error: &ResourceError) {
        log::error!("[RESOURCE] {}", error);
        self.error_observers.notify(error);
    }

    fn with_stream<R>(&self, f: impl FnOnce(&mut dyn OutputStream) -> R) -> Option<R> {
        lock(&self.stream).as_mut().map(|s| f(s.as_mut()))
    }

    async fn acquire(shared: Arc<Shared>, tx: watch::Sender<Outcome>) {
        let outcome = shared.acquire_with_retry().await;
        let outcome = match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                let error = ResourceError::from(e);
                shared.report(&error);
                Err(error)
            }
        };
        // Post-acquire resume (platform started muted) happens outside the
        // pending slot so waiters see the final state
        let outcome = match outcome {
            Ok(()) if shared.state() == ResourceState::Suspended => Shared::resume(&shared).await,
            other => other,
        };

        lock(&shared.pending).take();
        tx.send_replace(Some(outcome));
    }

    async fn acquire_with_retry(self: &Arc<Self>) -> Result<(), AudioError> {
        let policy = self.config.acquisition_retry.clone();
        let attempts = policy.attempts();
        let mut last_error = AudioError::NoDevices;

        for attempt in 1..=attempts {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.state() == ResourceState::Closed {
                return Err(AudioError::ThreadGone("disposed during initialization".into()));
            }

            let opener = Arc::clone(self);
            let opened = tokio::task::spawn_blocking(move || opener.open_stream())
                .await
                .unwrap_or_else(|e| Err(AudioError::ThreadGone(e.to_string())));

            match opened {
                Ok(stream) => return self.install(stream),
                Err(e) => {
                    log::warn!(
                        "[RESOURCE] Acquisition attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Blocking: open the platform stream with a render wrapper that feeds
    /// the clock and falls back to silence
    fn open_stream(self: &Arc<Self>) -> Result<Box<dyn OutputStream>, AudioError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let request = StreamRequest::from(&self.config);

        let slot = Arc::clone(&self.render);
        let clock = Arc::clone(&self.clock);
        let render: RenderCallback = Box::new(move |block: &mut [StereoSample]| {
            // try_lock: never block the audio thread on a callback swap
            match slot.try_lock() {
                Ok(mut guard) => match guard.as_mut() {
                    Some(render) => render(block),
                    None => block.fill(StereoSample::silence()),
                },
                Err(_) => block.fill(StereoSample::silence()),
            }
            clock.advance(block.len());
        });

        let weak: Weak<Shared> = Arc::downgrade(self);
        let events: StreamEventSink = Arc::new(move |event: StreamEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_stream_event(event);
            }
        });

        self.backend.open(&request, render, events)
    }

    /// Store a freshly opened stream unless the manager was disposed meanwhile
    fn install(&self, mut stream: Box<dyn OutputStream>) -> Result<(), AudioError> {
        let next = if stream.is_suspended() {
            ResourceState::Suspended
        } else {
            ResourceState::Running
        };
        let sample_rate = stream.sample_rate();

        {
            let mut slot = lock(&self.stream);
            let mut state = lock(&self.state);
            if *state == ResourceState::Closed {
                drop(state);
                drop(slot);
                stream.close();
                return Err(AudioError::ThreadGone("disposed during initialization".into()));
            }
            self.clock.reset(sample_rate);
            *slot = Some(stream);
            *state = next;
        }

        log::info!(
            "[RESOURCE] Audio output acquired via {} ({}Hz, {})",
            self.backend.name(),
            sample_rate,
            next
        );
        self.state_observers.notify(&next);
        Ok(())
    }

    async fn resume(shared: &Arc<Shared>) -> Result<(), ResourceError> {
        if !matches!(
            shared.state(),
            ResourceState::Suspended | ResourceState::Interrupted
        ) {
            return Ok(());
        }

        let worker = Arc::clone(shared);
        let result = tokio::task::spawn_blocking(move || worker.with_stream(|s| s.resume())).await;
        let error = match result {
            Ok(Some(Ok(()))) => {
                shared.transition(ResourceState::Running);
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => ResourceError::from(e),
            Err(e) => ResourceError::from_raw(&e.to_string()),
        };
        shared.report(&error);
        Err(error)
    }

    fn handle_stream_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Interrupted(reason) => {
                if self.transition(ResourceState::Interrupted) {
                    log::warn!(
                        "[RESOURCE] Output interrupted: {}",
                        super::error::sanitize_message(&reason)
                    );
                }
            }
        }
    }
}
