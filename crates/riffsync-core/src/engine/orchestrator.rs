//! Engine orchestrator: the façade widgets and hosts talk to
//!
//! Owns one `ResourceManager` and one `AssetProcessor`, drives the render
//! thread through the command queue, and publishes every externally visible
//! change on the shared `SyncBus`:
//!
//! | Call                     | Event                          | Priority |
//! |--------------------------|--------------------------------|----------|
//! | `play` / `pause`         | PLAYBACK_STATE                 | normal   |
//! | `stop`                   | PLAYBACK_STATE                 | high     |
//! | `set_master_volume`      | VOLUME_CHANGE (`"master"`)     | normal   |
//! | `set_source_volume`      | VOLUME_CHANGE                  | normal   |
//! | `set_tempo` / `set_pitch`| TEMPO_CHANGE / PITCH_CHANGE    | normal   |
//! | source (un)register/mute/solo/pan | SOURCE_CHANGE         | normal   |
//! | resource state / error   | RESOURCE_STATE / RESOURCE_ERROR| high     |
//!
//! A call that changes nothing (same value, transport op that does not apply)
//! publishes nothing. Events are always emitted after internal locks are
//! released, so handlers may call back into the engine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use super::command::{
    command_channel, retire_channel, EngineCommand, Retired, SourceSample, SourceSlot,
};
use super::error::{EngineError, EngineResult};
use super::mixer::ChannelStrip;
use super::renderer::{Renderer, RendererSetup, TransportAtomics, MAX_SOURCES};
use super::source::{clamp_pan, clamp_volume, AudioSourceConfig};
use super::timeline::TimelineTicker;
use super::timestretch::{TimeStretcher, MAX_RATIO, MAX_SEMITONES, MIN_RATIO};
use crate::assets::{
    AssetConfig, AssetConfigPatch, AssetData, AssetFetcher, AssetManifest, AssetProcessor,
    AssetReference, FetchError, SessionSettings, WorkflowPayload,
};
use crate::audio::{OutputBackend, ResourceManager, ResourceState};
use crate::config::EngineConfig;
use crate::observer::ObserverToken;
use crate::retry::RetryPolicy;
use crate::sync::{
    EventPayload, EventPriority, ExerciseInfo, PerformanceSample, SourceChangeKind, SyncBus,
    SyncEvent,
};
use crate::types::{StereoSample, DEFAULT_SAMPLE_RATE};

/// `source_id` used for master volume changes
pub const MASTER_SOURCE_ID: &str = "master";

/// Default `source_id` stamped on engine events
pub const ENGINE_SOURCE_ID: &str = "engine";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Outcome of `load_workflow`
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub manifest: AssetManifest,
    /// Assets recorded (fetched or served from cache)
    pub loaded: usize,
    /// Served from the cache without fetching
    pub from_cache: usize,
    /// Optional assets skipped after exhausting retries
    pub failed: Vec<String>,
    pub warnings: Vec<String>,
}

struct SourceEntry {
    slot: SourceSlot,
    config: AudioSourceConfig,
}

/// Everything the UI side changes. Guarded by one mutex; never held while
/// emitting or awaiting.
struct Control {
    commands: Option<rtrb::Producer<EngineCommand>>,
    retired: Option<rtrb::Consumer<Retired>>,
    sources: Vec<SourceEntry>,
    next_slot: u32,
    playback: PlaybackState,
    master_volume: f32,
    /// Tempo the exercise is written at
    written_bpm: f64,
    bpm: f64,
    pitch: f32,
    ticker: Option<TimelineTicker>,
    exercise: Option<ExerciseInfo>,
}

impl Control {
    fn is_initialized(&self) -> bool {
        self.commands.is_some()
    }

    fn send(&mut self, command: EngineCommand) {
        if let Some(retired) = self.retired.as_mut() {
            // Dropping here keeps deallocation off the audio thread
            while retired.pop().is_ok() {}
        }
        if let Some(commands) = self.commands.as_mut() {
            if commands.push(command).is_err() {
                warn!("[ENGINE] Command queue full, command dropped");
            }
        }
    }

    fn source_mut(&mut self, id: &str) -> EngineResult<&mut SourceEntry> {
        self.sources
            .iter_mut()
            .find(|s| s.config.id == id)
            .ok_or_else(|| EngineError::UnknownSource(id.to_string()))
    }

    fn tempo_ratio(&self) -> f64 {
        TimeStretcher::ratio_from_bpm(self.written_bpm, self.bpm)
    }
}

/// Playback engine for one session
pub struct Engine {
    config: EngineConfig,
    source_id: String,
    resource: ResourceManager,
    processor: Mutex<AssetProcessor>,
    bus: SyncBus,
    transport: Arc<TransportAtomics>,
    control: Mutex<Control>,
    /// Cancel signal of the in-flight `load_workflow`, tagged by generation
    loading: Mutex<Option<(u64, watch::Sender<bool>)>>,
    load_generation: AtomicU64,
    observer_tokens: Mutex<Vec<ObserverToken>>,
    disposed: AtomicBool,
}

impl Engine {
    /// Build an engine on the backend named in `config.audio.backend`
    pub fn new(config: EngineConfig, bus: SyncBus) -> Self {
        let resource = ResourceManager::from_config(config.audio.clone());
        Self::with_resource(config, resource, bus)
    }

    pub fn with_backend(
        config: EngineConfig,
        backend: Arc<dyn OutputBackend>,
        bus: SyncBus,
    ) -> Self {
        let resource = ResourceManager::new(backend, config.audio.clone());
        Self::with_resource(config, resource, bus)
    }

    fn with_resource(config: EngineConfig, resource: ResourceManager, bus: SyncBus) -> Self {
        let source_id = ENGINE_SOURCE_ID.to_string();

        let state_bus = bus.clone();
        let state_source = source_id.clone();
        let state_token = resource.on_state_change(move |state: &ResourceState| {
            state_bus.emit(
                SyncEvent::new(state_source.clone(), EventPayload::ResourceState { state: *state })
                    .with_priority(EventPriority::High),
            );
        });

        let error_bus = bus.clone();
        let error_source = source_id.clone();
        let error_token = resource.on_error(move |err| {
            error_bus.emit(
                SyncEvent::new(error_source.clone(), EventPayload::ResourceError(err.clone()))
                    .with_priority(EventPriority::High),
            );
        });

        let base_bpm = if config.transport.base_bpm > 0.0 {
            config.transport.base_bpm
        } else {
            120.0
        };

        Self {
            processor: Mutex::new(AssetProcessor::new(config.assets.clone())),
            source_id,
            resource,
            bus,
            transport: Arc::new(TransportAtomics::default()),
            control: Mutex::new(Control {
                commands: None,
                retired: None,
                sources: Vec::new(),
                next_slot: 1,
                playback: PlaybackState::Stopped,
                master_volume: 1.0,
                written_bpm: base_bpm,
                bpm: base_bpm,
                pitch: 0.0,
                ticker: None,
                exercise: None,
            }),
            loading: Mutex::new(None),
            load_generation: AtomicU64::new(0),
            observer_tokens: Mutex::new(vec![state_token, error_token]),
            disposed: AtomicBool::new(false),
            config,
        }
    }

    fn emit(&self, payload: EventPayload, priority: EventPriority) {
        self.bus
            .emit(SyncEvent::new(self.source_id.clone(), payload).with_priority(priority));
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Acquire audio output and start the render graph. Call from a user
    /// gesture. Sources registered earlier are applied here.
    pub async fn initialize(&self) -> EngineResult<()> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }
        self.resource.initialize().await?;
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }
        self.install_renderer();
        Ok(())
    }

    fn install_renderer(&self) {
        let mut control = lock(&self.control);
        if control.is_initialized() {
            return;
        }

        let sample_rate = self.resource.sample_rate().unwrap_or(DEFAULT_SAMPLE_RATE);
        let voices = control
            .sources
            .iter()
            .map(|s| {
                let sample = s.config.asset_url.as_deref().and_then(|url| self.sample_for(url));
                (s.slot, ChannelStrip::from(&s.config), sample)
            })
            .collect::<Vec<_>>();
        let buffered = voices.len();

        let setup = RendererSetup {
            sample_rate,
            master_volume: control.master_volume,
            tempo_ratio: control.tempo_ratio(),
            pitch_semitones: control.pitch,
            voices,
        };
        let (command_tx, command_rx) = command_channel();
        let (retire_tx, retire_rx) = retire_channel();
        let mut renderer = Renderer::new(setup, command_rx, retire_tx, Arc::clone(&self.transport));

        self.resource
            .set_render_callback(Box::new(move |out: &mut [StereoSample]| renderer.process(out)));
        control.commands = Some(command_tx);
        control.retired = Some(retire_rx);

        info!(
            "[ENGINE] Render graph running at {}Hz ({} buffered sources applied)",
            sample_rate, buffered
        );
    }

    /// Resume a suspended or interrupted output
    pub async fn resume(&self) -> EngineResult<()> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }
        self.resource.resume().await?;
        Ok(())
    }

    /// Suspend the output (best-effort, never fails)
    pub async fn suspend(&self) {
        if !self.is_disposed() {
            self.resource.suspend().await;
        }
    }

    /// Tear down in order: own observers, audio output, asset cache. Bus
    /// subscriptions belong to widgets and are left alone. Safe to repeat.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_loading();

        let ticker = {
            let mut control = lock(&self.control);
            control.playback = PlaybackState::Stopped;
            control.ticker.take()
        };
        if let Some(ticker) = ticker {
            ticker.stop();
        }

        for token in lock(&self.observer_tokens).drain(..) {
            self.resource.remove_observer(token);
        }
        self.resource.dispose();
        lock(&self.processor).clear_cache();

        {
            let mut control = lock(&self.control);
            control.commands = None;
            control.retired = None;
        }
        info!("[ENGINE] Disposed");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transport
    // ═══════════════════════════════════════════════════════════════════════

    /// Start playback. No-op before `initialize`, while the output is not
    /// running, or when already playing.
    pub fn play(&self) {
        if self.is_disposed() {
            return;
        }
        {
            let mut control = lock(&self.control);
            if !control.is_initialized() || control.playback == PlaybackState::Playing {
                return;
            }
            if !self.resource.is_running() {
                debug!("[ENGINE] play() ignored: output is {}", self.resource.state());
                return;
            }
            control.send(EngineCommand::Play);
            control.playback = PlaybackState::Playing;
            control.ticker = TimelineTicker::start(
                self.bus.clone(),
                Arc::clone(&self.transport),
                self.source_id.clone(),
                Duration::from_millis(self.config.transport.timeline_interval_ms),
            );
        }
        self.emit(EventPayload::PlaybackState { is_playing: true }, EventPriority::Normal);
    }

    /// Pause at the current position. No-op unless playing.
    pub fn pause(&self) {
        let ticker = {
            let mut control = lock(&self.control);
            if control.playback != PlaybackState::Playing {
                return;
            }
            control.send(EngineCommand::Pause);
            control.playback = PlaybackState::Paused;
            control.ticker.take()
        };
        if let Some(ticker) = ticker {
            ticker.stop();
        }
        self.emit(EventPayload::PlaybackState { is_playing: false }, EventPriority::Normal);
    }

    /// Stop and rewind. No-op when already stopped. No TIMELINE_UPDATE is
    /// delivered after this returns.
    pub fn stop(&self) {
        let ticker = {
            let mut control = lock(&self.control);
            if control.playback == PlaybackState::Stopped {
                return;
            }
            control.send(EngineCommand::Stop);
            control.playback = PlaybackState::Stopped;
            control.ticker.take()
        };
        if let Some(ticker) = ticker {
            ticker.stop();
        }
        self.emit(EventPayload::PlaybackState { is_playing: false }, EventPriority::High);
    }

    pub fn playback_state(&self) -> PlaybackState {
        lock(&self.control).playback
    }

    pub fn is_playing(&self) -> bool {
        self.playback_state() == PlaybackState::Playing
    }

    /// Playhead in milliseconds of the written timeline; 0 before the render
    /// graph has started
    pub fn current_time_ms(&self) -> f64 {
        self.transport.position_ms()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Master controls
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_master_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        {
            let mut control = lock(&self.control);
            if self.is_disposed() || control.master_volume == volume {
                return;
            }
            control.master_volume = volume;
            control.send(EngineCommand::SetMasterVolume(volume));
        }
        self.emit(
            EventPayload::VolumeChange {
                source_id: MASTER_SOURCE_ID.to_string(),
                volume,
            },
            EventPriority::Normal,
        );
    }

    pub fn master_volume(&self) -> f32 {
        lock(&self.control).master_volume
    }

    /// Set playback tempo. Clamped to half/double the written tempo; the
    /// published bpm is the effective one.
    pub fn set_tempo(&self, bpm: f64) {
        if !bpm.is_finite() || bpm <= 0.0 {
            warn!("[ENGINE] Ignoring invalid tempo {}", bpm);
            return;
        }
        let effective = {
            let mut control = lock(&self.control);
            if self.is_disposed() {
                return;
            }
            let ratio = (bpm / control.written_bpm).clamp(MIN_RATIO, MAX_RATIO);
            let effective = control.written_bpm * ratio;
            if (effective - control.bpm).abs() < 1e-9 {
                return;
            }
            control.bpm = effective;
            control.send(EngineCommand::SetTempoRatio(ratio));
            effective
        };
        self.emit(EventPayload::TempoChange { bpm: effective }, EventPriority::Normal);
    }

    pub fn tempo(&self) -> f64 {
        lock(&self.control).bpm
    }

    /// Transpose in semitones, clamped to one octave either way
    pub fn set_pitch(&self, semitones: f32) {
        if semitones.is_nan() {
            return;
        }
        let semitones = semitones.clamp(-MAX_SEMITONES, MAX_SEMITONES);
        {
            let mut control = lock(&self.control);
            if self.is_disposed() || control.pitch == semitones {
                return;
            }
            control.pitch = semitones;
            control.send(EngineCommand::SetPitch(semitones));
        }
        self.emit(EventPayload::PitchChange { semitones }, EventPriority::Normal);
    }

    pub fn pitch(&self) -> f32 {
        lock(&self.control).pitch
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sources
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a mixable source. Before `initialize` it is buffered and applied
    /// once the output is running.
    pub fn register_audio_source(&self, config: AudioSourceConfig) -> EngineResult<()> {
        let mut config = config.normalized();
        config.id = config.id.trim().to_string();
        if config.id.is_empty() {
            return Err(EngineError::InvalidSource("source id is empty".into()));
        }
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }

        let id = config.id.clone();
        {
            let mut control = lock(&self.control);
            if control.sources.iter().any(|s| s.config.id == id) {
                return Err(EngineError::DuplicateSource(id));
            }
            if control.sources.len() >= MAX_SOURCES {
                return Err(EngineError::InvalidSource(format!(
                    "at most {} sources per session",
                    MAX_SOURCES
                )));
            }

            let slot = SourceSlot(control.next_slot);
            control.next_slot += 1;
            if control.is_initialized() {
                let sample = config.asset_url.as_deref().and_then(|url| self.sample_for(url));
                control.send(EngineCommand::AddSource {
                    slot,
                    strip: ChannelStrip::from(&config),
                    sample,
                });
            } else {
                debug!("[ENGINE] Buffered source '{}' until initialize", id);
            }
            control.sources.push(SourceEntry { slot, config });
        }

        self.emit_source_change(id, SourceChangeKind::Registered);
        Ok(())
    }

    pub fn unregister_audio_source(&self, id: &str) -> EngineResult<()> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }
        {
            let mut control = lock(&self.control);
            let index = control
                .sources
                .iter()
                .position(|s| s.config.id == id)
                .ok_or_else(|| EngineError::UnknownSource(id.to_string()))?;
            let entry = control.sources.remove(index);
            control.send(EngineCommand::RemoveSource { slot: entry.slot });
        }
        self.emit_source_change(id.to_string(), SourceChangeKind::Unregistered);
        Ok(())
    }

    pub fn set_source_volume(&self, id: &str, volume: f32) -> EngineResult<()> {
        let volume = clamp_volume(volume);
        let changed = self.update_source(id, |config| {
            let changed = config.volume != volume;
            config.volume = volume;
            changed
        })?;
        if changed {
            self.emit(
                EventPayload::VolumeChange {
                    source_id: id.to_string(),
                    volume,
                },
                EventPriority::Normal,
            );
        }
        Ok(())
    }

    pub fn set_source_mute(&self, id: &str, muted: bool) -> EngineResult<()> {
        let changed = self.update_source(id, |config| {
            let changed = config.muted != muted;
            config.muted = muted;
            changed
        })?;
        if changed {
            self.emit_source_change(id.to_string(), SourceChangeKind::Muted { muted });
        }
        Ok(())
    }

    pub fn set_source_solo(&self, id: &str, solo: bool) -> EngineResult<()> {
        let changed = self.update_source(id, |config| {
            let changed = config.solo != solo;
            config.solo = solo;
            changed
        })?;
        if changed {
            self.emit_source_change(id.to_string(), SourceChangeKind::Solo { solo });
        }
        Ok(())
    }

    pub fn set_source_pan(&self, id: &str, pan: f32) -> EngineResult<()> {
        let pan = clamp_pan(pan);
        let changed = self.update_source(id, |config| {
            let changed = config.pan != pan;
            config.pan = pan;
            changed
        })?;
        if changed {
            self.emit_source_change(id.to_string(), SourceChangeKind::Pan { pan });
        }
        Ok(())
    }

    /// Registered sources in registration order
    pub fn sources(&self) -> Vec<AudioSourceConfig> {
        lock(&self.control)
            .sources
            .iter()
            .map(|s| s.config.clone())
            .collect()
    }

    /// Apply `update` to a source's config and push the new strip if it
    /// reports a change
    fn update_source(
        &self,
        id: &str,
        update: impl FnOnce(&mut AudioSourceConfig) -> bool,
    ) -> EngineResult<bool> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }
        let mut control = lock(&self.control);
        let entry = control.source_mut(id)?;
        if !update(&mut entry.config) {
            return Ok(false);
        }
        let slot = entry.slot;
        let strip = ChannelStrip::from(&entry.config);
        control.send(EngineCommand::SetStrip { slot, strip });
        Ok(true)
    }

    fn emit_source_change(&self, source_id: String, change: SourceChangeKind) {
        self.emit(
            EventPayload::SourceChange { source_id, change },
            EventPriority::Normal,
        );
    }

    /// Decoded audio for `url` as the render thread wants it
    fn sample_for(&self, url: &str) -> Option<Box<SourceSample>> {
        let audio = {
            let processor = lock(&self.processor);
            processor
                .loading_state()
                .audio_buffer(url)
                .cloned()
                .or_else(|| processor.cached_asset(url).and_then(|d| d.as_audio().cloned()))
        }?;
        Some(Box::new(SourceSample {
            frames: Arc::new(audio.to_stereo()),
            sample_rate: audio.sample_rate,
        }))
    }

    /// Give every initialized source whose asset just arrived its samples
    fn attach_loaded_samples(&self) {
        let mut control = lock(&self.control);
        if !control.is_initialized() {
            return;
        }
        let wanted: Vec<(SourceSlot, String)> = control
            .sources
            .iter()
            .filter_map(|s| s.config.asset_url.clone().map(|url| (s.slot, url)))
            .collect();
        for (slot, url) in wanted {
            if let Some(sample) = self.sample_for(&url) {
                control.send(EngineCommand::SetSample {
                    slot,
                    sample: Some(sample),
                });
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Assets
    // ═══════════════════════════════════════════════════════════════════════

    /// Validate, resolve and fetch a workflow's assets in priority order
    ///
    /// Each fetch gets `asset_timeout_ms` and up to `retry_attempts` retries.
    /// A failed optional asset is skipped when `fallback_enabled`; a failed
    /// required one aborts the load. Publishes LOAD_PROGRESS after every
    /// recorded asset and EXERCISE_CHANGE on success. Starting a new load
    /// cancels the previous one.
    pub async fn load_workflow(
        &self,
        payload: &WorkflowPayload,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> EngineResult<LoadSummary> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }

        let (report, manifest, asset_config) = {
            let mut processor = lock(&self.processor);
            let report = processor.validate_payload(payload);
            if !report.is_valid {
                warn!("[ENGINE] Workflow rejected: {}", report.errors.join("; "));
                return Err(EngineError::InvalidWorkflow(report.errors));
            }
            let manifest = processor.extract_manifest(payload);
            (report, manifest, processor.config().clone())
        };

        let generation = self.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        if let Some((_, previous)) = lock(&self.loading).replace((generation, cancel_tx)) {
            previous.send_replace(true);
        }

        let result = self
            .fetch_manifest(&manifest, fetcher, &asset_config, &mut cancel_rx)
            .await;

        {
            let mut loading = lock(&self.loading);
            if loading.as_ref().is_some_and(|(g, _)| *g == generation) {
                loading.take();
            }
        }

        let (loaded, from_cache, failed) = result?;
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }

        let settings = SessionSettings::resolve(payload, self.config.transport.base_bpm);
        let info = ExerciseInfo {
            bpm: settings.bpm,
            time_signature: settings.time_signature,
            key_signature: settings.key_signature,
            asset_count: manifest.total_count(),
            warnings: report.warnings.clone(),
        };
        let tempo_changed = {
            let mut control = lock(&self.control);
            let tempo_changed = (control.bpm - settings.bpm).abs() >= 1e-9;
            control.written_bpm = settings.bpm;
            control.bpm = settings.bpm;
            control.send(EngineCommand::SetTempoRatio(1.0));
            control.exercise = Some(info.clone());
            tempo_changed
        };
        self.attach_loaded_samples();

        info!(
            "[ENGINE] Workflow loaded: {}/{} assets ({} cached, {} skipped) at {} BPM",
            loaded,
            manifest.total_count(),
            from_cache,
            failed.len(),
            info.bpm
        );
        self.emit(EventPayload::ExerciseChange(info), EventPriority::Normal);
        if tempo_changed {
            self.emit(EventPayload::TempoChange { bpm: settings.bpm }, EventPriority::Normal);
        }

        Ok(LoadSummary {
            manifest,
            loaded,
            from_cache,
            failed,
            warnings: report.warnings,
        })
    }

    async fn fetch_manifest(
        &self,
        manifest: &AssetManifest,
        fetcher: Arc<dyn AssetFetcher>,
        asset_config: &AssetConfig,
        cancel: &mut watch::Receiver<bool>,
    ) -> EngineResult<(usize, usize, Vec<String>)> {
        let policy = asset_config.retry_policy();
        let timeout = Duration::from_millis(asset_config.asset_timeout_ms.max(1));
        let total = manifest.total_count();
        let mut loaded = 0;
        let mut from_cache = 0;
        let mut failed = Vec::new();

        self.emit_progress(0, total);

        for asset in manifest.load_order() {
            if *cancel.borrow() {
                return Err(EngineError::LoadCancelled);
            }

            let cached = lock(&self.processor).cached_asset(asset.url());
            let data = match cached {
                Some(data) => {
                    from_cache += 1;
                    data
                }
                None => match fetch_with_retry(&fetcher, asset, &policy, timeout, cancel).await {
                    Ok(data) => data,
                    Err(FetchError::Cancelled) => {
                        info!("[ENGINE] Asset loading cancelled");
                        return Err(EngineError::LoadCancelled);
                    }
                    Err(e) if asset_config.fallback_enabled && !asset.category().is_required() => {
                        warn!("[ENGINE] Skipping optional asset {}: {}", asset.url(), e);
                        failed.push(asset.url().to_string());
                        continue;
                    }
                    Err(e) => {
                        error!("[ENGINE] Required asset {} failed: {}", asset.url(), e);
                        return Err(EngineError::AssetLoad {
                            url: asset.url().to_string(),
                            source: e,
                        });
                    }
                },
            };

            let recorded = {
                let mut processor = lock(&self.processor);
                processor.mark_asset_loaded(asset.url(), data);
                processor.loading_state().loaded_assets()
            };
            loaded += 1;
            self.emit_progress(recorded, total);
        }

        Ok((loaded, from_cache, failed))
    }

    fn emit_progress(&self, loaded: usize, total: usize) {
        let percent = lock(&self.processor).loading_progress();
        self.emit(
            EventPayload::LoadProgress {
                loaded,
                total,
                percent,
            },
            EventPriority::Normal,
        );
    }

    /// Abort the in-flight `load_workflow`. Returns false if none was running.
    pub fn cancel_loading(&self) -> bool {
        match lock(&self.loading).take() {
            Some((_, cancel)) => {
                cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn exercise(&self) -> Option<ExerciseInfo> {
        lock(&self.control).exercise.clone()
    }

    pub fn loading_progress(&self) -> f64 {
        lock(&self.processor).loading_progress()
    }

    pub fn cached_asset(&self, url: &str) -> Option<AssetData> {
        lock(&self.processor).cached_asset(url)
    }

    pub fn cache_size(&self) -> usize {
        lock(&self.processor).cache_size()
    }

    pub fn update_asset_config(&self, patch: &AssetConfigPatch) {
        lock(&self.processor).update_config(patch);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observation
    // ═══════════════════════════════════════════════════════════════════════

    pub fn bus(&self) -> &SyncBus {
        &self.bus
    }

    pub fn performance_metrics(&self) -> PerformanceSample {
        self.bus.performance_metrics()
    }

    pub fn resource_state(&self) -> ResourceState {
        self.resource.state()
    }

    pub fn backend_name(&self) -> &'static str {
        self.resource.backend_name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Resolves once `cancel` flips to true; never if the sender goes away
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

async fn fetch_with_retry(
    fetcher: &Arc<dyn AssetFetcher>,
    asset: &AssetReference,
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> Result<AssetData, FetchError> {
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(cancel) => return Err(FetchError::Cancelled),
            }
        }

        let job_fetcher = Arc::clone(fetcher);
        let job_asset = asset.clone();
        let job = tokio::task::spawn_blocking(move || job_fetcher.fetch(&job_asset));

        let result = tokio::select! {
            joined = tokio::time::timeout(timeout, job) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(FetchError::Io(format!("fetch task failed: {}", e))),
                Err(_) => Err(FetchError::Timeout(timeout.as_millis() as u64)),
            },
            _ = cancelled(cancel) => return Err(FetchError::Cancelled),
        };

        match result {
            Ok(data) => return Ok(data),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(
                    "[ENGINE] Fetch of {} failed (attempt {}/{}): {}",
                    asset.url(),
                    attempt,
                    attempts,
                    e
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::testing::MemoryFetcher;
    use crate::assets::{AudioSamples, DecodedAudio, LibraryMidi, Synchronization, TutorialMidi};
    use crate::audio::testing::ScriptedBackend;
    use crate::audio::{AudioError, NullBackend, ResourceErrorKind};
    use crate::sync::EventType;

    type Log = Arc<Mutex<Vec<SyncEvent>>>;

    fn record(bus: &SyncBus, types: &[EventType]) -> Log {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        for &event_type in types {
            let sink = Arc::clone(&log);
            bus.on(event_type, move |event| sink.lock().unwrap().push(event.clone()));
        }
        log
    }

    fn count(log: &Log, event_type: EventType) -> usize {
        log.lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    fn null_engine(bus: &SyncBus) -> Engine {
        let mut config = EngineConfig::headless();
        config.transport.timeline_interval_ms = 10;
        Engine::with_backend(config, Arc::new(NullBackend::new()), bus.clone())
    }

    fn payload() -> WorkflowPayload {
        WorkflowPayload {
            tutorial_specific_midi: Some(TutorialMidi {
                bassline_url: Some("t/bass.mid".into()),
                chords_url: Some("t/chords.mid".into()),
            }),
            library_midi: Some(LibraryMidi {
                drum_pattern_id: None,
                metronome_style_id: Some("wood".into()),
            }),
            audio_samples: Some(AudioSamples {
                bass_notes: Some(vec!["s/e1.wav".into()]),
                drum_hits: Some(vec!["s/kick.wav".into()]),
                ambience_track: None,
            }),
            synchronization: Some(Synchronization {
                bpm: Some(96.0),
                time_signature: None,
                key_signature: Some("E".into()),
            }),
        }
    }

    fn fetcher() -> MemoryFetcher {
        MemoryFetcher::default()
            .with_asset("t/bass.mid", AssetData::bytes(b"MThd-bass".to_vec()))
            .with_asset("t/chords.mid", AssetData::bytes(b"MThd-chords".to_vec()))
            .with_asset("library/metronomes/wood.mid", AssetData::bytes(b"MThd-click".to_vec()))
            .with_asset(
                "s/e1.wav",
                AssetData::audio(DecodedAudio::new(48000, 1, vec![0.25; 4800])),
            )
            .with_asset(
                "s/kick.wav",
                AssetData::audio(DecodedAudio::new(48000, 1, vec![0.5; 480])),
            )
    }

    #[tokio::test]
    async fn test_end_to_end_playback() {
        let bus = SyncBus::default();
        let log = record(&bus, &[EventType::PlaybackState, EventType::TimelineUpdate]);
        let engine = null_engine(&bus);

        engine.initialize().await.unwrap();
        engine
            .register_audio_source(AudioSourceConfig::new("bass-1").with_volume(0.8))
            .unwrap();
        engine.play();

        let last_state = log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|e| e.event_type() == EventType::PlaybackState)
            .cloned()
            .unwrap();
        assert_eq!(last_state.payload, EventPayload::PlaybackState { is_playing: true });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(engine.current_time_ms() > 0.0);
        assert!(count(&log, EventType::TimelineUpdate) > 0);

        engine.stop();
        let stop_event = log.lock().unwrap().last().cloned().unwrap();
        assert_eq!(stop_event.payload, EventPayload::PlaybackState { is_playing: false });
        assert_eq!(stop_event.priority, EventPriority::High);

        let ticks = count(&log, EventType::TimelineUpdate);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count(&log, EventType::TimelineUpdate), ticks);
        engine.dispose();
    }

    #[tokio::test]
    async fn test_dispose_twice_leaves_resource_closed() {
        let bus = SyncBus::default();
        let engine = null_engine(&bus);
        engine.initialize().await.unwrap();

        engine.dispose();
        engine.dispose();
        assert_eq!(engine.resource_state(), ResourceState::Closed);
        assert!(matches!(engine.initialize().await, Err(EngineError::Disposed)));
    }

    #[tokio::test]
    async fn test_dispose_before_initialize() {
        let engine = null_engine(&SyncBus::default());
        engine.dispose();
        engine.dispose();
        assert_eq!(engine.resource_state(), ResourceState::Closed);
        assert_eq!(engine.current_time_ms(), 0.0);
    }

    #[tokio::test]
    async fn test_transport_is_noop_before_initialize() {
        let bus = SyncBus::default();
        let log = record(&bus, &[EventType::PlaybackState]);
        let engine = null_engine(&bus);

        engine.play();
        engine.pause();
        engine.stop();
        assert_eq!(engine.playback_state(), PlaybackState::Stopped);
        assert_eq!(count(&log, EventType::PlaybackState), 0);
        assert_eq!(engine.current_time_ms(), 0.0);
    }

    #[tokio::test]
    async fn test_pause_while_stopped_is_noop() {
        let bus = SyncBus::default();
        let log = record(&bus, &[EventType::PlaybackState]);
        let engine = null_engine(&bus);
        engine.initialize().await.unwrap();

        engine.pause();
        assert_eq!(count(&log, EventType::PlaybackState), 0);

        engine.play();
        engine.play();
        engine.pause();
        engine.pause();
        engine.stop();
        engine.stop();
        assert_eq!(count(&log, EventType::PlaybackState), 3);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_acquires_once() {
        let backend = Arc::new(ScriptedBackend::new().with_open_delay(Duration::from_millis(30)));
        let engine = Engine::with_backend(
            EngineConfig::headless(),
            Arc::clone(&backend) as Arc<dyn OutputBackend>,
            SyncBus::default(),
        );

        let (a, b) = tokio::join!(engine.initialize(), engine.initialize());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.open_count(), 1);
        assert_eq!(engine.resource_state(), ResourceState::Running);
    }

    #[tokio::test]
    async fn test_each_mutation_publishes_one_event() {
        let bus = SyncBus::default();
        let log = record(&bus, &EventType::ALL);
        let engine = null_engine(&bus);
        engine.initialize().await.unwrap();
        log.lock().unwrap().clear();

        engine.register_audio_source(AudioSourceConfig::new("bass-1")).unwrap();
        engine.set_master_volume(0.5);
        engine.set_master_volume(0.5);
        engine.set_tempo(60.0);
        engine.set_pitch(2.0);
        engine.set_source_volume("bass-1", 0.3).unwrap();
        engine.set_source_mute("bass-1", true).unwrap();
        engine.set_source_solo("bass-1", true).unwrap();
        engine.set_source_pan("bass-1", -0.5).unwrap();
        engine.unregister_audio_source("bass-1").unwrap();

        let types: Vec<EventType> = log.lock().unwrap().iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                EventType::SourceChange,
                EventType::VolumeChange,
                EventType::TempoChange,
                EventType::PitchChange,
                EventType::VolumeChange,
                EventType::SourceChange,
                EventType::SourceChange,
                EventType::SourceChange,
                EventType::SourceChange,
            ]
        );
        assert_eq!(engine.tempo(), 60.0);
    }

    #[tokio::test]
    async fn test_unknown_source_errors_without_event() {
        let bus = SyncBus::default();
        let log = record(&bus, &[EventType::VolumeChange, EventType::SourceChange]);
        let engine = null_engine(&bus);

        assert_eq!(
            engine.set_source_volume("ghost", 0.5),
            Err(EngineError::UnknownSource("ghost".into()))
        );
        assert!(engine.unregister_audio_source("ghost").is_err());
        assert_eq!(log.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_sources_buffered_until_initialize() {
        let bus = SyncBus::default();
        let engine = null_engine(&bus);

        engine
            .register_audio_source(AudioSourceConfig::new("bass-1").with_volume(0.8))
            .unwrap();
        assert_eq!(
            engine.register_audio_source(AudioSourceConfig::new("bass-1")),
            Err(EngineError::DuplicateSource("bass-1".into()))
        );
        assert_eq!(engine.sources().len(), 1);

        engine.initialize().await.unwrap();
        engine.play();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(engine.is_playing());
        assert_eq!(engine.sources()[0].volume, 0.8);
        engine.stop();
    }

    #[tokio::test]
    async fn test_tempo_clamped_to_stretch_range() {
        let engine = null_engine(&SyncBus::default());
        engine.set_tempo(1000.0);
        assert_eq!(engine.tempo(), 240.0);
        engine.set_tempo(-5.0);
        assert_eq!(engine.tempo(), 240.0);
    }

    #[tokio::test]
    async fn test_resource_failure_is_published_high_priority() {
        let bus = SyncBus::default();
        let log = record(&bus, &[EventType::ResourceError]);
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_next_open(AudioError::DeviceNotFound(
            "hw:0 at /usr/local/app/index.js:42:7".into(),
        ));
        let engine = Engine::with_backend(
            EngineConfig::headless(),
            Arc::clone(&backend) as Arc<dyn OutputBackend>,
            bus.clone(),
        );

        let err = engine.initialize().await.unwrap_err();
        let EngineError::Resource(resource_error) = err else {
            panic!("expected resource error");
        };
        assert_eq!(resource_error.kind, ResourceErrorKind::Hardware);
        assert!(!resource_error.message.contains("/usr/local"));

        let events = log.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].priority, EventPriority::High);
        drop(events);

        // Retry succeeds
        engine.initialize().await.unwrap();
        assert_eq!(engine.resource_state(), ResourceState::Running);
    }

    #[tokio::test]
    async fn test_load_workflow() {
        let bus = SyncBus::default();
        let log = record(&bus, &[EventType::LoadProgress, EventType::ExerciseChange]);
        let engine = null_engine(&bus);

        let summary = engine.load_workflow(&payload(), Arc::new(fetcher())).await.unwrap();
        assert_eq!(summary.loaded, summary.manifest.total_count());
        assert!(summary.failed.is_empty());
        assert_eq!(engine.loading_progress(), 100.0);
        assert_eq!(engine.tempo(), 96.0);

        let events = log.lock().unwrap();
        // Initial 0% plus one per asset, then the exercise summary
        assert_eq!(events.len(), summary.manifest.total_count() + 2);
        let EventPayload::ExerciseChange(info) = &events.last().unwrap().payload else {
            panic!("expected exercise change last");
        };
        assert_eq!(info.bpm, 96.0);
        assert_eq!(info.time_signature, "4/4");
        assert_eq!(info.key_signature, "E");
        assert!(info.warnings.iter().any(|w| w.contains("time signature")));
    }

    #[tokio::test]
    async fn test_second_load_is_served_from_cache() {
        let engine = null_engine(&SyncBus::default());
        let fetcher = Arc::new(fetcher());
        engine
            .load_workflow(&payload(), Arc::clone(&fetcher) as Arc<dyn AssetFetcher>)
            .await
            .unwrap();
        let calls = fetcher.calls();

        let summary = engine
            .load_workflow(&payload(), Arc::clone(&fetcher) as Arc<dyn AssetFetcher>)
            .await
            .unwrap();
        assert_eq!(summary.from_cache, summary.manifest.total_count());
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test]
    async fn test_invalid_workflow_is_rejected() {
        let engine = null_engine(&SyncBus::default());
        let err = engine
            .load_workflow(&WorkflowPayload::default(), Arc::new(fetcher()))
            .await
            .unwrap_err();
        let EngineError::InvalidWorkflow(errors) = err else {
            panic!("expected invalid workflow");
        };
        assert!(errors.iter().any(|e| e.contains("bass samples")));
    }

    #[tokio::test]
    async fn test_optional_asset_failure_falls_back() {
        let engine = null_engine(&SyncBus::default());
        let fetcher = fetcher().failing("s/kick.wav", 10, FetchError::NotFound("s/kick.wav".into()));

        let summary = engine.load_workflow(&payload(), Arc::new(fetcher)).await.unwrap();
        assert_eq!(summary.failed, vec!["s/kick.wav".to_string()]);
        assert!(engine.loading_progress() < 100.0);
    }

    #[tokio::test]
    async fn test_required_asset_failure_aborts() {
        let engine = null_engine(&SyncBus::default());
        let fetcher = fetcher().failing("s/e1.wav", 10, FetchError::NotFound("s/e1.wav".into()));

        let err = engine.load_workflow(&payload(), Arc::new(fetcher)).await.unwrap_err();
        assert!(matches!(err, EngineError::AssetLoad { ref url, .. } if url == "s/e1.wav"));
        assert!(engine.exercise().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let engine = null_engine(&SyncBus::default());
        let fetcher = Arc::new(fetcher().failing(
            "t/bass.mid",
            1,
            FetchError::Io("connection reset".into()),
        ));

        let summary = engine
            .load_workflow(&payload(), Arc::clone(&fetcher) as Arc<dyn AssetFetcher>)
            .await
            .unwrap();
        assert_eq!(fetcher.calls(), summary.manifest.total_count() + 1);
    }

    #[tokio::test]
    async fn test_timeout_enforced_per_asset() {
        let mut config = EngineConfig::headless();
        config.assets.asset_timeout_ms = 20;
        config.assets.retry_attempts = 0;
        let engine = Engine::with_backend(config, Arc::new(NullBackend::new()), SyncBus::default());
        let fetcher = fetcher().with_delay(Duration::from_millis(200));

        let err = engine.load_workflow(&payload(), Arc::new(fetcher)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AssetLoad {
                source: FetchError::Timeout(20),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_loading() {
        let engine = null_engine(&SyncBus::default());
        let fetcher = fetcher().with_delay(Duration::from_millis(100));

        let payload = payload();
        let (result, cancelled) = tokio::join!(
            engine.load_workflow(&payload, Arc::new(fetcher)),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                engine.cancel_loading()
            }
        );
        assert!(cancelled);
        assert_eq!(result.unwrap_err(), EngineError::LoadCancelled);
        assert!(!engine.cancel_loading());
    }

    #[tokio::test]
    async fn test_dispose_clears_cache_but_keeps_bus_subscriptions() {
        let bus = SyncBus::default();
        let _log = record(&bus, &[EventType::PlaybackState]);
        let engine = null_engine(&bus);
        engine.load_workflow(&payload(), Arc::new(fetcher())).await.unwrap();
        assert!(engine.cache_size() > 0);

        engine.dispose();
        assert_eq!(engine.cache_size(), 0);
        assert_eq!(engine.loading_progress(), 0.0);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_source_controls_rejected_after_dispose() {
        let bus = SyncBus::default();
        let log = record(&bus, &[EventType::SourceChange, EventType::VolumeChange]);
        let engine = null_engine(&bus);
        engine.initialize().await.unwrap();
        engine
            .register_audio_source(AudioSourceConfig::new("bass-1"))
            .unwrap();
        engine.dispose();
        let before = log.lock().unwrap().len();

        assert_eq!(engine.set_source_volume("bass-1", 0.2), Err(EngineError::Disposed));
        assert_eq!(engine.set_source_mute("bass-1", true), Err(EngineError::Disposed));
        assert_eq!(engine.set_source_solo("bass-1", true), Err(EngineError::Disposed));
        assert_eq!(engine.set_source_pan("bass-1", -0.5), Err(EngineError::Disposed));
        assert_eq!(engine.unregister_audio_source("bass-1"), Err(EngineError::Disposed));
        assert_eq!(log.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_load_announces_tempo_reset() {
        let bus = SyncBus::default();
        let log = record(&bus, &[EventType::TempoChange]);
        let engine = null_engine(&bus);
        engine.set_tempo(60.0);
        assert_eq!(engine.tempo(), 60.0);

        engine.load_workflow(&payload(), Arc::new(fetcher())).await.unwrap();
        assert_eq!(engine.tempo(), 96.0);
        let bpms: Vec<f64> = log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::TempoChange { bpm } => Some(*bpm),
                _ => None,
            })
            .collect();
        assert_eq!(bpms, vec![60.0, 96.0]);

        // Reloading at the same tempo stays quiet
        let announced = count(&log, EventType::TempoChange);
        engine.load_workflow(&payload(), Arc::new(fetcher())).await.unwrap();
        assert_eq!(count(&log, EventType::TempoChange), announced);
    }

    #[tokio::test]
    async fn test_loaded_sample_reaches_source() {
        let engine = null_engine(&SyncBus::default());
        engine.initialize().await.unwrap();
        engine
            .register_audio_source(AudioSourceConfig::new("bass-1").with_asset("s/e1.wav"))
            .unwrap();
        engine.load_workflow(&payload(), Arc::new(fetcher())).await.unwrap();

        assert!(engine.sample_for("s/e1.wav").is_some());
        assert!(engine.sample_for("t/bass.mid").is_none());
    }
}
