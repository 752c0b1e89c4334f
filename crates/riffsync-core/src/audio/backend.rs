//! Output backend trait for platform-specific implementations
//!
//! Defines a common interface for output backends:
//! - **CPAL**: system audio on every desktop platform (cpal-backend feature)
//! - **Null**: silent render thread paced by the wall clock
//!
//! A backend opens one stream per acquisition. The stream pulls audio from a
//! `RenderCallback` on its own thread and reports platform-driven changes
//! (device loss, OS interruptions) through a `StreamEventSink`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use super::config::{BackendKind, BufferSize, DeviceId, ResourceConfig, MAX_BUFFER_SIZE};
use super::error::{AudioError, AudioResult};
use crate::types::{StereoSample, DEFAULT_SAMPLE_RATE};

/// Fills one block of output; runs on the backend's audio thread
pub type RenderCallback = Box<dyn FnMut(&mut [StereoSample]) + Send>;

/// Platform-driven stream changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The OS or device took the output away (device unplugged, stream error)
    Interrupted(String),
}

pub type StreamEventSink = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// What the resource manager asks a backend to open
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub device: Option<DeviceId>,
    pub sample_rate: Option<u32>,
    pub buffer_size: BufferSize,
    pub start_suspended: bool,
}

impl From<&ResourceConfig> for StreamRequest {
    fn from(config: &ResourceConfig) -> Self {
        Self {
            device: config.device.clone(),
            sample_rate: config.sample_rate,
            buffer_size: config.buffer_size,
            start_suspended: config.start_suspended,
        }
    }
}

/// An open output stream. Dropping it without `close()` still stops audio.
pub trait OutputStream: Send {
    fn sample_rate(&self) -> u32;

    /// Negotiated buffer size in frames
    fn buffer_size(&self) -> u32;

    fn is_suspended(&self) -> bool;

    fn resume(&mut self) -> AudioResult<()>;

    fn suspend(&mut self) -> AudioResult<()>;

    /// Stop rendering and release the device. Idempotent.
    fn close(&mut self);
}

/// Factory for output streams
pub trait OutputBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Acquire the platform output. Blocking; the manager calls it off the
    /// async runtime.
    fn open(
        &self,
        request: &StreamRequest,
        render: RenderCallback,
        events: StreamEventSink,
    ) -> AudioResult<Box<dyn OutputStream>>;
}

/// Build the backend selected in the config
pub fn build_backend(kind: BackendKind) -> Arc<dyn OutputBackend> {
    match kind {
        BackendKind::Null => Arc::new(NullBackend::new()),
        #[cfg(feature = "cpal-backend")]
        BackendKind::Cpal => Arc::new(super::cpal_backend::CpalBackend::new()),
        #[cfg(not(feature = "cpal-backend"))]
        BackendKind::Cpal => Arc::new(UnavailableBackend {
            reason: "built without the cpal-backend feature",
        }),
    }
}

/// Stand-in for a backend that was not compiled in; every open fails
#[cfg(not(feature = "cpal-backend"))]
struct UnavailableBackend {
    reason: &'static str,
}

#[cfg(not(feature = "cpal-backend"))]
impl OutputBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn open(
        &self,
        _request: &StreamRequest,
        _render: RenderCallback,
        _events: StreamEventSink,
    ) -> AudioResult<Box<dyn OutputStream>> {
        Err(AudioError::Unsupported(self.reason.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output clock
// ═══════════════════════════════════════════════════════════════════════════════

/// Frames rendered by the current stream, readable from any thread
#[derive(Debug, Default)]
pub struct OutputClock {
    frames: AtomicU64,
    sample_rate: AtomicU32,
}

impl OutputClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the audio thread after each rendered block
    #[inline]
    pub fn advance(&self, frames: usize) {
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn reset(&self, sample_rate: u32) {
        self.frames.store(0, Ordering::Relaxed);
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Rendered time in milliseconds (0 before any stream was opened)
    pub fn elapsed_ms(&self) -> f64 {
        let rate = self.sample_rate();
        if rate == 0 {
            return 0.0;
        }
        self.frames() as f64 * 1000.0 / rate as f64
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Null backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Silent backend: renders into a scratch buffer at the pace a real device
/// would pull audio, then discards it
#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl OutputBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(
        &self,
        request: &StreamRequest,
        render: RenderCallback,
        _events: StreamEventSink,
    ) -> AudioResult<Box<dyn OutputStream>> {
        let sample_rate = request.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        let buffer_size = request.buffer_size.frames();
        let stream = NullStream::spawn(sample_rate, buffer_size, request.start_suspended, render)?;
        log::info!(
            "[RESOURCE] Null output opened: {}Hz, {} frames (~{:.1}ms)",
            sample_rate,
            buffer_size,
            request.buffer_size.latency_ms(sample_rate)
        );
        Ok(Box::new(stream))
    }
}

enum NullCommand {
    Resume,
    Suspend,
    Close,
}

/// Stream half of the null backend: a named thread that calls the render
/// callback once per buffer period while not suspended
pub struct NullStream {
    sample_rate: u32,
    buffer_size: u32,
    suspended: Arc<AtomicBool>,
    commands: Sender<NullCommand>,
    thread: Option<JoinHandle<()>>,
}

impl NullStream {
    pub(crate) fn spawn(
        sample_rate: u32,
        buffer_size: u32,
        start_suspended: bool,
        mut render: RenderCallback,
    ) -> AudioResult<Self> {
        if sample_rate == 0 {
            return Err(AudioError::ConfigError("sample rate must be positive".into()));
        }
        let frames = (buffer_size as usize).clamp(1, MAX_BUFFER_SIZE);
        let period = Duration::from_secs_f64(frames as f64 / sample_rate as f64);
        let suspended = Arc::new(AtomicBool::new(start_suspended));
        let (commands, command_rx) = channel::unbounded::<NullCommand>();

        let thread_suspended = Arc::clone(&suspended);
        let thread = std::thread::Builder::new()
            .name("null-output".into())
            .spawn(move || {
                let mut scratch = vec![StereoSample::silence(); frames];
                let mut next_tick = Instant::now() + period;
                loop {
                    let timeout = next_tick.saturating_duration_since(Instant::now());
                    match command_rx.recv_timeout(timeout) {
                        Ok(NullCommand::Resume) => {
                            thread_suspended.store(false, Ordering::Release);
                            next_tick = Instant::now() + period;
                        }
                        Ok(NullCommand::Suspend) => thread_suspended.store(true, Ordering::Release),
                        Ok(NullCommand::Close) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if !thread_suspended.load(Ordering::Acquire) {
                                scratch.fill(StereoSample::silence());
                                render(&mut scratch);
                            }
                            next_tick += period;
                            let now = Instant::now();
                            if next_tick < now {
                                // Fell behind (debugger, loaded CI box): skip, don't burst
                                next_tick = now + period;
                            }
                        }
                    }
                }
            })
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        Ok(Self {
            sample_rate,
            buffer_size: frames as u32,
            suspended,
            commands,
            thread: Some(thread),
        })
    }

    fn send(&self, command: NullCommand) -> AudioResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AudioError::ThreadGone("null-output".into()))
    }
}

impl OutputStream for NullStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn resume(&mut self) -> AudioResult<()> {
        self.send(NullCommand::Resume)?;
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn suspend(&mut self) -> AudioResult<()> {
        self.send(NullCommand::Suspend)?;
        self.suspended.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.commands.send(NullCommand::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[RESOURCE] Null output thread panicked");
            }
        }
    }
}

impl Drop for NullStream {
    fn drop(&mut self) {
        self.close();
    }
}
