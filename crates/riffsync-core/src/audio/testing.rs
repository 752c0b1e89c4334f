//! Scripted output backend for tests
//!
//! Wraps the null stream so the render callback really runs (and the output
//! clock advances), while letting a test count opens/closes, inject open,
//! resume and suspend failures, delay acquisition and fire interruptions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::backend::{
    NullStream, OutputBackend, OutputStream, RenderCallback, StreamEvent, StreamEventSink,
    StreamRequest,
};
use super::error::{AudioError, AudioResult};

/// Buffer used by scripted streams: ~5ms at 48kHz
const SCRIPTED_BUFFER: u32 = 256;

#[derive(Default)]
struct Script {
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_resume: AtomicBool,
    fail_suspend: AtomicBool,
    failures: Mutex<VecDeque<AudioError>>,
    events: Mutex<Option<StreamEventSink>>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    script: Arc<Script>,
    open_delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block inside `open` for `delay` (simulates a slow platform)
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Queue a failure for the next `open` call
    pub fn fail_next_open(&self, error: AudioError) {
        self.script.failures.lock().unwrap().push_back(error);
    }

    pub fn set_fail_resume(&self, fail: bool) {
        self.script.fail_resume.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_suspend(&self, fail: bool) {
        self.script.fail_suspend.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    /// Fire a platform interruption on the most recently opened stream
    pub fn interrupt(&self, reason: &str) {
        let sink = self.script.events.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(StreamEvent::Interrupted(reason.to_string()));
        }
    }
}

impl OutputBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(
        &self,
        request: &StreamRequest,
        render: RenderCallback,
        events: StreamEventSink,
    ) -> AudioResult<Box<dyn OutputStream>> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if let Some(error) = self.script.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let inner = NullStream::spawn(
            request.sample_rate.unwrap_or(crate::types::DEFAULT_SAMPLE_RATE),
            SCRIPTED_BUFFER,
            request.start_suspended,
            render,
        )?;
        *self.script.events.lock().unwrap() = Some(events);
        Ok(Box::new(ScriptedStream {
            inner,
            script: Arc::clone(&self.script),
            closed: false,
        }))
    }
}

struct ScriptedStream {
    inner: NullStream,
    script: Arc<Script>,
    closed: bool,
}

impl OutputStream for ScriptedStream {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn buffer_size(&self) -> u32 {
        self.inner.buffer_size()
    }

    fn is_suspended(&self) -> bool {
        self.inner.is_suspended()
    }

    fn resume(&mut self) -> AudioResult<()> {
        if self.script.fail_resume.load(Ordering::SeqCst) {
            return Err(AudioError::StreamPlayError("Permission denied by autoplay policy".into()));
        }
        self.inner.resume()
    }

    fn suspend(&mut self) -> AudioResult<()> {
        if self.script.fail_suspend.load(Ordering::SeqCst) {
            return Err(AudioError::StreamPauseError("device refused to pause".into()));
        }
        self.inner.suspend()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.script.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close();
        }
    }
}
