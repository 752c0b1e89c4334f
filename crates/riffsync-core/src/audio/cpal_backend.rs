//! CPAL output backend
//!
//! `cpal::Stream` is not `Send`, so each opened stream lives on a dedicated
//! `audio-output` thread. The resource manager talks to that thread over a
//! crossbeam channel:
//!
//! ```text
//! ┌──────────────────┐  ControlMessage   ┌─────────────────────┐
//! │ ResourceManager  │──────────────────►│  audio-output thread │
//! │ (spawn_blocking) │◄──────────────────│  owns cpal::Stream   │
//! └──────────────────┘   reply channel   └──────────┬──────────┘
//!                                                   │ data callback
//!                                                   ▼
//!                                        ┌─────────────────────┐
//!                                        │  CPAL audio thread  │
//!                                        │  calls RenderCallback│
//!                                        └─────────────────────┘
//! ```
//!
//! Stream errors from CPAL are forwarded as `StreamEvent::Interrupted`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, StreamConfig};
use crossbeam::channel::{self, Receiver, Sender};

use super::backend::{
    OutputBackend, OutputStream, RenderCallback, StreamEvent, StreamEventSink, StreamRequest,
};
use super::config::MAX_BUFFER_SIZE;
use super::device::{default_output_device, find_device_by_id};
use super::error::{AudioError, AudioResult};
use crate::types::{StereoSample, DEFAULT_SAMPLE_RATE};

#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

enum ControlMessage {
    Play(Sender<AudioResult<()>>),
    Pause(Sender<AudioResult<()>>),
    Close,
}

/// Negotiated stream parameters sent back once the stream is built
struct Opened {
    sample_rate: u32,
    buffer_size: u32,
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(
        &self,
        request: &StreamRequest,
        render: RenderCallback,
        events: StreamEventSink,
    ) -> AudioResult<Box<dyn OutputStream>> {
        let (reply_tx, reply_rx) = channel::bounded::<AudioResult<Opened>>(1);
        let (control_tx, control_rx) = channel::unbounded::<ControlMessage>();
        let start_suspended = request.start_suspended;
        let request = request.clone();

        let thread = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = match build_stream(&request, render, events) {
                    Ok((stream, opened)) => {
                        let _ = reply_tx.send(Ok(opened));
                        stream
                    }
                    Err(e) => {
                        let _ = reply_tx.send(Err(e));
                        return;
                    }
                };
                run_control_loop(stream, control_rx);
            })
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        let opened = match reply_rx.recv() {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => return Err(AudioError::ThreadGone("audio-output".into())),
        };

        Ok(Box::new(CpalStream {
            sample_rate: opened.sample_rate,
            buffer_size: opened.buffer_size,
            suspended: AtomicBool::new(start_suspended),
            control: control_tx,
            thread: Some(thread),
        }))
    }
}

/// Owns the non-`Send` stream until `Close` arrives or every sender is gone
fn run_control_loop(stream: cpal::Stream, control: Receiver<ControlMessage>) {
    for message in control.iter() {
        match message {
            ControlMessage::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| AudioError::StreamPlayError(e.to_string()));
                let _ = reply.send(result);
            }
            ControlMessage::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| AudioError::StreamPauseError(e.to_string()));
                let _ = reply.send(result);
            }
            ControlMessage::Close => break,
        }
    }
    drop(stream);
    log::info!("[RESOURCE] Audio stream closed");
}

fn build_stream(
    request: &StreamRequest,
    mut render: RenderCallback,
    events: StreamEventSink,
) -> AudioResult<(cpal::Stream, Opened)> {
    let device = match &request.device {
        Some(id) => find_device_by_id(id)?,
        None => default_output_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("[RESOURCE] Using audio device: {}", device_name);

    let (supported, buffer_size) = get_output_config(&device, request)?;
    let sample_rate = supported.sample_rate().0;
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };
    let channels = (stream_config.channels as usize).max(1);

    log::info!(
        "[RESOURCE] Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        stream_config.channels,
        sample_rate,
        buffer_size,
        (buffer_size as f32 / sample_rate as f32) * 1000.0
    );

    let mut scratch = vec![StereoSample::silence(); MAX_BUFFER_SIZE];
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                // Render in blocks no larger than the scratch buffer (no RT allocation)
                for chunk in data.chunks_mut(channels * MAX_BUFFER_SIZE) {
                    let n_frames = chunk.len() / channels;
                    let block = &mut scratch[..n_frames];
                    block.fill(StereoSample::silence());
                    render(block);

                    for (frame, sample) in chunk.chunks_mut(channels).zip(block.iter()) {
                        frame[0] = sample.left;
                        if channels > 1 {
                            frame[1] = sample.right;
                        }
                        for ch in frame.iter_mut().skip(2) {
                            *ch = 0.0;
                        }
                    }
                }
            },
            move |err| {
                log::error!("[RESOURCE] Audio stream error: {}", err);
                events(StreamEvent::Interrupted(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    if request.start_suspended {
        // Some hosts start streams on build; hold it until resumed
        stream
            .pause()
            .map_err(|e| AudioError::StreamPauseError(e.to_string()))?;
    } else {
        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
    }

    Ok((
        stream,
        Opened {
            sample_rate,
            buffer_size,
        },
    ))
}

/// Pick the best output configuration for a device
///
/// Returns (SupportedStreamConfig, buffer size in frames)
fn get_output_config(
    device: &cpal::Device,
    request: &StreamRequest,
) -> AudioResult<(cpal::SupportedStreamConfig, u32)> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    let target_rate = request.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let in_range = |c: &cpal::SupportedStreamConfigRange| {
        target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0
    };

    // Prefer f32 stereo at the requested rate, then any stereo, then anything
    let best = supported_configs
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32 && c.channels() >= 2 && in_range(c))
        .or_else(|| supported_configs.iter().find(|c| c.channels() >= 2))
        .or_else(|| supported_configs.first())
        .ok_or_else(|| AudioError::ConfigError("No supported output configurations".into()))?;

    let sample_rate = if in_range(best) {
        cpal::SampleRate(target_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "[RESOURCE] Audio device doesn't support {}Hz, falling back to {}Hz",
            target_rate,
            fallback.0
        );
        fallback
    };

    let buffer_size = request.buffer_size.frames();
    log::debug!(
        "[RESOURCE] Selected buffer size: {} frames for {:?}",
        buffer_size,
        request.buffer_size
    );

    Ok((best.clone().with_sample_rate(sample_rate), buffer_size))
}

/// Handle to a stream living on the `audio-output` thread
struct CpalStream {
    sample_rate: u32,
    buffer_size: u32,
    suspended: AtomicBool,
    control: Sender<ControlMessage>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn request(&self, make: fn(Sender<AudioResult<()>>) -> ControlMessage) -> AudioResult<()> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.control
            .send(make(reply_tx))
            .map_err(|_| AudioError::ThreadGone("audio-output".into()))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::ThreadGone("audio-output".into()))?
    }
}

impl OutputStream for CpalStream {
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
        self.request(ControlMessage::Play)?;
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn suspend(&mut self) -> AudioResult<()> {
        self.request(ControlMessage::Pause)?;
        self.suspended.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.control.send(ControlMessage::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[RESOURCE] Audio output thread panicked");
            }
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}
