//! Render-thread side of the engine
//!
//! The `Renderer` is moved into the output stream's render callback and never
//! locks. It owns the voices, mixer and stretcher; the engine talks to it only
//! through the command queue and reads transport state from `TransportAtomics`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::command::{EngineCommand, Retired, SourceSample, SourceSlot};
use super::mixer::{mix_into, ChannelStrip, Mixer};
use super::timestretch::TimeStretcher;
use crate::audio::MAX_BUFFER_SIZE;
use crate::types::{StereoBuffer, StereoSample};

/// Voices are pre-allocated so adding one never allocates on the audio thread
pub const MAX_SOURCES: usize = 64;

/// Lock-free transport state published by the render thread
#[derive(Debug, Default)]
pub struct TransportAtomics {
    /// Playhead in frames of the written (unstretched) timeline
    position: AtomicU64,
    sample_rate: AtomicU32,
    playing: AtomicBool,
}

impl TransportAtomics {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: AtomicU32::new(sample_rate),
            ..Default::default()
        }
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Playhead in milliseconds of the written timeline
    pub fn position_ms(&self) -> f64 {
        let rate = self.sample_rate();
        if rate == 0 {
            return 0.0;
        }
        self.position() as f64 * 1000.0 / rate as f64
    }
}

/// Initial render state, built by the engine once the output is running
pub struct RendererSetup {
    pub sample_rate: u32,
    pub master_volume: f32,
    pub tempo_ratio: f64,
    pub pitch_semitones: f32,
    pub voices: Vec<(SourceSlot, ChannelStrip, Option<Box<SourceSample>>)>,
}

struct Voice {
    slot: SourceSlot,
    strip: ChannelStrip,
    sample: Option<Box<SourceSample>>,
    /// Read position in source frames; samples loop
    cursor: f64,
}

impl Voice {
    /// Fill `out` from the looping sample, resampling to `out_rate`
    fn render(&mut self, out: &mut [StereoSample], out_rate: u32) -> bool {
        let Some(sample) = self.sample.as_ref() else {
            return false;
        };
        let src = sample.frames.as_slice();
        let len = src.len();
        if len == 0 || out_rate == 0 {
            return false;
        }
        let step = sample.sample_rate as f64 / out_rate as f64;
        for frame in out.iter_mut() {
            let index = self.cursor as usize % len;
            let frac = (self.cursor - self.cursor.floor()) as f32;
            let a = src[index];
            let b = src[(index + 1) % len];
            *frame = a * (1.0 - frac) + b * frac;
            self.cursor += step;
            if self.cursor >= len as f64 {
                self.cursor -= len as f64;
            }
        }
        true
    }
}

pub struct Renderer {
    commands: rtrb::Consumer<EngineCommand>,
    retired: rtrb::Producer<Retired>,
    transport: Arc<TransportAtomics>,
    sample_rate: u32,
    playing: bool,
    position: u64,
    voices: Vec<Voice>,
    mixer: Mixer,
    stretcher: TimeStretcher,
    /// Mixed sources before stretching (up to MAX_RATIO × block)
    mix_buffer: StereoBuffer,
    voice_buffer: StereoBuffer,
}

impl Renderer {
    pub fn new(
        setup: RendererSetup,
        commands: rtrb::Consumer<EngineCommand>,
        retired: rtrb::Producer<Retired>,
        transport: Arc<TransportAtomics>,
    ) -> Self {
        let mut stretcher = TimeStretcher::new(setup.sample_rate);
        stretcher.set_ratio(setup.tempo_ratio);
        stretcher.set_pitch_semitones(setup.pitch_semitones);

        let mut voices = Vec::with_capacity(MAX_SOURCES);
        voices.extend(setup.voices.into_iter().map(|(slot, strip, sample)| Voice {
            slot,
            strip,
            sample,
            cursor: 0.0,
        }));

        let scratch_len = MAX_BUFFER_SIZE * 2;
        transport.sample_rate.store(setup.sample_rate, Ordering::Relaxed);
        Self {
            commands,
            retired,
            transport,
            sample_rate: setup.sample_rate,
            playing: false,
            position: 0,
            voices,
            mixer: Mixer::new(setup.master_volume),
            stretcher,
            mix_buffer: StereoBuffer::silence(scratch_len),
            voice_buffer: StereoBuffer::silence(scratch_len),
        }
    }

    /// Render callback body
    pub fn process(&mut self, output: &mut [StereoSample]) {
        self.process_commands();
        for block in output.chunks_mut(MAX_BUFFER_SIZE) {
            self.process_block(block);
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Play => self.set_playing(true),
            EngineCommand::Pause => self.set_playing(false),
            EngineCommand::Stop => {
                self.set_playing(false);
                self.position = 0;
                self.transport.position.store(0, Ordering::Relaxed);
                for voice in &mut self.voices {
                    voice.cursor = 0.0;
                }
                self.stretcher.reset();
            }
            EngineCommand::SetMasterVolume(volume) => self.mixer.set_master_volume(volume),
            EngineCommand::SetTempoRatio(ratio) => {
                let was_neutral = self.stretcher.is_neutral();
                self.stretcher.set_ratio(ratio);
                if was_neutral != self.stretcher.is_neutral() {
                    self.stretcher.reset();
                }
            }
            EngineCommand::SetPitch(semitones) => {
                let was_neutral = self.stretcher.is_neutral();
                self.stretcher.set_pitch_semitones(semitones);
                if was_neutral != self.stretcher.is_neutral() {
                    self.stretcher.reset();
                }
            }
            EngineCommand::AddSource { slot, strip, sample } => {
                if self.voices.len() < self.voices.capacity() {
                    self.voices.push(Voice {
                        slot,
                        strip,
                        sample,
                        cursor: 0.0,
                    });
                } else if let Some(sample) = sample {
                    self.retire(sample);
                }
            }
            EngineCommand::RemoveSource { slot } => {
                if let Some(index) = self.voices.iter().position(|v| v.slot == slot) {
                    let voice = self.voices.swap_remove(index);
                    if let Some(sample) = voice.sample {
                        self.retire(sample);
                    }
                }
            }
            EngineCommand::SetStrip { slot, strip } => {
                if let Some(voice) = self.voices.iter_mut().find(|v| v.slot == slot) {
                    voice.strip = strip;
                }
            }
            EngineCommand::SetSample { slot, sample } => {
                let replaced = match self.voices.iter_mut().find(|v| v.slot == slot) {
                    Some(voice) => {
                        voice.cursor = 0.0;
                        std::mem::replace(&mut voice.sample, sample)
                    }
                    None => sample,
                };
                if let Some(old) = replaced {
                    self.retire(old);
                }
            }
        }
    }

    fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
        self.transport.playing.store(playing, Ordering::Relaxed);
    }

    fn retire(&mut self, sample: Box<SourceSample>) {
        // A full queue drops in place; the engine drains it on every call
        let _ = self.retired.push(Retired::Sample(sample));
    }

    fn process_block(&mut self, out: &mut [StereoSample]) {
        if !self.playing {
            out.fill(StereoSample::silence());
            return;
        }

        let bypass = self.stretcher.is_neutral();
        let input_len = if bypass {
            out.len()
        } else {
            self.stretcher.input_frames_for(out.len())
        }
        .min(self.mix_buffer.as_slice().len());

        let mix = &mut self.mix_buffer.as_mut_slice()[..input_len];
        mix.fill(StereoSample::silence());
        let scratch = &mut self.voice_buffer.as_mut_slice()[..input_len];

        let any_solo = self.voices.iter().any(|v| v.strip.solo);
        for voice in &mut self.voices {
            if !voice.strip.is_audible(any_solo) {
                continue;
            }
            if voice.render(scratch, self.sample_rate) {
                mix_into(mix, scratch, &voice.strip);
            }
        }

        if bypass {
            out.copy_from_slice(&mix[..out.len()]);
        } else {
            self.stretcher.process(mix, out);
        }
        self.mixer.apply_master(out);

        self.position += input_len as u64;
        self.transport.position.store(self.position, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::{command_channel, retire_channel};

    fn renderer(voices: Vec<(SourceSlot, ChannelStrip, Option<Box<SourceSample>>)>) -> (
        Renderer,
        rtrb::Producer<EngineCommand>,
        rtrb::Consumer<Retired>,
        Arc<TransportAtomics>,
    ) {
        let (tx, rx) = command_channel();
        let (retire_tx, retire_rx) = retire_channel();
        let transport = Arc::new(TransportAtomics::new(1000));
        let setup = RendererSetup {
            sample_rate: 1000,
            master_volume: 1.0,
            tempo_ratio: 1.0,
            pitch_semitones: 0.0,
            voices,
        };
        (Renderer::new(setup, rx, retire_tx, Arc::clone(&transport)), tx, retire_rx, transport)
    }

    fn constant_sample(value: f32, len: usize) -> Box<SourceSample> {
        Box::new(SourceSample {
            frames: Arc::new(StereoBuffer::from_vec(vec![StereoSample::mono(value); len])),
            sample_rate: 1000,
        })
    }

    #[test]
    fn test_silent_until_play() {
        let strip = ChannelStrip { pan: -1.0, ..Default::default() };
        let (mut r, mut tx, _retired, transport) =
            renderer(vec![(SourceSlot(1), strip, Some(constant_sample(0.5, 10)))]);

        let mut out = vec![StereoSample::mono(1.0); 100];
        r.process(&mut out);
        assert!(out.iter().all(|s| *s == StereoSample::silence()));
        assert_eq!(transport.position(), 0);

        tx.push(EngineCommand::Play).unwrap();
        r.process(&mut out);
        assert!(transport.is_playing());
        assert_eq!(transport.position(), 100);
        assert!((transport.position_ms() - 100.0).abs() < 1e-9);
        assert!((out[50].left - 0.5).abs() < 1e-5);
        assert!(out[50].right.abs() < 1e-5);
    }

    #[test]
    fn test_stop_rewinds() {
        let (mut r, mut tx, _retired, transport) = renderer(Vec::new());
        let mut out = vec![StereoSample::silence(); 64];
        tx.push(EngineCommand::Play).unwrap();
        r.process(&mut out);
        assert_eq!(transport.position(), 64);

        tx.push(EngineCommand::Stop).unwrap();
        r.process(&mut out);
        assert_eq!(transport.position(), 0);
        assert!(!transport.is_playing());
    }

    #[test]
    fn test_solo_silences_others() {
        let solo = ChannelStrip { solo: true, pan: 1.0, ..Default::default() };
        let other = ChannelStrip { pan: -1.0, ..Default::default() };
        let (mut r, mut tx, _retired, _transport) = renderer(vec![
            (SourceSlot(1), solo, Some(constant_sample(0.25, 8))),
            (SourceSlot(2), other, Some(constant_sample(0.75, 8))),
        ]);
        tx.push(EngineCommand::Play).unwrap();
        let mut out = vec![StereoSample::silence(); 16];
        r.process(&mut out);
        assert!(out[4].left.abs() < 1e-5);
        assert!((out[4].right - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_removed_sample_is_retired() {
        let (mut r, mut tx, mut retired, _transport) =
            renderer(vec![(SourceSlot(7), ChannelStrip::default(), Some(constant_sample(0.1, 4)))]);
        tx.push(EngineCommand::RemoveSource { slot: SourceSlot(7) }).unwrap();
        let mut out = vec![StereoSample::silence(); 4];
        r.process(&mut out);
        assert!(matches!(retired.pop(), Ok(Retired::Sample(_))));
    }

    #[test]
    fn test_stretched_playhead_advances_by_written_frames() {
        let (mut r, mut tx, _retired, transport) = renderer(Vec::new());
        tx.push(EngineCommand::SetTempoRatio(1.5)).unwrap();
        tx.push(EngineCommand::Play).unwrap();
        let mut out = vec![StereoSample::silence(); 100];
        r.process(&mut out);
        assert_eq!(transport.position(), 150);
    }
}
