// src/audio/playback.rs
//! Seekable audio players used for trim previews
//!
//! The loop controller only needs coarse control over a player: load, play,
//! pause, seek and report position. [`CpalPlayer`] provides that on top of
//! cpal, decoding with the crate's own PCM decoder.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::decoder::PcmDecoder;
use crate::error::{AudioError, Result};

/// A loaded, seekable audio source
///
/// Dropping the player releases it.
pub trait SeekablePlayer: Send {
    fn duration_ms(&self) -> u64;
    fn position_ms(&self) -> u64;
    fn seek_to(&mut self, position_ms: u64);
    fn play(&mut self);
    fn pause(&mut self);
    /// False when paused or when playback ran off the end of the source
    fn is_playing(&self) -> bool;
}

/// Creates players; loading may block while the source is decoded
pub trait PlayerLoader: Send + Sync + 'static {
    fn load(&self, source: &Path) -> Result<Box<dyn SeekablePlayer>>;
}

/// Shared state for audio playback - all atomic for thread safety
///
/// The read position is owned here rather than by the playback thread, so
/// a seek reaches the stream callback immediately.
struct SharedPlaybackState {
    is_playing: AtomicBool,
    should_stop: AtomicBool,
    /// Interleaved sample index the next callback reads from
    read_sample: AtomicU64,
    total_samples: AtomicU64,
    channels: AtomicU64,
    sample_rate: AtomicU64,
}

impl SharedPlaybackState {
    fn new() -> Self {
        Self {
            is_playing: AtomicBool::new(false),
            should_stop: AtomicBool::new(false),
            read_sample: AtomicU64::new(0),
            total_samples: AtomicU64::new(0),
            channels: AtomicU64::new(2),
            sample_rate: AtomicU64::new(44100),
        }
    }

    fn prepare(&self, sample_rate: u32, channels: usize, total_samples: usize) {
        self.sample_rate.store(sample_rate as u64, Ordering::SeqCst);
        self.channels.store(channels.max(1) as u64, Ordering::SeqCst);
        self.total_samples.store(total_samples as u64, Ordering::SeqCst);
        self.read_sample.store(0, Ordering::SeqCst);
    }

    fn channels(&self) -> u64 {
        self.channels.load(Ordering::SeqCst).max(1)
    }

    fn total_frames(&self) -> u64 {
        self.total_samples.load(Ordering::SeqCst) / self.channels()
    }

    fn position_frame(&self) -> u64 {
        self.read_sample.load(Ordering::SeqCst) / self.channels()
    }

    fn seek_frame(&self, frame: u64) {
        let total = self.total_samples.load(Ordering::SeqCst);
        let sample = frame.saturating_mul(self.channels()).min(total);
        self.read_sample.store(sample, Ordering::SeqCst);
    }

    fn at_end(&self) -> bool {
        self.read_sample.load(Ordering::SeqCst) >= self.total_samples.load(Ordering::SeqCst)
    }

    /// Playing and not held at the end of the source
    fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::SeqCst) && !self.at_end()
    }

    /// Fill one output buffer and advance the read position
    fn render(&self, samples: &[f32], data: &mut [f32]) {
        if !self.is_playing.load(Ordering::SeqCst) {
            // Output silence when paused
            data.fill(0.0);
            return;
        }

        let pos = self.read_sample.load(Ordering::SeqCst);
        let start = pos as usize;
        for (i, sample) in data.iter_mut().enumerate() {
            *sample = samples.get(start + i).copied().unwrap_or(0.0);
        }
        self.advance(pos, data.len());
    }

    /// Move the read position past `len` samples read at `from`
    ///
    /// A seek that landed while the buffer was being filled wins.
    fn advance(&self, from: u64, len: usize) {
        let total = self.total_samples.load(Ordering::SeqCst);
        let to = from.saturating_add(len as u64).min(total);
        let _ = self
            .read_sample
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Player that decodes a file up front and streams it through cpal
///
/// The cpal Stream lives entirely in a background thread, so the player
/// itself is Send.
pub struct CpalPlayer {
    state: Arc<SharedPlaybackState>,
    playback_thread: Option<JoinHandle<()>>,
    source: PathBuf,
}

impl CpalPlayer {
    /// Decode `path`, open the default output device and wait until ready
    ///
    /// The player starts paused at position 0.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = Arc::new(SharedPlaybackState::new());
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_state = Arc::clone(&state);
        let thread_path = path.clone();
        let handle = thread::spawn(move || {
            run_playback(thread_path, thread_state, ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!("Player ready for {}", path.display());
                Ok(Self {
                    state,
                    playback_thread: Some(handle),
                    source: path,
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::PlaybackFailed(format!(
                    "Playback thread for '{}' exited before loading",
                    path.display()
                )))
            }
        }
    }

    fn frames_to_ms(&self, frames: u64) -> u64 {
        let rate = self.state.sample_rate.load(Ordering::SeqCst).max(1);
        frames * 1000 / rate
    }
}

impl SeekablePlayer for CpalPlayer {
    fn duration_ms(&self) -> u64 {
        self.frames_to_ms(self.state.total_frames())
    }

    fn position_ms(&self) -> u64 {
        self.frames_to_ms(self.state.position_frame())
    }

    fn seek_to(&mut self, position_ms: u64) {
        let rate = self.state.sample_rate.load(Ordering::SeqCst);
        self.state.seek_frame(position_ms * rate / 1000);
    }

    fn play(&mut self) {
        self.state.is_playing.store(true, Ordering::SeqCst);
    }

    fn pause(&mut self) {
        self.state.is_playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.state.is_playing()
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        self.state.should_stop.store(true, Ordering::SeqCst);
        self.state.is_playing.store(false, Ordering::SeqCst);

        // Wait for playback thread to finish
        if let Some(handle) = self.playback_thread.take() {
            let _ = handle.join();
        }
        tracing::debug!("Released player for {}", self.source.display());
    }
}

/// Loads [`CpalPlayer`]s on the default output device
#[derive(Debug, Default, Clone)]
pub struct CpalPlayerLoader;

impl PlayerLoader for CpalPlayerLoader {
    fn load(&self, source: &Path) -> Result<Box<dyn SeekablePlayer>> {
        Ok(Box::new(CpalPlayer::load(source)?))
    }
}

/// Run the audio playback loop in a dedicated thread
///
/// Reports load success or failure once through `ready`.
fn run_playback(path: PathBuf, state: Arc<SharedPlaybackState>, ready: mpsc::Sender<Result<()>>) {
    let _stream = match open_stream(&path, &state) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // The stream must stay on this thread until the player is dropped
    while !state.should_stop.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(10));
    }
}

fn open_stream(path: &Path, state: &Arc<SharedPlaybackState>) -> Result<cpal::Stream> {
    let decoder = PcmDecoder::open(path)?;
    let sample_rate = decoder.sample_rate();
    let mut channels = decoder.channels().unwrap_or(2);

    // Decode the entire file first; previews are short-lived
    let mut all_samples: Vec<f32> = Vec::new();
    for chunk in decoder {
        let chunk = chunk?;
        channels = chunk.channels;
        all_samples.extend(chunk.normalized());
    }

    if all_samples.is_empty() {
        return Err(AudioError::PlaybackFailed(format!(
            "No audio samples decoded from '{}'",
            path.display()
        )));
    }

    state.prepare(sample_rate, channels, all_samples.len());

    // Set up cpal audio output
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::PlaybackFailed("No output device available".to_string()))?;

    let config = StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let samples = all_samples;
    let state_clone = Arc::clone(state);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                state_clone.render(&samples, data);
            },
            |err| {
                tracing::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::PlaybackFailed(format!("Failed to build stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| AudioError::PlaybackFailed(format!("Failed to start stream: {}", e)))?;

    Ok(stream)
}
