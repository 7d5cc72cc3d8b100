// src/audio/waveform.rs

use std::path::Path;

use crate::audio::decoder::{PcmDecoder, DEFAULT_STALL_LIMIT};
use crate::audio::types::{clamp_bar_count, WaveformResult};
use crate::error::Result;

/// Single-pass max-hold reducer from a frame stream to `bar_count` peaks
///
/// Frames are bucketed by `frames_seen / frames_per_bar`, where
/// `frames_per_bar` comes from the stream's estimated length. Overflow past
/// the estimate lands in the last bar. Memory is O(bar_count).
#[derive(Debug, Clone)]
pub struct PeakReducer {
    peaks: Vec<f32>,
    frames_per_bar: u64,
    frames_seen: u64,
}

impl PeakReducer {
    pub fn new(bar_count: usize, estimated_total_frames: u64) -> Self {
        let bar_count = bar_count.max(1);
        Self {
            peaks: vec![0.0; bar_count],
            frames_per_bar: (estimated_total_frames / bar_count as u64).max(1),
            frames_seen: 0,
        }
    }

    pub fn frames_per_bar(&self) -> u64 {
        self.frames_per_bar
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Feed one frame's absolute amplitude
    #[inline]
    pub fn push(&mut self, amplitude: f32) {
        let last = self.peaks.len() - 1;
        let bar = ((self.frames_seen / self.frames_per_bar) as usize).min(last);
        if amplitude > self.peaks[bar] {
            self.peaks[bar] = amplitude;
        }
        self.frames_seen += 1;
    }

    pub fn extend<I: IntoIterator<Item = f32>>(&mut self, amplitudes: I) {
        for amplitude in amplitudes {
            self.push(amplitude);
        }
    }

    /// Normalize so the loudest bar is exactly 1.0 (silence stays all-zero)
    pub fn finish(mut self) -> Vec<f32> {
        let max_peak = self.peaks.iter().copied().fold(0.0f32, f32::max);
        if max_peak > 0.0 {
            for peak in &mut self.peaks {
                *peak /= max_peak;
            }
        }
        self.peaks
    }
}

/// Anything that can turn a source into a waveform
///
/// The cache is written against this trait so that decoding can be swapped.
pub trait WaveformGenerator: Send + Sync + 'static {
    fn generate(&self, path: &Path, bar_count: usize) -> Result<WaveformResult>;
}

/// Waveform generation through the symphonia PCM decoder
#[derive(Debug, Clone)]
pub struct SymphoniaWaveformGenerator {
    stall_limit: usize,
}

impl SymphoniaWaveformGenerator {
    pub fn new(stall_limit: usize) -> Self {
        Self { stall_limit }
    }
}

impl Default for SymphoniaWaveformGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_LIMIT)
    }
}

impl WaveformGenerator for SymphoniaWaveformGenerator {
    fn generate(&self, path: &Path, bar_count: usize) -> Result<WaveformResult> {
        reduce_source(path, bar_count, self.stall_limit)
    }
}

/// Decode an audio file into normalized waveform peaks
///
/// `bar_count` is clamped to [100, 200]. The file is streamed once and only
/// the peak array is kept, so long recordings cost no more memory than short
/// ones.
///
/// # Example
/// ```no_run
/// use clipcut_lib::audio::generate_waveform;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let waveform = generate_waveform("voice_memo.m4a", 160)?;
/// println!("{} bars over {} ms", waveform.peaks.len(), waveform.duration_ms);
/// # Ok(())
/// # }
/// ```
pub fn generate_waveform<P: AsRef<Path>>(path: P, bar_count: usize) -> Result<WaveformResult> {
    reduce_source(path.as_ref(), bar_count, DEFAULT_STALL_LIMIT)
}

fn reduce_source(path: &Path, bar_count: usize, stall_limit: usize) -> Result<WaveformResult> {
    let bar_count = clamp_bar_count(bar_count);
    let decoder = PcmDecoder::open_with_stall_limit(path, stall_limit)?;
    let duration_ms = decoder.duration_ms();

    let mut reducer = PeakReducer::new(bar_count, decoder.total_frames());
    tracing::debug!(
        "Reducing {} into {} bars ({} frames per bar)",
        path.display(),
        bar_count,
        reducer.frames_per_bar()
    );

    for chunk in decoder {
        let chunk = chunk?;
        reducer.extend(chunk.frame_amplitudes());
    }

    tracing::debug!("Processed {} frames", reducer.frames_seen());

    Ok(WaveformResult {
        peaks: reducer.finish(),
        duration_ms,
    })
}
