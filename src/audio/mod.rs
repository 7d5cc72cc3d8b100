// src/audio/mod.rs

pub mod cache;
pub mod controller;
pub mod decoder;
pub mod encoder;
pub mod playback;
pub mod transcode;
pub mod trim;
pub mod types;
pub mod waveform;

// Re-export commonly used items
pub use cache::{WaveformCache, DEFAULT_CACHE_CAPACITY};
pub use controller::{PlaybackController, DEFAULT_POLL_INTERVAL};
pub use decoder::{media_duration_ms, PcmChunk, PcmDecoder};
pub use encoder::encode_wav;
pub use playback::{CpalPlayer, CpalPlayerLoader, PlayerLoader, SeekablePlayer};
pub use transcode::{FfmpegTranscoder, NativeTranscoder, SegmentRange, Transcoder};
pub use trim::SegmentSplicer;
pub use types::{
    clamp_bar_count, AudioSource, PlaybackState, PlaybackStatus, TrimMode, TrimResult,
    TrimSelection, WaveformResult, DEFAULT_BAR_COUNT, MAX_BAR_COUNT, MIN_BAR_COUNT,
    MIN_SELECTION_MS, TRIM_SCREEN_BAR_COUNT,
};
pub use waveform::{generate_waveform, PeakReducer, SymphoniaWaveformGenerator, WaveformGenerator};
