// src/audio/decoder.rs

use std::fs::File;
use std::io;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecType, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{AudioError, Result};

/// Sample rate assumed when a track does not declare one
pub const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Consecutive empty or undecodable packets tolerated before giving up
pub const DEFAULT_STALL_LIMIT: usize = 100;

/// Convert a signed 16-bit sample to an amplitude in [-1.0, 1.0]
#[inline]
pub fn normalize_sample(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// One decoded packet worth of interleaved 16-bit PCM
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    /// Interleaved samples: [L, R, L, R, ...] or [M, M, ...]
    pub samples: Vec<i16>,
    pub channels: usize,
}

impl PcmChunk {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    /// Samples as floats in [-1.0, 1.0], interleaving preserved
    pub fn normalized(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().map(|&s| normalize_sample(s))
    }

    /// Mono reduction: the loudest absolute amplitude of each frame
    pub fn frame_amplitudes(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.chunks(self.channels.max(1)).map(|frame| {
            frame
                .iter()
                .map(|&s| normalize_sample(s).abs())
                .fold(0.0f32, f32::max)
        })
    }
}

/// Streaming decoder producing 16-bit PCM chunks
///
/// Supports: MP3, AAC/M4A, FLAC, WAV, OGG Vorbis and the audio track of
/// compatible video containers, via symphonia.
///
/// The demuxer and codec are owned by this value and released when it is
/// dropped, whether the stream was read to the end or abandoned early.
/// Iteration is not restartable; open a new decoder to read again.
///
/// # Example
/// ```no_run
/// use clipcut_lib::audio::PcmDecoder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let decoder = PcmDecoder::open("ringtone.mp3")?;
/// println!("{} ms at {} Hz", decoder.duration_ms(), decoder.sample_rate());
/// for chunk in decoder {
///     let chunk = chunk?;
///     println!("{} frames", chunk.frames());
/// }
/// # Ok(())
/// # }
/// ```
pub struct PcmDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: Option<usize>,
    total_frames: u64,
    skip_frames: u64,
    stall_limit: usize,
    finished: bool,
}

impl PcmDecoder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_stall_limit(path, DEFAULT_STALL_LIMIT)
    }

    pub fn open_with_stall_limit<P: AsRef<Path>>(path: P, stall_limit: usize) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let format = probe_format(path)?;

        // Find audio track and extract needed parameters
        let (track_id, codec_params) = {
            let track = format
                .default_track()
                .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
                .or_else(|| {
                    format
                        .tracks()
                        .iter()
                        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
                })
                .ok_or_else(|| AudioError::NoAudioTrackFound(path_str.clone()))?;

            (track.id, track.codec_params.clone())
        };

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| {
                AudioError::UnsupportedCodec(format!("{}: {}", codec_name(codec_params.codec), e))
            })?;

        let sample_rate = codec_params.sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE);

        // Channels may be missing for some MP3s; the first chunk fills them in
        let channels = codec_params.channels.map(|c| c.count());

        let total_frames = match codec_params.n_frames {
            Some(n) => n,
            None => {
                tracing::debug!("Frame count missing for {}, scanning packets", path_str);
                count_frames(path, track_id)?
            }
        };

        tracing::debug!(
            "Opened {}: codec={}, {} Hz, {:?} channels, {} frames",
            path_str,
            codec_name(codec_params.codec),
            sample_rate,
            channels,
            total_frames
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            total_frames,
            skip_frames: 0,
            stall_limit: stall_limit.max(1),
            finished: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count, if known before the first chunk
    pub fn channels(&self) -> Option<usize> {
        self.channels
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn duration_us(&self) -> u64 {
        (self.total_frames as u128 * 1_000_000 / self.sample_rate.max(1) as u128) as u64
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_us() / 1000
    }

    /// Seek so that the next chunk starts exactly at `position_ms`
    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        let ts = position_ms * self.sample_rate as u64 / 1000;

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| AudioError::DecodeFailed(format!("Seek to {}ms failed: {}", position_ms, e)))?;

        self.decoder.reset();
        // The demuxer lands on a packet boundary at or before the target
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.finished = false;
        Ok(())
    }

    fn stalled(&mut self, polls: usize) -> Option<Result<PcmChunk>> {
        self.finished = true;
        Some(Err(AudioError::DecodeStalled { polls }))
    }
}

impl Iterator for PcmDecoder {
    type Item = Result<PcmChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut empty_polls = 0usize;

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    return None;
                }
                Err(SymphoniaError::ResetRequired) => {
                    // Chained streams with new parameters; treat as end of this one
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(AudioError::DecodeFailed(format!(
                        "Failed to read packet: {}",
                        e
                    ))));
                }
            };

            // Skip packets from other tracks (e.g., video, album art)
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) if decoded.frames() > 0 => {
                    let spec = *decoded.spec();
                    let channels = spec.channels.count().max(1);
                    let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    let mut samples = buffer.samples().to_vec();

                    if self.skip_frames > 0 {
                        let frames = (samples.len() / channels) as u64;
                        let skip = self.skip_frames.min(frames);
                        samples.drain(..(skip as usize * channels));
                        self.skip_frames -= skip;
                        if samples.is_empty() {
                            continue;
                        }
                    }

                    self.channels = Some(channels);
                    return Some(Ok(PcmChunk { samples, channels }));
                }
                Ok(_) => {
                    empty_polls += 1;
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    // Corrupt packet; symphonia can continue with the next one
                    tracing::warn!("Skipping undecodable packet: {}", msg);
                    empty_polls += 1;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(AudioError::DecodeFailed(format!("Decode error: {}", e))));
                }
            }

            if empty_polls >= self.stall_limit {
                return self.stalled(empty_polls);
            }
        }
    }
}

/// Probe a file's duration in milliseconds
pub fn media_duration_ms<P: AsRef<Path>>(path: P) -> Result<u64> {
    Ok(PcmDecoder::open(path)?.duration_ms())
}

fn probe_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let path_str = path.to_string_lossy().to_string();

    let file = File::open(path).map_err(|e| AudioError::unreadable(path_str.clone(), e))?;

    // Create a media source stream (buffered reader)
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // Create a hint to help symphonia detect the format
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| match e {
            SymphoniaError::IoError(io_err) => AudioError::unreadable(path_str.clone(), io_err),
            other => AudioError::UnsupportedCodec(format!(
                "Unrecognised container '{}': {}",
                path_str, other
            )),
        })?;

    Ok(probed.format)
}

/// Demux-only pass summing packet durations for containers without a frame count
fn count_frames(path: &Path, track_id: u32) -> Result<u64> {
    let mut format = probe_format(path)?;
    let mut frames = 0u64;

    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => frames += packet.dur,
            Ok(_) => continue,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::warn!("Packet scan stopped early: {}", e);
                break;
            }
        }
    }

    Ok(frames)
}

fn codec_name(codec: CodecType) -> &'static str {
    symphonia::default::get_codecs()
        .get_codec(codec)
        .map(|d| d.short_name)
        .unwrap_or("unknown")
}
