// src/audio/transcode.rs
//! Engines that cut and join audio files for the segment splicer

use hound::{SampleFormat, WavReader, WavWriter};
use std::ffi::OsString;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::audio::decoder::{PcmDecoder, DEFAULT_STALL_LIMIT};
use crate::audio::encoder::write_decoded_wav;
use crate::error::{AudioError, Result};

/// A span of the source to copy; `end_ms: None` runs to the end of the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub start_ms: u64,
    pub end_ms: Option<u64>,
}

impl SegmentRange {
    pub fn between(start_ms: u64, end_ms: u64) -> Self {
        Self {
            start_ms,
            end_ms: Some(end_ms),
        }
    }

    pub fn to_end(start_ms: u64) -> Self {
        Self {
            start_ms,
            end_ms: None,
        }
    }
}

/// Cuts and joins media files
///
/// Implementations block; callers run them off the async runtime.
pub trait Transcoder: Send + Sync {
    /// File extension (without the dot) of outputs produced from `input`
    fn container_extension(&self, input: &Path) -> String;

    /// Copy `range` of `input` into `output`
    fn extract(&self, input: &Path, range: SegmentRange, output: &Path) -> Result<()>;

    /// Join `parts` in order into `output`
    ///
    /// `manifest` is a scratch path the engine may write a part list to. The
    /// caller owns it and removes it afterwards.
    fn concat(&self, parts: &[PathBuf], output: &Path, manifest: &Path) -> Result<()>;
}

/// Stream copy through an external ffmpeg binary
///
/// No re-encode happens, so outputs keep the source container and codec.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn extract_args(input: &Path, range: SegmentRange, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-y".into(), "-i".into()];
        args.push(input.into());
        args.push("-ss".into());
        args.push(seconds(range.start_ms).into());
        if let Some(end_ms) = range.end_ms {
            args.push("-t".into());
            args.push(seconds(end_ms.saturating_sub(range.start_ms)).into());
        }
        args.push("-c".into());
        args.push("copy".into());
        args.push(output.into());
        args
    }

    fn concat_args(manifest: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-y", "-f", "concat", "-safe", "0", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(manifest.into());
        args.push("-c".into());
        args.push("copy".into());
        args.push(output.into());
        args
    }

    fn run(&self, args: &[OsString]) -> Result<()> {
        tracing::debug!("Running {} {:?}", self.binary.display(), args);

        let output = Command::new(&self.binary).args(args).output().map_err(|e| {
            AudioError::transcode(
                format!("Failed to launch '{}'", self.binary.display()),
                e.to_string(),
            )
        })?;

        if !output.status.success() {
            let diagnostics = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(AudioError::transcode(
                format!("{} exited with {}", self.binary.display(), output.status),
                diagnostics.trim_end().to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn container_extension(&self, input: &Path) -> String {
        input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "mp3".to_string())
    }

    fn extract(&self, input: &Path, range: SegmentRange, output: &Path) -> Result<()> {
        self.run(&Self::extract_args(input, range, output))
    }

    fn concat(&self, parts: &[PathBuf], output: &Path, manifest: &Path) -> Result<()> {
        std::fs::write(manifest, concat_manifest(parts))?;
        self.run(&Self::concat_args(manifest, output))
    }
}

/// `ms` as ffmpeg seconds with millisecond precision
fn seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Part list for ffmpeg's concat demuxer
fn concat_manifest(parts: &[PathBuf]) -> String {
    parts
        .iter()
        .map(|part| {
            // Single quotes close, escape and reopen: ' -> '\''
            let quoted = part.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", quoted)
        })
        .collect()
}

/// In-process engine writing WAV output
///
/// WAV sources are copied frame-accurately without decoding. Anything else
/// is decoded with symphonia and written as 16-bit PCM.
#[derive(Debug, Clone)]
pub struct NativeTranscoder {
    stall_limit: usize,
}

impl NativeTranscoder {
    pub fn new(stall_limit: usize) -> Self {
        Self { stall_limit }
    }

    fn extract_decoded(&self, input: &Path, range: SegmentRange, output: &Path) -> Result<()> {
        let mut decoder = PcmDecoder::open_with_stall_limit(input, self.stall_limit)?;
        let rate = decoder.sample_rate();

        if range.start_ms > 0 {
            decoder.seek(range.start_ms)?;
        }

        let budget = range
            .end_ms
            .map(|end_ms| ms_to_frames(end_ms, rate).saturating_sub(ms_to_frames(range.start_ms, rate)));

        write_decoded_wav(&mut decoder, budget, output)?;
        Ok(())
    }
}

impl Default for NativeTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_LIMIT)
    }
}

impl Transcoder for NativeTranscoder {
    fn container_extension(&self, _input: &Path) -> String {
        "wav".to_string()
    }

    fn extract(&self, input: &Path, range: SegmentRange, output: &Path) -> Result<()> {
        if is_wav_file(input) {
            extract_wav(input, range, output)
        } else {
            self.extract_decoded(input, range, output)
        }
    }

    fn concat(&self, parts: &[PathBuf], output: &Path, _manifest: &Path) -> Result<()> {
        let first = parts
            .first()
            .ok_or_else(|| AudioError::transcode("No parts to join", String::new()))?;
        let spec = WavReader::open(first)?.spec();
        let mut writer = WavWriter::create(output, spec)?;

        for part in parts {
            let mut reader = WavReader::open(part)?;
            if reader.spec() != spec {
                return Err(AudioError::transcode(
                    format!(
                        "Cannot join '{}': format differs from '{}'",
                        part.display(),
                        first.display()
                    ),
                    format!("{:?} vs {:?}", reader.spec(), spec),
                ));
            }
            let count = reader.len() as usize;
            copy_pcm(&mut reader, &mut writer, count)?;
        }

        writer.finalize()?;
        Ok(())
    }
}

/// Check if a file is a WAV file by examining its extension
fn is_wav_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    ms * sample_rate as u64 / 1000
}

/// Copy a frame range of a WAV file without decoding
fn extract_wav(input: &Path, range: SegmentRange, output: &Path) -> Result<()> {
    let mut reader = WavReader::open(input)?;
    let spec = reader.spec();
    let total = reader.duration();

    let start = (ms_to_frames(range.start_ms, spec.sample_rate) as u32).min(total);
    let end = range
        .end_ms
        .map_or(total, |end_ms| (ms_to_frames(end_ms, spec.sample_rate) as u32).min(total))
        .max(start);

    reader.seek(start)?;
    let mut writer = WavWriter::create(output, spec)?;
    copy_pcm(&mut reader, &mut writer, (end - start) as usize * spec.channels as usize)?;
    writer.finalize()?;

    tracing::debug!("Copied frames {}..{} of {}", start, end, input.display());
    Ok(())
}

/// Copy `count` interleaved samples in the reader's own sample format
fn copy_pcm<R, W>(reader: &mut WavReader<R>, writer: &mut WavWriter<W>, count: usize) -> Result<()>
where
    R: Read,
    W: Write + Seek,
{
    let spec = reader.spec();
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => {
            for sample in reader.samples::<f32>().take(count) {
                writer.write_sample(sample?)?;
            }
        }
        (SampleFormat::Int, 8) => {
            for sample in reader.samples::<i8>().take(count) {
                writer.write_sample(sample?)?;
            }
        }
        (SampleFormat::Int, 16) => {
            for sample in reader.samples::<i16>().take(count) {
                writer.write_sample(sample?)?;
            }
        }
        (SampleFormat::Int, 24) | (SampleFormat::Int, 32) => {
            for sample in reader.samples::<i32>().take(count) {
                writer.write_sample(sample?)?;
            }
        }
        (format, bits) => {
            return Err(AudioError::UnsupportedCodec(format!(
                "{}-bit {:?} WAV",
                bits, format
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encoder::encode_wav;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    fn ramp_wav(dir: &Path, name: &str, seconds: u32, rate: u32, channels: u16) -> PathBuf {
        let path = dir.join(name);
        let frames = (seconds * rate) as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            for _ in 0..channels {
                samples.push((i % 30_000) as i16);
            }
        }
        encode_wav(&samples, rate, channels, &path).unwrap();
        path
    }

    #[test]
    fn test_ffmpeg_extract_args() {
        let args = FfmpegTranscoder::extract_args(
            Path::new("in.mp3"),
            SegmentRange::between(2500, 8000),
            Path::new("out.mp3"),
        );
        assert_eq!(
            strings(&args),
            vec![
                "-hide_banner", "-y", "-i", "in.mp3", "-ss", "2.500", "-t", "5.500", "-c", "copy",
                "out.mp3"
            ]
        );

        // Open-ended ranges run to the end of the file
        let args = FfmpegTranscoder::extract_args(
            Path::new("in.mp3"),
            SegmentRange::to_end(4000),
            Path::new("tail.mp3"),
        );
        assert!(!strings(&args).contains(&"-t".to_string()));
    }

    #[test]
    fn test_ffmpeg_concat_args_and_manifest() {
        let args = FfmpegTranscoder::concat_args(Path::new("list.txt"), Path::new("out.mp3"));
        assert_eq!(
            strings(&args),
            vec![
                "-hide_banner", "-y", "-f", "concat", "-safe", "0", "-i", "list.txt", "-c", "copy",
                "out.mp3"
            ]
        );

        let manifest = concat_manifest(&[
            PathBuf::from("/tmp/part1.mp3"),
            PathBuf::from("/tmp/it's here.mp3"),
        ]);
        assert_eq!(
            manifest,
            "file '/tmp/part1.mp3'\nfile '/tmp/it'\\''s here.mp3'\n"
        );
    }

    #[test]
    fn test_ffmpeg_extension_follows_source() {
        let ffmpeg = FfmpegTranscoder::default();
        assert_eq!(ffmpeg.container_extension(Path::new("Memo.M4A")), "m4a");
        assert_eq!(ffmpeg.container_extension(Path::new("noext")), "mp3");
        assert_eq!(NativeTranscoder::default().container_extension(Path::new("a.mp3")), "wav");
    }

    #[test]
    fn test_missing_binary_is_transcode_failure() {
        let ffmpeg = FfmpegTranscoder::new("/nonexistent/bin/ffmpeg");
        let result = ffmpeg.extract(
            Path::new("in.mp3"),
            SegmentRange::between(0, 1000),
            Path::new("out.mp3"),
        );
        assert!(matches!(result, Err(AudioError::TranscodeFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_transcode_failure() {
        // `false` ignores its arguments and exits 1
        let engine = FfmpegTranscoder::new("false");
        match engine.extract(
            Path::new("in.mp3"),
            SegmentRange::between(0, 1000),
            Path::new("out.mp3"),
        ) {
            Err(AudioError::TranscodeFailed { message, .. }) => assert!(message.contains("exited")),
            other => panic!("Expected TranscodeFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_native_wav_extract_is_frame_accurate() {
        let dir = tempfile::tempdir().unwrap();
        let input = ramp_wav(dir.path(), "ramp.wav", 3, 8000, 2);
        let output = dir.path().join("cut.wav");

        NativeTranscoder::default()
            .extract(&input, SegmentRange::between(500, 1500), &output)
            .unwrap();

        let mut reader = WavReader::open(&output).unwrap();
        assert_eq!(reader.duration(), 8000);
        let first: Vec<i16> = reader.samples::<i16>().take(2).map(|s| s.unwrap()).collect();
        assert_eq!(first, vec![4000, 4000]);
    }

    #[test]
    fn test_native_decoded_extract() {
        let dir = tempfile::tempdir().unwrap();
        let input = ramp_wav(dir.path(), "ramp.wav", 3, 8000, 1);
        let output = dir.path().join("decoded.wav");

        NativeTranscoder::default()
            .extract_decoded(&input, SegmentRange::to_end(1000), &output)
            .unwrap();

        let mut reader = WavReader::open(&output).unwrap();
        assert_eq!(reader.duration(), 16000);
        assert_eq!(reader.samples::<i16>().next().unwrap().unwrap(), 8000);
    }

    #[test]
    fn test_native_concat_joins_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        encode_wav(&[1, 2, 3], 8000, 1, &a).unwrap();
        encode_wav(&[4, 5], 8000, 1, &b).unwrap();

        let output = dir.path().join("joined.wav");
        NativeTranscoder::default()
            .concat(&[a, b], &output, &dir.path().join("unused.txt"))
            .unwrap();

        let mut reader = WavReader::open(&output).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_native_concat_rejects_mismatched_formats() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        encode_wav(&[1, 2, 3], 8000, 1, &a).unwrap();
        encode_wav(&[4, 5], 16000, 1, &b).unwrap();

        let result = NativeTranscoder::default().concat(
            &[a, b],
            &dir.path().join("joined.wav"),
            &dir.path().join("unused.txt"),
        );
        assert!(matches!(result, Err(AudioError::TranscodeFailed { .. })));
    }
}
