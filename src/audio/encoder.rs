// src/audio/encoder.rs

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::audio::decoder::PcmDecoder;
use crate::error::Result;

fn pcm16_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Encode interleaved 16-bit PCM to a WAV file
///
/// # Example
/// ```
/// use clipcut_lib::audio::encode_wav;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let output_path = std::env::temp_dir().join("clipcut_doc_output.wav");
/// encode_wav(&[0, 16384, -16384, 32767], 44100, 1, &output_path)?;
/// # std::fs::remove_file(&output_path).ok();
/// # Ok(())
/// # }
/// ```
pub fn encode_wav<P: AsRef<Path>>(
    samples: &[i16],
    sample_rate: u32,
    channels: u16,
    output_path: P,
) -> Result<()> {
    let mut writer = WavWriter::create(output_path, pcm16_spec(sample_rate, channels))?;

    for &sample in samples {
        writer.write_sample(sample)?;
    }

    // Finalize the file (writes headers, etc.)
    writer.finalize()?;

    Ok(())
}

/// Stream decoded PCM from the decoder's current position into a 16-bit WAV
///
/// Writes at most `frame_budget` frames (everything remaining when `None`)
/// and returns the number of frames written. Memory use is one packet.
pub(crate) fn write_decoded_wav(
    decoder: &mut PcmDecoder,
    frame_budget: Option<u64>,
    output_path: &Path,
) -> Result<u64> {
    let sample_rate = decoder.sample_rate();
    let mut writer: Option<WavWriter<BufWriter<File>>> = None;
    let mut written = 0u64;

    while frame_budget.map_or(true, |budget| written < budget) {
        let chunk = match decoder.next() {
            Some(chunk) => chunk?,
            None => break,
        };

        if writer.is_none() {
            writer = Some(WavWriter::create(
                output_path,
                pcm16_spec(sample_rate, chunk.channels as u16),
            )?);
        }
        let Some(writer) = writer.as_mut() else {
            break;
        };

        // Calculate how many frames to write from this chunk
        let frames_remaining = frame_budget.map_or(u64::MAX, |budget| budget - written);
        let frames_to_write = (chunk.frames() as u64).min(frames_remaining) as usize;

        for &sample in &chunk.samples[..frames_to_write * chunk.channels] {
            writer.write_sample(sample)?;
        }

        written += frames_to_write as u64;
    }

    // An empty range still yields a valid (empty) file
    let writer = match writer {
        Some(w) => w,
        None => WavWriter::create(
            output_path,
            pcm16_spec(sample_rate, decoder.channels().unwrap_or(1) as u16),
        )?,
    };
    writer.finalize()?;

    tracing::debug!("Wrote {} frames to {}", written, output_path.display());
    Ok(written)
}
