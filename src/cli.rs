//! Command line front end

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::audio::decoder::media_duration_ms;
use crate::audio::types::{TrimMode, WaveformResult};
use crate::config::{EngineConfig, EngineKind};
use crate::service::AudioEngine;

#[derive(Parser, Debug)]
#[command(name = "clipcut")]
#[command(about = "Waveforms, loop previews and keep/delete trims for audio files", long_about = None)]
#[command(version)]
pub struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the waveform of an audio file
    Waveform {
        /// Input audio file (MP3, M4A, FLAC, WAV, OGG, ...)
        input: String,

        /// Number of bars, clamped to 100..=200 (default from config)
        #[arg(short, long)]
        bars: Option<usize>,

        /// Use the trim editor's bar count from config
        #[arg(long, conflicts_with = "bars")]
        editor: bool,

        /// Print the peaks as JSON instead of a bar chart
        #[arg(long)]
        json: bool,
    },

    /// Write a new file keeping or deleting a range
    Trim {
        input: String,

        #[arg(long)]
        start_ms: u64,

        #[arg(long)]
        end_ms: u64,

        #[arg(short, long, default_value = "keep")]
        mode: TrimMode,

        /// Transcoding engine (default from config)
        #[arg(long, value_enum)]
        engine: Option<EngineKind>,

        /// Where the output and scratch files go (default from config)
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },

    /// Preview a keep/delete selection on the default output device
    Play {
        input: String,

        #[arg(long)]
        start_ms: u64,

        #[arg(long)]
        end_ms: u64,

        #[arg(short, long, default_value = "keep")]
        mode: TrimMode,

        /// Play through once instead of looping
        #[arg(long)]
        once: bool,

        /// Stop after this many seconds
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },

    /// Show size, type and duration of an audio file
    Info { input: String },
}

/// Run one parsed command to completion
pub async fn execute(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Waveform {
            input,
            bars,
            editor,
            json,
        } => {
            let bars = bars.unwrap_or_else(|| config.bar_count_for(editor));
            let engine = AudioEngine::new(config);
            let waveform = engine
                .generate(&input, bars)
                .await
                .with_context(|| format!("Failed to generate waveform for {}", input))?;

            if json {
                println!("{}", serde_json::to_string(&*waveform)?);
            } else {
                println!("{}", input);
                println!(
                    "{} bars, {:.2} seconds",
                    waveform.bar_count(),
                    waveform.duration_ms as f64 / 1000.0
                );
                println!("{}", render_bars(&waveform));
            }
        }

        Command::Trim {
            input,
            start_ms,
            end_ms,
            mode,
            engine,
            scratch_dir,
        } => {
            if let Some(kind) = engine {
                config.engine = kind;
            }
            if let Some(dir) = scratch_dir {
                config.scratch_dir = dir;
            }

            let engine = AudioEngine::new(config);
            let started = Instant::now();
            let result = engine
                .trim(&input, start_ms, end_ms, mode)
                .await
                .with_context(|| format!("Failed to {} {}ms..{}ms of {}", mode, start_ms, end_ms, input))?;

            tracing::info!("Trim finished in {:.2}s", started.elapsed().as_secs_f64());
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Play {
            input,
            start_ms,
            end_ms,
            mode,
            once,
            seconds,
        } => {
            let poll = config.poll_interval();
            let engine = AudioEngine::new(config);
            engine.subscribe_position(|position| tracing::debug!("Position {}ms", position));

            engine
                .play_segment(&input, start_ms, end_ms, !once, mode)
                .await
                .with_context(|| format!("Failed to preview {}", input))?;

            let limit = Duration::from_secs(seconds);
            let started = Instant::now();
            while started.elapsed() < limit && engine.is_playing() {
                tokio::time::sleep(poll).await;
            }

            engine.stop();
        }

        Command::Info { input } => {
            let engine = AudioEngine::new(config);
            let source = engine.describe(&input)?;
            let duration_ms = media_duration_ms(&input)?;

            println!("{}", serde_json::to_string_pretty(&source)?);
            println!("duration_ms: {}", duration_ms);
        }
    }

    Ok(())
}

/// One block character per bar, height following the peak
fn render_bars(waveform: &WaveformResult) -> String {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    waveform
        .peaks
        .iter()
        .map(|&peak| {
            let level = (peak.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[level]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_trim() {
        let cli = Cli::try_parse_from([
            "clipcut",
            "trim",
            "memo.m4a",
            "--start-ms",
            "2000",
            "--end-ms",
            "8000",
            "--mode",
            "delete",
            "--engine",
            "native",
        ])
        .unwrap();

        match cli.command {
            Command::Trim {
                input,
                start_ms,
                end_ms,
                mode,
                engine,
                scratch_dir,
            } => {
                assert_eq!(input, "memo.m4a");
                assert_eq!((start_ms, end_ms), (2000, 8000));
                assert_eq!(mode, TrimMode::Delete);
                assert_eq!(engine, Some(EngineKind::Native));
                assert_eq!(scratch_dir, None);
            }
            other => panic!("Expected trim, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["clipcut", "waveform", "a.mp3", "--verbose", "--json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Waveform { json: true, bars: None, .. }));
    }

    #[test]
    fn test_parse_editor_waveform() {
        let cli = Cli::try_parse_from(["clipcut", "waveform", "a.mp3", "--editor"]).unwrap();
        assert!(matches!(cli.command, Command::Waveform { editor: true, bars: None, .. }));

        let both = Cli::try_parse_from(["clipcut", "waveform", "a.mp3", "--editor", "--bars", "150"]);
        assert!(both.is_err());
    }

    #[test]
    fn test_bad_mode_is_rejected() {
        let result = Cli::try_parse_from([
            "clipcut", "play", "a.mp3", "--start-ms", "0", "--end-ms", "2000", "--mode", "crop",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_render_bars() {
        let waveform = WaveformResult {
            peaks: vec![0.0, 0.5, 1.0],
            duration_ms: 1000,
        };
        assert_eq!(render_bars(&waveform), "▁▅█");
    }
}
