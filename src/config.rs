//! Engine configuration
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Files are JSON:
//!
//! ```json
//! { "bar_count": 180, "engine": "native", "scratch_dir": "/var/tmp/clipcut" }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::cache::DEFAULT_CACHE_CAPACITY;
use crate::audio::decoder::DEFAULT_STALL_LIMIT;
use crate::audio::transcode::{FfmpegTranscoder, NativeTranscoder, Transcoder};
use crate::audio::types::{DEFAULT_BAR_COUNT, TRIM_SCREEN_BAR_COUNT};

/// Which transcoder commits trims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Stream copy with the ffmpeg binary; output keeps the source format
    Ffmpeg,
    /// In-process; output is WAV
    Native,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bar_count: usize,
    pub trim_bar_count: usize,
    pub cache_capacity: usize,
    pub poll_interval_ms: u64,
    pub stall_limit: usize,
    pub scratch_dir: PathBuf,
    pub engine: EngineKind,
    pub ffmpeg_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bar_count: DEFAULT_BAR_COUNT,
            trim_bar_count: TRIM_SCREEN_BAR_COUNT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            poll_interval_ms: 100,
            stall_limit: DEFAULT_STALL_LIMIT,
            scratch_dir: std::env::temp_dir().join("clipcut"),
            engine: EngineKind::Ffmpeg,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(
            "Loaded config: engine={:?}, bars={}, scratch={}",
            config.engine,
            config.bar_count,
            config.scratch_dir.display()
        );
        Ok(config)
    }

    /// Bars for a waveform view; the trim editor uses its own count
    pub fn bar_count_for(&self, editor: bool) -> usize {
        if editor {
            self.trim_bar_count
        } else {
            self.bar_count
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Build the configured transcoder
    pub fn transcoder(&self) -> Arc<dyn Transcoder> {
        match self.engine {
            EngineKind::Ffmpeg => Arc::new(FfmpegTranscoder::new(self.ffmpeg_path.clone())),
            EngineKind::Native => Arc::new(NativeTranscoder::new(self.stall_limit)),
        }
    }
}
