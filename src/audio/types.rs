use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, Result};

/// Fewest bars a waveform may be reduced to
pub const MIN_BAR_COUNT: usize = 100;
/// Most bars a waveform may be reduced to
pub const MAX_BAR_COUNT: usize = 200;
/// Bar count used when the caller has no preference
pub const DEFAULT_BAR_COUNT: usize = 160;
/// Bar count used by the trim editor
pub const TRIM_SCREEN_BAR_COUNT: usize = 125;
/// Narrowest selection the editor and the engine accept
pub const MIN_SELECTION_MS: u64 = 1000;

/// The single authoritative bar-count clamp.
pub fn clamp_bar_count(bar_count: usize) -> usize {
    bar_count.clamp(MIN_BAR_COUNT, MAX_BAR_COUNT)
}

/// Identifies an input audio file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSource {
    pub uri: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl AudioSource {
    /// Stat a file and derive its MIME type from the extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();
        let metadata =
            std::fs::metadata(path).map_err(|e| AudioError::unreadable(path_str.clone(), e))?;

        Ok(Self {
            uri: path_str,
            mime_type: mime_for_path(path).to_string(),
            size_bytes: metadata.len(),
        })
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("ogg") | Some("oga") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Normalized peaks for a bar-chart waveform plus the source duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformResult {
    /// One value per bar, each in [0.0, 1.0]
    pub peaks: Vec<f32>,

    /// Total duration of the source in milliseconds
    pub duration_ms: u64,
}

impl WaveformResult {
    pub fn bar_count(&self) -> usize {
        self.peaks.len()
    }

    /// Map a horizontal pixel offset on a waveform `width` pixels wide to a time
    pub fn position_at(&self, x: f32, width: f32) -> u64 {
        if width <= 0.0 {
            return 0;
        }
        let ratio = (x / width).clamp(0.0, 1.0) as f64;
        (ratio * self.duration_ms as f64).round() as u64
    }

    /// Map a time to a horizontal pixel offset on a waveform `width` pixels wide
    pub fn x_at(&self, position_ms: u64, width: f32) -> f32 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        let ratio = position_ms.min(self.duration_ms) as f64 / self.duration_ms as f64;
        (ratio * width as f64) as f32
    }
}

/// Whether a trim retains or removes the selected range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimMode {
    Keep,
    Delete,
}

impl fmt::Display for TrimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrimMode::Keep => f.write_str("keep"),
            TrimMode::Delete => f.write_str("delete"),
        }
    }
}

impl FromStr for TrimMode {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(TrimMode::Keep),
            "delete" => Ok(TrimMode::Delete),
            other => Err(AudioError::InvalidSelection(format!(
                "unknown trim mode '{}'",
                other
            ))),
        }
    }
}

/// A validated `[start_ms, end_ms)` selection with its trim mode
///
/// Construction and every mutation keep `start < end`, and
/// `end - start >= MIN_SELECTION_MS`. Bounds against the source duration are
/// checked with [`TrimSelection::validate`] once the duration is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrimSelection {
    start_ms: u64,
    end_ms: u64,
    mode: TrimMode,
}

impl TrimSelection {
    /// Create a new selection with validation
    pub fn new(start_ms: u64, end_ms: u64, mode: TrimMode) -> Result<Self> {
        check_range(start_ms, end_ms)?;
        Ok(Self {
            start_ms,
            end_ms,
            mode,
        })
    }

    /// The whole source, as set whenever a new waveform loads
    pub fn full(duration_ms: u64, mode: TrimMode) -> Result<Self> {
        Self::new(0, duration_ms, mode)
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> u64 {
        self.end_ms
    }

    pub fn mode(&self) -> TrimMode {
        self.mode
    }

    pub fn len_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    pub fn set_mode(&mut self, mode: TrimMode) {
        self.mode = mode;
    }

    /// True when `position_ms` lies in `[start, end)`
    pub fn contains(&self, position_ms: u64) -> bool {
        position_ms >= self.start_ms && position_ms < self.end_ms
    }

    /// Check the selection fits inside a source of `duration_ms`
    pub fn validate(&self, duration_ms: u64) -> Result<()> {
        check_range(self.start_ms, self.end_ms)?;
        if self.end_ms > duration_ms {
            return Err(AudioError::InvalidSelection(format!(
                "end ({}ms) exceeds source duration ({}ms)",
                self.end_ms, duration_ms
            )));
        }
        Ok(())
    }

    /// Duration of the audio that survives a commit of this selection
    pub fn output_duration_ms(&self, duration_ms: u64) -> u64 {
        match self.mode {
            TrimMode::Keep => self.len_ms(),
            TrimMode::Delete => duration_ms.saturating_sub(self.len_ms()),
        }
    }

    /// Move the start handle, clamped so the selection stays valid
    pub fn drag_start(&mut self, to_ms: u64) {
        let latest = self.end_ms.saturating_sub(MIN_SELECTION_MS);
        self.start_ms = to_ms.min(latest);
    }

    /// Move the end handle, clamped so the selection stays valid
    pub fn drag_end(&mut self, to_ms: u64, duration_ms: u64) {
        let earliest = self.start_ms + MIN_SELECTION_MS;
        self.end_ms = to_ms.clamp(earliest, duration_ms.max(earliest));
    }

    /// Set the start to the playhead, rejecting positions that break the invariant
    pub fn mark_start(&mut self, position_ms: u64) -> Result<()> {
        check_range(position_ms, self.end_ms)?;
        self.start_ms = position_ms;
        Ok(())
    }

    /// Set the end to the playhead, rejecting positions that break the invariant
    pub fn mark_end(&mut self, position_ms: u64, duration_ms: u64) -> Result<()> {
        check_range(self.start_ms, position_ms)?;
        if position_ms > duration_ms {
            return Err(AudioError::InvalidSelection(format!(
                "end ({}ms) exceeds source duration ({}ms)",
                position_ms, duration_ms
            )));
        }
        self.end_ms = position_ms;
        Ok(())
    }

    /// Reset to the full length of a freshly loaded waveform
    pub fn reset(&mut self, duration_ms: u64) -> Result<()> {
        *self = Self::full(duration_ms, self.mode)?;
        Ok(())
    }
}

fn check_range(start_ms: u64, end_ms: u64) -> Result<()> {
    if end_ms <= start_ms {
        return Err(AudioError::InvalidSelection(format!(
            "end ({}ms) must be greater than start ({}ms)",
            end_ms, start_ms
        )));
    }
    if end_ms - start_ms < MIN_SELECTION_MS {
        return Err(AudioError::InvalidSelection(format!(
            "selection is {}ms wide, minimum is {}ms",
            end_ms - start_ms,
            MIN_SELECTION_MS
        )));
    }
    Ok(())
}

/// Lifecycle of the playback loop controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Stopped,
    Loading,
    Playing,
    Paused,
}

/// Snapshot of the playback loop controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub is_playing: bool,
    pub position_ms: u64,
    pub mode: Option<TrimMode>,
    pub selection: Option<TrimSelection>,
}

impl PlaybackState {
    pub fn stopped() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            is_playing: false,
            position_ms: 0,
            mode: None,
            selection: None,
        }
    }
}

/// A committed trim on disk; the caller owns the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimResult {
    pub output_path: String,
    pub duration_ms: u64,
    pub size_bytes: u64,
}
