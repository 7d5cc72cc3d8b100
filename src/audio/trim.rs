// src/audio/trim.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::audio::decoder::media_duration_ms;
use crate::audio::transcode::{SegmentRange, Transcoder};
use crate::audio::types::{TrimMode, TrimResult, TrimSelection};
use crate::error::{AudioError, Result};

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A file in the scratch directory that is deleted on drop unless persisted
struct ScratchFile {
    path: PathBuf,
    persisted: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persist(mut self) -> PathBuf {
        self.persisted = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed scratch file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// Produces a new file from a source and a keep/delete selection
///
/// Keep copies `[start, end)`. Delete copies `[0, start)` and `[end, EOF)`
/// and joins them. Intermediate files never outlive a call.
pub struct SegmentSplicer {
    transcoder: Arc<dyn Transcoder>,
    scratch_dir: PathBuf,
}

impl SegmentSplicer {
    pub fn new<P: Into<PathBuf>>(transcoder: Arc<dyn Transcoder>, scratch_dir: P) -> Self {
        Self {
            transcoder,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Commit `selection` against `input` and return the new file
    ///
    /// The source is never modified. On failure every scratch file,
    /// including a partially written output, is removed before the error
    /// is returned.
    ///
    /// # Example
    /// ```no_run
    /// use std::path::Path;
    /// use std::sync::Arc;
    /// use clipcut_lib::audio::{FfmpegTranscoder, SegmentSplicer, TrimMode, TrimSelection};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let splicer = SegmentSplicer::new(Arc::new(FfmpegTranscoder::default()), "/tmp/clipcut");
    /// let selection = TrimSelection::new(5_000, 12_000, TrimMode::Keep)?;
    /// let result = splicer.trim(Path::new("interview.mp3"), &selection)?;
    /// println!("{} ({} ms)", result.output_path, result.duration_ms);
    /// # Ok(())
    /// # }
    /// ```
    pub fn trim(&self, input: &Path, selection: &TrimSelection) -> Result<TrimResult> {
        let source_ms = media_duration_ms(input)?;
        selection.validate(source_ms)?;

        if selection.mode() == TrimMode::Delete
            && selection.start_ms() == 0
            && selection.end_ms() >= source_ms
        {
            return Err(AudioError::InvalidSelection(
                "deleting the whole recording leaves nothing to save".to_string(),
            ));
        }

        fs::create_dir_all(&self.scratch_dir)?;

        let ext = self.transcoder.container_extension(input);
        let output = ScratchFile::new(self.output_path(input, selection.mode(), &ext));

        tracing::info!(
            "Trimming {} ({}ms..{}ms, {}) into {}",
            input.display(),
            selection.start_ms(),
            selection.end_ms(),
            selection.mode(),
            output.path().display()
        );

        match selection.mode() {
            TrimMode::Keep => self.transcoder.extract(
                input,
                SegmentRange::between(selection.start_ms(), selection.end_ms()),
                output.path(),
            )?,
            TrimMode::Delete => self.splice_out(input, selection, source_ms, &ext, &output)?,
        }

        let size_bytes = fs::metadata(output.path())?.len();
        let duration_ms = match media_duration_ms(output.path()) {
            Ok(ms) => ms,
            Err(e) => {
                tracing::warn!("Could not probe {}: {}", output.path().display(), e);
                selection.output_duration_ms(source_ms)
            }
        };

        let output_path = output.persist();
        tracing::info!("Saved {} ({} ms, {} bytes)", output_path.display(), duration_ms, size_bytes);

        Ok(TrimResult {
            output_path: output_path.to_string_lossy().to_string(),
            duration_ms,
            size_bytes,
        })
    }

    fn splice_out(
        &self,
        input: &Path,
        selection: &TrimSelection,
        source_ms: u64,
        ext: &str,
        output: &ScratchFile,
    ) -> Result<()> {
        let mut parts = Vec::with_capacity(2);

        if selection.start_ms() > 0 {
            let part = ScratchFile::new(self.scratch_path("part1", ext));
            self.transcoder
                .extract(input, SegmentRange::between(0, selection.start_ms()), part.path())?;
            parts.push(part);
        }

        if selection.end_ms() < source_ms {
            let part = ScratchFile::new(self.scratch_path("part2", ext));
            self.transcoder
                .extract(input, SegmentRange::to_end(selection.end_ms()), part.path())?;
            parts.push(part);
        }

        match parts.as_slice() {
            [only] => {
                tracing::debug!("Single remaining part, moving into place");
                fs::rename(only.path(), output.path())?;
            }
            _ => {
                let manifest = ScratchFile::new(self.scratch_path("concat", "txt"));
                let paths: Vec<PathBuf> = parts.iter().map(|p| p.path().to_path_buf()).collect();
                self.transcoder.concat(&paths, output.path(), manifest.path())?;
            }
        }

        Ok(())
    }

    /// `{stem}_{mode}_{unix_millis}.{ext}` in the scratch directory
    fn output_path(&self, input: &Path, mode: TrimMode, ext: &str) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        let mut path = self
            .scratch_dir
            .join(format!("{}_{}_{}.{}", stem, mode, millis, ext));
        let mut suffix = 1;
        while path.exists() {
            path = self
                .scratch_dir
                .join(format!("{}_{}_{}_{}.{}", stem, mode, millis, suffix, ext));
            suffix += 1;
        }
        path
    }

    fn scratch_path(&self, tag: &str, ext: &str) -> PathBuf {
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.scratch_dir
            .join(format!("temp_{}_{}_{}.{}", tag, std::process::id(), n, ext))
    }
}
