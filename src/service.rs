//! The engine surface a front end talks to
//!
//! One [`AudioEngine`] owns the waveform cache, the preview controller and
//! the splicer. Construct it once and share it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::cache::WaveformCache;
use crate::audio::controller::PlaybackController;
use crate::audio::playback::{CpalPlayerLoader, PlayerLoader};
use crate::audio::trim::SegmentSplicer;
use crate::audio::types::{
    AudioSource, PlaybackState, TrimMode, TrimResult, TrimSelection, WaveformResult,
};
use crate::audio::waveform::{SymphoniaWaveformGenerator, WaveformGenerator};
use crate::config::EngineConfig;
use crate::error::{AudioError, Result};
use crate::listeners::Subscription;

pub struct AudioEngine<G = SymphoniaWaveformGenerator, L: PlayerLoader = CpalPlayerLoader> {
    config: EngineConfig,
    cache: WaveformCache<G>,
    controller: PlaybackController<L>,
    splicer: Arc<SegmentSplicer>,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Self {
        let generator = SymphoniaWaveformGenerator::new(config.stall_limit);
        Self::from_parts(config, generator, CpalPlayerLoader)
    }
}

impl<G: WaveformGenerator, L: PlayerLoader> AudioEngine<G, L> {
    /// Assemble an engine around a specific generator and player
    pub fn from_parts(config: EngineConfig, generator: G, loader: L) -> Self {
        let cache = WaveformCache::new(generator, config.cache_capacity);
        let controller = PlaybackController::new(loader, config.poll_interval());
        let splicer = Arc::new(SegmentSplicer::new(
            config.transcoder(),
            config.scratch_dir.clone(),
        ));

        Self {
            config,
            cache,
            controller,
            splicer,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Waveform for `uri` with `bar_count` clamped to [100, 200]
    pub async fn generate(&self, uri: &str, bar_count: usize) -> Result<Arc<WaveformResult>> {
        self.cache.generate(uri, bar_count).await
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Preview `[start_ms, end_ms)` of `uri` in keep or delete mode
    pub async fn play_segment(
        &self,
        uri: &str,
        start_ms: u64,
        end_ms: u64,
        looping: bool,
        mode: TrimMode,
    ) -> Result<()> {
        let selection = TrimSelection::new(start_ms, end_ms, mode)?;
        self.controller
            .play_segment(Path::new(uri), selection, looping)
            .await
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) -> bool {
        self.controller.resume()
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    pub fn current_position(&self) -> Option<u64> {
        self.controller.current_position()
    }

    pub fn subscribe_position<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&u64) + Send + Sync + 'static,
    {
        self.controller.subscribe_position(listener)
    }

    pub fn unsubscribe_position(&self, token: Subscription) -> bool {
        self.controller.unsubscribe(token)
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.controller.state()
    }

    /// Commit a keep/delete trim of `input` on the blocking pool
    ///
    /// Playback of the same file should be stopped first.
    pub async fn trim(
        &self,
        input: &str,
        start_ms: u64,
        end_ms: u64,
        mode: TrimMode,
    ) -> Result<TrimResult> {
        let selection = TrimSelection::new(start_ms, end_ms, mode)?;
        let splicer = Arc::clone(&self.splicer);
        let input = PathBuf::from(input);

        tokio::task::spawn_blocking(move || splicer.trim(&input, &selection))
            .await
            .map_err(|e| AudioError::transcode("Task join error", e.to_string()))?
    }

    pub fn describe(&self, path: &str) -> Result<AudioSource> {
        AudioSource::from_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encoder::encode_wav;
    use crate::audio::playback::SeekablePlayer;
    use crate::audio::types::PlaybackStatus;
    use crate::config::EngineKind;
    use tempfile::TempDir;

    /// Silent player with a fixed length that never advances
    struct StillPlayer {
        position: u64,
        playing: bool,
    }

    impl SeekablePlayer for StillPlayer {
        fn duration_ms(&self) -> u64 {
            10_000
        }

        fn position_ms(&self) -> u64 {
            self.position
        }

        fn seek_to(&mut self, position_ms: u64) {
            self.position = position_ms;
        }

        fn play(&mut self) {
            self.playing = true;
        }

        fn pause(&mut self) {
            self.playing = false;
        }

        fn is_playing(&self) -> bool {
            self.playing
        }
    }

    struct StillLoader;

    impl PlayerLoader for StillLoader {
        fn load(&self, _source: &Path) -> Result<Box<dyn SeekablePlayer>> {
            Ok(Box::new(StillPlayer {
                position: 0,
                playing: false,
            }))
        }
    }

    fn engine(scratch: &TempDir) -> AudioEngine<SymphoniaWaveformGenerator, StillLoader> {
        let config = EngineConfig {
            engine: EngineKind::Native,
            scratch_dir: scratch.path().to_path_buf(),
            ..EngineConfig::default()
        };
        AudioEngine::from_parts(config, SymphoniaWaveformGenerator::default(), StillLoader)
    }

    fn ten_second_wav(dir: &TempDir) -> String {
        let path = dir.path().join("memo.wav");
        let samples: Vec<i16> = (0..80_000).map(|i| ((i % 200) * 100) as i16).collect();
        encode_wav(&samples, 8000, 1, &path).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_generate_is_cached() {
        let input_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let uri = ten_second_wav(&input_dir);
        let engine = engine(&scratch);

        let first = engine.generate(&uri, 160).await.unwrap();
        let second = engine.generate(&uri, 160).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.peaks.len(), 160);
        assert_eq!(first.duration_ms, 10_000);

        engine.clear_cache();
        let third = engine.generate(&uri, 160).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_trim_runs_off_the_runtime() {
        let input_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let uri = ten_second_wav(&input_dir);
        let engine = engine(&scratch);

        let kept = engine.trim(&uri, 2000, 8000, TrimMode::Keep).await.unwrap();
        let deleted = engine.trim(&uri, 2000, 8000, TrimMode::Delete).await.unwrap();

        assert_eq!(kept.duration_ms, 6000);
        assert_eq!(deleted.duration_ms, 4000);
        assert!(Path::new(&kept.output_path).starts_with(scratch.path()));
    }

    #[tokio::test]
    async fn test_narrow_selection_is_rejected_before_any_work() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = engine(&scratch);

        let trim = engine.trim("/nonexistent/a.wav", 1000, 1500, TrimMode::Keep).await;
        assert!(matches!(trim, Err(AudioError::InvalidSelection(_))));

        let play = engine
            .play_segment("/nonexistent/a.wav", 1000, 1500, true, TrimMode::Keep)
            .await;
        assert!(matches!(play, Err(AudioError::InvalidSelection(_))));
    }

    #[tokio::test]
    async fn test_preview_lifecycle() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = engine(&scratch);

        engine
            .play_segment("memo.wav", 3000, 5000, true, TrimMode::Delete)
            .await
            .unwrap();
        assert!(engine.is_playing());
        assert_eq!(engine.current_position(), Some(0));

        let state = engine.playback_state();
        assert_eq!(state.status, PlaybackStatus::Playing);
        assert_eq!(state.mode, Some(TrimMode::Delete));

        engine.pause();
        assert!(!engine.is_playing());
        assert!(engine.resume());

        engine.stop();
        assert_eq!(engine.playback_state(), PlaybackState::stopped());
        assert_eq!(engine.current_position(), None);
    }

    #[test]
    fn test_describe() {
        let input_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let uri = ten_second_wav(&input_dir);

        let source = engine(&scratch).describe(&uri).unwrap();
        assert_eq!(source.mime_type, "audio/wav");
        assert!(source.size_bytes > 160_000);
    }
}
