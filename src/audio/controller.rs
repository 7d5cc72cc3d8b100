// src/audio/controller.rs
//! Preview playback of a trim selection without writing any file
//!
//! A position monitor polls the player on a fixed interval and seeks it so
//! that only the audible part of the selection plays:
//! - keep: loop `[start, end)`
//! - delete: skip `[start, end)` and wrap from end of file to the beginning

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::playback::{CpalPlayerLoader, PlayerLoader, SeekablePlayer};
use crate::audio::types::{PlaybackState, PlaybackStatus, TrimMode, TrimSelection};
use crate::error::{AudioError, Result};
use crate::listeners::{ListenerRegistry, Subscription};

/// How often the position monitor checks the player
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Session {
    status: PlaybackStatus,
    player: Option<Box<dyn SeekablePlayer>>,
    selection: Option<TrimSelection>,
    looping: bool,
    /// Bumped whenever a load or monitor is superseded
    generation: u64,
}

impl Session {
    fn idle() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            player: None,
            selection: None,
            looping: false,
            generation: 0,
        }
    }

    fn reset(&mut self) -> Option<Box<dyn SeekablePlayer>> {
        self.status = PlaybackStatus::Stopped;
        self.selection = None;
        self.generation += 1;
        self.player.take()
    }

    /// Where playback restarts: the kept span's start, or the first audible
    /// position when a span is deleted
    fn restart_point(selection: &TrimSelection) -> u64 {
        match selection.mode() {
            TrimMode::Keep => selection.start_ms(),
            TrimMode::Delete if selection.contains(0) => selection.end_ms(),
            TrimMode::Delete => 0,
        }
    }

    /// Seek out of any position that must not be heard
    fn correct_position(&mut self) {
        let Some(selection) = self.selection else {
            return;
        };
        let Some(player) = self.player.as_mut() else {
            return;
        };

        let position = player.position_ms();
        match selection.mode() {
            TrimMode::Keep if !selection.contains(position) => {
                player.seek_to(selection.start_ms())
            }
            TrimMode::Delete if selection.contains(position) => player.seek_to(selection.end_ms()),
            _ => {}
        }
    }

    /// The position the monitor would report, without touching the player
    fn observed_position(&self) -> Option<u64> {
        let selection = self.selection?;
        let player = self.player.as_ref()?;
        let position = player.position_ms();

        let observed = match selection.mode() {
            TrimMode::Keep if !selection.contains(position) => selection.start_ms(),
            TrimMode::Delete if selection.contains(position) => selection.end_ms(),
            TrimMode::Delete if position >= player.duration_ms() => Self::restart_point(&selection),
            _ => position,
        };
        Some(observed)
    }

    /// One monitor pass; returns the position after any correction
    fn enforce(&mut self) -> Option<u64> {
        let selection = self.selection?;
        let looping = self.looping;
        let player = self.player.as_mut()?;

        let duration = player.duration_ms();
        let mut position = player.position_ms();
        let finished = !player.is_playing();

        let wrap = match selection.mode() {
            TrimMode::Keep => position >= selection.end_ms() || finished,
            TrimMode::Delete => {
                if selection.contains(position) {
                    player.seek_to(selection.end_ms());
                    position = selection.end_ms();
                }
                position >= duration || finished
            }
        };

        if wrap {
            position = Self::restart_point(&selection);
            player.seek_to(position);
            if looping {
                player.play();
            } else {
                player.pause();
                self.status = PlaybackStatus::Paused;
            }
        }

        Some(position)
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keep/delete preview over a seekable player
///
/// States: Stopped → Loading → Playing ⇄ Paused → Stopped.
pub struct PlaybackController<L: PlayerLoader = CpalPlayerLoader> {
    loader: Arc<L>,
    poll_interval: Duration,
    session: Arc<Mutex<Session>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    positions: Arc<ListenerRegistry<u64>>,
}

impl<L: PlayerLoader> PlaybackController<L> {
    pub fn new(loader: L, poll_interval: Duration) -> Self {
        Self {
            loader: Arc::new(loader),
            poll_interval,
            session: Arc::new(Mutex::new(Session::idle())),
            monitor: Mutex::new(None),
            positions: Arc::new(ListenerRegistry::new()),
        }
    }

    /// Load `source` and start previewing `selection`
    ///
    /// Any current preview is stopped first. On failure the controller is
    /// left stopped and the error is returned; nothing is retried.
    pub async fn play_segment(
        &self,
        source: &Path,
        selection: TrimSelection,
        looping: bool,
    ) -> Result<()> {
        self.stop();

        let generation = {
            let mut session = lock(&self.session);
            session.generation += 1;
            session.status = PlaybackStatus::Loading;
            session.selection = Some(selection);
            session.looping = looping;
            session.generation
        };

        tracing::info!(
            "Loading {} for {} preview {}ms..{}ms (loop: {})",
            source.display(),
            selection.mode(),
            selection.start_ms(),
            selection.end_ms(),
            looping
        );

        let loader = Arc::clone(&self.loader);
        let path = source.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| AudioError::PlaybackFailed(format!("Task join error: {}", e)))
            .and_then(|result| result);

        let mut session = lock(&self.session);

        if session.generation != generation {
            drop(session);
            return Err(AudioError::PlaybackFailed(format!(
                "Preview of '{}' was stopped while loading",
                source.display()
            )));
        }

        let mut player = match loaded {
            Ok(player) => player,
            Err(e) => {
                session.reset();
                tracing::warn!("Failed to load {}: {}", source.display(), e);
                return Err(e);
            }
        };

        if let Err(e) = selection.validate(player.duration_ms()) {
            session.reset();
            drop(session);
            drop(player);
            return Err(e);
        }

        let start = match selection.mode() {
            TrimMode::Keep => selection.start_ms(),
            TrimMode::Delete => 0,
        };
        player.seek_to(start);
        session.player = Some(player);
        session.correct_position();

        if let Some(player) = session.player.as_mut() {
            player.play();
        }
        session.status = PlaybackStatus::Playing;
        drop(session);

        self.spawn_monitor(generation);
        tracing::debug!("Preview playing");
        Ok(())
    }

    /// Pause and halt the monitor, keeping the player loaded
    pub fn pause(&self) {
        {
            let mut session = lock(&self.session);
            if session.status != PlaybackStatus::Playing {
                return;
            }
            if let Some(player) = session.player.as_mut() {
                player.pause();
            }
            session.status = PlaybackStatus::Paused;
            session.generation += 1;
        }
        self.abort_monitor();
        tracing::debug!("Preview paused");
    }

    /// Resume a paused preview; returns false if nothing is paused
    ///
    /// The position is corrected first if it sits where the mode says no
    /// audio should play.
    pub fn resume(&self) -> bool {
        let generation = {
            let mut session = lock(&self.session);
            if session.status != PlaybackStatus::Paused || session.player.is_none() {
                return false;
            }
            session.correct_position();
            if let Some(player) = session.player.as_mut() {
                player.play();
            }
            session.status = PlaybackStatus::Playing;
            session.generation += 1;
            session.generation
        };

        self.spawn_monitor(generation);
        tracing::debug!("Preview resumed");
        true
    }

    /// Halt the monitor and release the player before returning
    pub fn stop(&self) {
        let player = lock(&self.session).reset();
        self.abort_monitor();

        if player.is_some() {
            drop(player);
            tracing::debug!("Preview stopped and released");
        }
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.session).status == PlaybackStatus::Playing
    }

    /// Current playhead as the monitor would report it
    ///
    /// Reading never seeks or pauses the player; a position that must not
    /// be heard is mapped to where the monitor will send it.
    pub fn current_position(&self) -> Option<u64> {
        let session = lock(&self.session);
        match session.status {
            PlaybackStatus::Playing => session.observed_position(),
            PlaybackStatus::Paused => session.player.as_ref().map(|p| p.position_ms()),
            _ => None,
        }
    }

    /// Snapshot of the preview; like [`Self::current_position`], it has no
    /// effect on the player
    pub fn state(&self) -> PlaybackState {
        let session = lock(&self.session);
        let position_ms = match session.status {
            PlaybackStatus::Playing => session.observed_position().unwrap_or(0),
            PlaybackStatus::Paused => session.player.as_ref().map_or(0, |p| p.position_ms()),
            _ => 0,
        };

        PlaybackState {
            status: session.status,
            is_playing: session.status == PlaybackStatus::Playing,
            position_ms,
            mode: session.selection.map(|s| s.mode()),
            selection: session.selection,
        }
    }

    /// Receive every position the monitor reports
    pub fn subscribe_position<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&u64) + Send + Sync + 'static,
    {
        self.positions.subscribe(listener)
    }

    pub fn unsubscribe(&self, token: Subscription) -> bool {
        self.positions.unsubscribe(token)
    }

    fn spawn_monitor(&self, generation: u64) {
        let session = Arc::clone(&self.session);
        let positions = Arc::clone(&self.positions);
        let period = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let position = {
                    let mut session = lock(&session);
                    if session.generation != generation
                        || session.status != PlaybackStatus::Playing
                    {
                        break;
                    }
                    session.enforce()
                };

                if let Some(position) = position {
                    positions.notify(&position);
                }
            }
        });

        let previous = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn abort_monitor(&self) {
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl PlaybackController<CpalPlayerLoader> {
    pub fn with_default_player(poll_interval: Duration) -> Self {
        Self::new(CpalPlayerLoader, poll_interval)
    }
}

impl<L: PlayerLoader> Drop for PlaybackController<L> {
    fn drop(&mut self) {
        self.stop();
    }
}
