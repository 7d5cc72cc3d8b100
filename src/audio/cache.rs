// src/audio/cache.rs
//! Memoized waveform generation keyed by (uri, bar count)
//!
//! Same-key requests that arrive while a decode is running wait for that
//! decode instead of starting their own.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::audio::types::{clamp_bar_count, WaveformResult};
use crate::audio::waveform::{SymphoniaWaveformGenerator, WaveformGenerator};
use crate::error::{AudioError, Result};

/// Number of waveforms retained before the least recently used is evicted
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

type Outcome = Result<Arc<WaveformResult>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    uri: String,
    bar_count: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Arc<WaveformResult>>,
    /// Front is least recently used
    recency: VecDeque<CacheKey>,
    in_flight: HashMap<CacheKey, watch::Receiver<Option<Outcome>>>,
    /// Bumped by `clear`; results started before a clear are not stored
    generation: u64,
}

impl CacheState {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key.clone());
    }

    fn insert(&mut self, key: CacheKey, value: Arc<WaveformResult>, capacity: usize) {
        self.touch(&key);
        self.entries.insert(key, value);

        while self.entries.len() > capacity {
            match self.recency.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bounded LRU cache of waveforms with request coalescing
pub struct WaveformCache<G = SymphoniaWaveformGenerator> {
    generator: Arc<G>,
    capacity: usize,
    state: Arc<Mutex<CacheState>>,
}

impl WaveformCache<SymphoniaWaveformGenerator> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(SymphoniaWaveformGenerator::default(), capacity)
    }
}

impl<G: WaveformGenerator> WaveformCache<G> {
    pub fn new(generator: G, capacity: usize) -> Self {
        Self {
            generator: Arc::new(generator),
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Return the cached waveform for `(uri, bar_count)` without decoding
    pub fn get_cached(&self, uri: &str, bar_count: usize) -> Option<Arc<WaveformResult>> {
        let key = CacheKey {
            uri: uri.to_string(),
            bar_count: clamp_bar_count(bar_count),
        };
        let mut state = lock(&self.state);
        let hit = state.entries.get(&key).cloned();
        if hit.is_some() {
            state.touch(&key);
        }
        hit
    }

    /// Produce the waveform for `(uri, bar_count)`, decoding at most once per key
    ///
    /// The decode runs on the blocking pool and publishes its outcome to
    /// every caller waiting on the key. A caller that is cancelled stops
    /// waiting; the decode still finishes and is cached for the others.
    pub async fn generate(&self, uri: &str, bar_count: usize) -> Result<Arc<WaveformResult>> {
        let key = CacheKey {
            uri: uri.to_string(),
            bar_count: clamp_bar_count(bar_count),
        };

        let mut rx = {
            let mut state = lock(&self.state);

            if let Some(hit) = state.entries.get(&key).cloned() {
                state.touch(&key);
                tracing::debug!("Waveform cache hit for {}:{}", key.uri, key.bar_count);
                return Ok(hit);
            }

            match state.in_flight.get(&key).cloned() {
                Some(rx) => {
                    tracing::debug!(
                        "Waiting on in-flight waveform for {}:{}",
                        key.uri,
                        key.bar_count
                    );
                    rx
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight.insert(key.clone(), rx.clone());
                    let generation = state.generation;
                    drop(state);
                    self.spawn_decode(key.clone(), generation, tx);
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(AudioError::DecodeFailed(format!(
                "Waveform request for '{}' was abandoned",
                key.uri
            )))
        })
    }

    /// Decode `key` detached from any caller, then store and publish
    fn spawn_decode(&self, key: CacheKey, generation: u64, tx: watch::Sender<Option<Outcome>>) {
        let generator = Arc::clone(&self.generator);
        let state = Arc::clone(&self.state);
        let capacity = self.capacity;

        tokio::spawn(async move {
            let uri = key.uri.clone();
            let bar_count = key.bar_count;

            let outcome: Outcome = tokio::task::spawn_blocking(move || {
                generator.generate(Path::new(&uri), bar_count)
            })
            .await
            .map_err(|e| AudioError::DecodeFailed(format!("Task join error: {}", e)))
            .and_then(|result| result)
            .map(Arc::new);

            {
                let mut state = lock(&state);
                state.in_flight.remove(&key);
                match &outcome {
                    Ok(waveform) => {
                        if state.generation == generation {
                            state.insert(key.clone(), Arc::clone(waveform), capacity);
                        }
                        tracing::info!(
                            "Generated {} bars for {} ({} ms)",
                            waveform.peaks.len(),
                            key.uri,
                            waveform.duration_ms
                        );
                    }
                    Err(e) => tracing::warn!("Waveform generation failed for {}: {}", key.uri, e),
                }
            }

            // Every waiter may already have gone away
            let _ = tx.send(Some(outcome));
        });
    }

    /// Evict every cached waveform
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.recency.clear();
        state.generation += 1;
        tracing::debug!("Waveform cache cleared");
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Generator that counts invocations and takes a while to finish
    struct CountingGenerator {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    impl CountingGenerator {
        fn new(delay: Duration) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    delay,
                    fail: false,
                },
                calls,
            )
        }
    }

    impl WaveformGenerator for CountingGenerator {
        fn generate(&self, path: &Path, bar_count: usize) -> Result<WaveformResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(AudioError::NoAudioTrackFound(path.display().to_string()));
            }
            let mut peaks = vec![0.5; bar_count];
            peaks[0] = 1.0;
            Ok(WaveformResult {
                peaks,
                duration_ms: path.to_string_lossy().len() as u64 * 1000,
            })
        }
    }

    #[tokio::test]
    async fn test_second_call_is_a_cache_hit() {
        let (generator, calls) = CountingGenerator::new(Duration::ZERO);
        let cache = WaveformCache::new(generator, DEFAULT_CACHE_CAPACITY);

        let first = cache.generate("a.mp3", 160).await.unwrap();
        let second = cache.generate("a.mp3", 160).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.get_cached("a.mp3", 160).is_some());
    }

    #[tokio::test]
    async fn test_key_uses_clamped_bar_count() {
        let (generator, calls) = CountingGenerator::new(Duration::ZERO);
        let cache = WaveformCache::new(generator, DEFAULT_CACHE_CAPACITY);

        let clamped = cache.generate("a.mp3", 20).await.unwrap();
        assert_eq!(clamped.peaks.len(), 100);
        cache.generate("a.mp3", 100).await.unwrap();
        cache.generate("a.mp3", 125).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_decode_once() {
        let (generator, calls) = CountingGenerator::new(Duration::from_millis(100));
        let cache = WaveformCache::new(generator, DEFAULT_CACHE_CAPACITY);

        let (first, second) = tokio::join!(
            cache.generate("same.mp3", 160),
            cache.generate("same.mp3", 160)
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    }

    #[tokio::test]
    async fn test_concurrent_failure_reaches_every_caller() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = CountingGenerator {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(50),
            fail: true,
        };
        let cache = WaveformCache::new(generator, DEFAULT_CACHE_CAPACITY);

        let (first, second) = tokio::join!(
            cache.generate("video.mp4", 160),
            cache.generate("video.mp4", 160)
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(first, Err(AudioError::NoAudioTrackFound(_))));
        assert!(matches!(second, Err(AudioError::NoAudioTrackFound(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let (generator, calls) = CountingGenerator::new(Duration::ZERO);
        let cache = WaveformCache::new(generator, 2);

        cache.generate("a.mp3", 160).await.unwrap();
        cache.generate("b.mp3", 160).await.unwrap();
        // Touch a so b becomes the oldest
        cache.generate("a.mp3", 160).await.unwrap();
        cache.generate("c.mp3", 160).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get_cached("a.mp3", 160).is_some());
        assert!(cache.get_cached("b.mp3", 160).is_none());
        assert!(cache.get_cached("c.mp3", 160).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_clear_forces_a_new_decode() {
        let (generator, calls) = CountingGenerator::new(Duration::ZERO);
        let cache = WaveformCache::new(generator, DEFAULT_CACHE_CAPACITY);

        cache.generate("a.mp3", 160).await.unwrap();
        cache.clear();
        assert!(cache.is_empty());

        cache.generate("a.mp3", 160).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_abandon_others() {
        let (generator, calls) = CountingGenerator::new(Duration::from_millis(200));
        let cache = Arc::new(WaveformCache::new(generator, DEFAULT_CACHE_CAPACITY));

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.generate("a.mp3", 160).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.generate("a.mp3", 160).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The caller that started the decode goes away mid-decode
        first.abort();

        let waited = second.await.unwrap();
        assert!(waited.is_ok(), "{:?}", waited.as_ref().err());

        let later = cache.generate("a.mp3", 160).await.unwrap();
        assert!(Arc::ptr_eq(&waited.unwrap(), &later));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timed_out_caller_still_fills_the_cache() {
        let (generator, calls) = CountingGenerator::new(Duration::from_millis(50));
        let cache = WaveformCache::new(generator, DEFAULT_CACHE_CAPACITY);

        let _ = tokio::time::timeout(Duration::from_millis(1), cache.generate("a.mp3", 160)).await;

        let result = cache.generate("a.mp3", 160).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
