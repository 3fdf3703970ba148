//! Memoized, single-flight texture loader.
//!
//! Each key is fetched at most once at a time. Callers that ask for a key while
//! its fetch is running are attached to that fetch and notified in the order
//! they asked. Successful results stay cached until [`TextureLoader::clear_cache`].
//!
//! The loader is driven by [`TextureLoader::update`], which the host calls once
//! per frame. All callbacks run on the caller's thread, either inside
//! `load_async` (cache hits, rejected keys) or inside `update`.

use crate::batch::PreloadBatch;
use crate::config::LoaderConfig;
use crate::timing::UpdateTimer;
use panoview_common::{FetchHandle, FetchOutcome, Texture, TextureBackend};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

const UNKNOWN_ERROR: &str = "unknown error";

/// Errors delivered to `on_error` callbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("texture key is empty")]
    EmptyKey,
    #[error("failed to fetch {key}: {message}")]
    FetchFailed { key: String, message: String },
}

impl LoadError {
    /// The bare failure message, without the key.
    pub fn message(&self) -> &str {
        match self {
            LoadError::EmptyKey => "empty key",
            LoadError::FetchFailed { message, .. } => message,
        }
    }
}

type SuccessFn = Box<dyn FnOnce(Texture)>;
type ErrorFn = Box<dyn FnOnce(LoadError)>;
type ProgressFn = Box<dyn FnMut(&str, f32)>;

struct Subscriber {
    on_success: SuccessFn,
    on_error: ErrorFn,
}

struct InFlight {
    handle: Box<dyn FetchHandle>,
    subscribers: Vec<Subscriber>,
    /// Creation order, used to complete requests deterministically.
    seq: u64,
}

/// Identifies a registered progress observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressObserverId(u64);

/// Loader counters for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct LoaderStats {
    pub fetches_issued: u64,
    pub cache_hits: u64,
    /// Requests attached to a fetch that was already running.
    pub coalesced: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Requests rejected before reaching the backend.
    pub rejected: u64,
    pub cached_entries: usize,
    pub in_flight: usize,
    /// Finished fetches left for a later tick by the completion budget.
    pub deferred_last_tick: usize,
    pub tick: u64,
    pub last_update: Duration,
    pub average_update: Duration,
    /// Slowest pump in the recent window.
    pub max_update: Duration,
}

/// Texture cache and loader over a [`TextureBackend`].
pub struct TextureLoader<B: TextureBackend> {
    backend: B,
    config: LoaderConfig,
    cache: HashMap<String, Texture>,
    in_flight: HashMap<String, InFlight>,
    next_seq: u64,
    observers: Vec<(ProgressObserverId, ProgressFn)>,
    next_observer: u64,
    tick: u64,
    stats: LoaderStats,
    timer: UpdateTimer,
}

impl<B: TextureBackend> TextureLoader<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, LoaderConfig::default())
    }

    pub fn with_config(backend: B, config: LoaderConfig) -> Self {
        Self {
            backend,
            config,
            cache: HashMap::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
            observers: Vec::new(),
            next_observer: 0,
            tick: 0,
            stats: LoaderStats::default(),
            timer: UpdateTimer::default(),
        }
    }

    /// True if a completed texture is cached for `key`.
    pub fn is_loaded(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// The cached texture for `key`, if any.
    pub fn get_cached(&self, key: &str) -> Option<Texture> {
        self.cache.get(key).cloned()
    }

    /// True while a fetch for `key` is running.
    pub fn is_pending(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    /// True when no fetch is running.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Cached keys in sorted order.
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Request the texture for `key`.
    ///
    /// A cached texture is delivered to `on_success` before this returns, and
    /// so is the error for an empty key. Otherwise the callbacks fire from a
    /// later [`update`](Self::update). Callbacks must not expect to reach the
    /// loader; it is borrowed while they run.
    pub fn load_async<S, E>(&mut self, key: &str, on_success: S, on_error: E)
    where
        S: FnOnce(Texture) + 'static,
        E: FnOnce(LoadError) + 'static,
    {
        if key.is_empty() {
            self.stats.rejected += 1;
            tracing::warn!("rejected texture request with empty key");
            on_error(LoadError::EmptyKey);
            return;
        }

        if let Some(texture) = self.cache.get(key) {
            self.stats.cache_hits += 1;
            tracing::debug!(key, "texture cache hit");
            on_success(texture.clone());
            return;
        }

        let subscriber = Subscriber {
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        };

        if let Some(request) = self.in_flight.get_mut(key) {
            request.subscribers.push(subscriber);
            self.stats.coalesced += 1;
            tracing::debug!(
                key,
                subscribers = request.subscribers.len(),
                "attached to in-flight fetch"
            );
            return;
        }

        let handle = self.backend.fetch(key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(
            key.to_string(),
            InFlight {
                handle,
                subscribers: vec![subscriber],
                seq,
            },
        );
        self.stats.fetches_issued += 1;
        self.stats.in_flight = self.in_flight.len();
        tracing::debug!(key, "texture fetch issued");
    }

    /// Load every key in `keys`.
    ///
    /// Repeated keys are loaded once. `on_all_complete` fires exactly once,
    /// after every distinct key has resolved. Failures count toward completion
    /// and are also reported to `on_any_error`, once per failing key.
    pub fn preload_many<I, K, C, E>(&mut self, keys: I, on_all_complete: C, on_any_error: E)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        C: FnOnce() + 'static,
        E: FnMut(&str, LoadError) + 'static,
    {
        let mut seen = HashSet::new();
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .filter(|k| seen.insert(k.clone()))
            .collect();
        tracing::debug!(count = keys.len(), "preloading textures");
        if keys.is_empty() {
            on_all_complete();
            return;
        }

        let batch = PreloadBatch::new(keys.len(), Box::new(on_all_complete), Box::new(on_any_error));
        for key in keys {
            let ok_batch = Rc::clone(&batch);
            let err_batch = Rc::clone(&batch);
            let err_key = key.clone();
            self.load_async(
                &key,
                move |_| PreloadBatch::succeed(&ok_batch),
                move |err| PreloadBatch::fail(&err_batch, &err_key, err),
            );
        }
    }

    /// Drop every cached texture and ask the backend to purge its own cache.
    ///
    /// Running fetches are left alone and populate the cache when they finish.
    pub fn clear_cache(&mut self) {
        let dropped = self.cache.len();
        self.cache.clear();
        self.backend.purge_cache();
        self.stats.cached_entries = 0;
        tracing::info!(
            dropped,
            in_flight = self.in_flight.len(),
            "texture cache cleared"
        );
    }

    /// Register a progress observer. It receives `(key, fraction)` for every
    /// running fetch at the configured cadence, and `1.0` when a fetch ends.
    pub fn add_progress_observer<F>(&mut self, observer: F) -> ProgressObserverId
    where
        F: FnMut(&str, f32) + 'static,
    {
        let id = ProgressObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Returns false if the observer was not registered.
    pub fn remove_progress_observer(&mut self, id: ProgressObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Advance one tick: report progress and complete finished fetches.
    pub fn update(&mut self) {
        let _span = tracing::info_span!("loader_update").entered();
        let start = Instant::now();
        self.tick += 1;

        let report_progress =
            !self.observers.is_empty() && self.tick % self.config.effective_interval() == 0;

        let mut finished: Vec<(u64, String)> = Vec::new();
        let mut running: Vec<(u64, String, f32)> = Vec::new();
        for (key, request) in &self.in_flight {
            if request.handle.is_done() {
                finished.push((request.seq, key.clone()));
            } else if report_progress {
                let fraction = clamp_fraction(request.handle.percent_complete());
                running.push((request.seq, key.clone(), fraction));
            }
        }

        running.sort_by_key(|(seq, _, _)| *seq);
        for (_, key, fraction) in &running {
            self.emit_progress(key, *fraction);
        }

        finished.sort();
        let budget = self.config.effective_budget();
        let deferred = finished.len().saturating_sub(budget);
        finished.truncate(budget);
        if deferred > 0 {
            tracing::debug!(deferred, "completion budget reached");
        }

        let completed = finished.len();
        for (_, key) in finished {
            self.complete(&key);
        }

        let elapsed = start.elapsed();
        self.timer.record(elapsed);
        self.stats.tick = self.tick;
        self.stats.deferred_last_tick = deferred;
        self.stats.cached_entries = self.cache.len();
        self.stats.in_flight = self.in_flight.len();
        self.stats.last_update = elapsed;
        self.stats.average_update = self.timer.average();
        self.stats.max_update = self.timer.max();

        tracing::trace!(
            tick = self.tick,
            completed,
            deferred,
            in_flight = self.in_flight.len(),
            "loader update complete"
        );
    }

    /// Counters as of the last operation.
    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    fn complete(&mut self, key: &str) {
        let Some(request) = self.in_flight.remove(key) else {
            return;
        };
        let InFlight {
            mut handle,
            subscribers,
            ..
        } = request;
        let outcome = handle.take_outcome();
        drop(handle);

        self.emit_progress(key, 1.0);

        match outcome {
            Some(FetchOutcome::Succeeded(texture)) => {
                self.cache.insert(key.to_string(), texture.clone());
                self.stats.succeeded += 1;
                tracing::debug!(
                    key,
                    width = texture.width(),
                    height = texture.height(),
                    subscribers = subscribers.len(),
                    "texture fetch succeeded"
                );
                for subscriber in subscribers {
                    (subscriber.on_success)(texture.clone());
                }
            }
            failure => {
                let message = match failure {
                    Some(FetchOutcome::Failed(Some(message))) if !message.is_empty() => message,
                    _ => UNKNOWN_ERROR.to_string(),
                };
                self.stats.failed += 1;
                tracing::warn!(
                    key,
                    %message,
                    subscribers = subscribers.len(),
                    "texture fetch failed"
                );
                for subscriber in subscribers {
                    (subscriber.on_error)(LoadError::FetchFailed {
                        key: key.to_string(),
                        message: message.clone(),
                    });
                }
            }
        }
    }

    fn emit_progress(&mut self, key: &str, fraction: f32) {
        for (_, observer) in &mut self.observers {
            observer(key, fraction);
        }
    }
}

impl<B: TextureBackend> Drop for TextureLoader<B> {
    fn drop(&mut self) {
        if !self.in_flight.is_empty() {
            tracing::debug!(
                in_flight = self.in_flight.len(),
                "releasing unfinished texture fetches"
            );
        }
    }
}

fn clamp_fraction(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
