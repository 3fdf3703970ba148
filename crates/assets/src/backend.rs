//! Catalog-backed texture delivery.
//!
//! Fetches run on a small worker pool. Each fetch resolves the key in the
//! catalog, takes the bytes from the download cache when a verified copy is
//! there, otherwise reads them from the source root, checks them against the
//! catalog hash and stores them in the download cache, then decodes them.

use crate::AssetError;
use crate::catalog::{Catalog, CatalogEntry, sha256_hex};
use crate::decode::decode_texture;
use panoview_common::{FetchHandle, FetchOutcome, Texture, TextureBackend};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const READ_CHUNK: usize = 64 * 1024;
/// Upper bound on the buffer reserved from a catalog entry's declared size.
const PREALLOC_LIMIT: usize = 64 * 1024 * 1024;
/// Share of the progress bar spent on reading bytes; decoding takes the rest.
const READ_SHARE: f32 = 0.8;

fn default_workers() -> usize {
    2
}

/// Where catalog files come from and where downloaded copies are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Directory the catalog paths are relative to.
    pub source_root: PathBuf,
    /// Download cache directory. Without one every fetch reads the source.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Number of worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl BackendConfig {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            cache_dir: None,
            workers: default_workers(),
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }
}

#[derive(Debug, Default)]
struct FetchState {
    progress: f32,
    done: bool,
    outcome: Option<FetchOutcome>,
}

fn lock(state: &Mutex<FetchState>) -> MutexGuard<'_, FetchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for one catalog fetch.
pub struct CatalogFetch {
    state: Arc<Mutex<FetchState>>,
}

impl CatalogFetch {
    fn failed(error: &AssetError) -> Self {
        let state = FetchState {
            progress: 1.0,
            done: true,
            outcome: Some(FetchOutcome::Failed(Some(error.to_string()))),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl FetchHandle for CatalogFetch {
    fn is_done(&self) -> bool {
        lock(&self.state).done
    }

    fn percent_complete(&self) -> f32 {
        lock(&self.state).progress
    }

    fn take_outcome(&mut self) -> Option<FetchOutcome> {
        let mut state = lock(&self.state);
        if state.done { state.outcome.take() } else { None }
    }
}

/// [`TextureBackend`] serving the textures listed in a [`Catalog`].
pub struct CatalogBackend {
    catalog: Arc<Catalog>,
    source_root: Arc<PathBuf>,
    cache_dir: Option<Arc<PathBuf>>,
    pool: rayon::ThreadPool,
}

impl CatalogBackend {
    pub fn new(catalog: Catalog, config: BackendConfig) -> Result<Self, AssetError> {
        let workers = config.workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("panoview-fetch-{i}"))
            .build()
            .map_err(|e| AssetError::Pool(e.to_string()))?;

        if let Some(dir) = &config.cache_dir {
            std::fs::create_dir_all(dir)?;
        }

        tracing::info!(
            entries = catalog.len(),
            workers,
            source = %config.source_root.display(),
            cached = config.cache_dir.is_some(),
            "catalog backend ready"
        );

        Ok(Self {
            catalog: Arc::new(catalog),
            source_root: Arc::new(config.source_root),
            cache_dir: config.cache_dir.map(Arc::new),
            pool,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref().map(PathBuf::as_path)
    }
}

impl TextureBackend for CatalogBackend {
    fn fetch(&mut self, key: &str) -> Box<dyn FetchHandle> {
        let Some(entry) = self.catalog.get(key).cloned() else {
            let error = AssetError::UnknownKey(key.to_string());
            tracing::debug!(key, "fetch for key missing from catalog");
            return Box::new(CatalogFetch::failed(&error));
        };

        let state = Arc::new(Mutex::new(FetchState::default()));
        let job = FetchJob {
            entry,
            source_root: Arc::clone(&self.source_root),
            cache_dir: self.cache_dir.clone(),
            state: Arc::clone(&state),
        };
        self.pool.spawn(move || job.run());
        Box::new(CatalogFetch { state })
    }

    fn purge_cache(&mut self) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        match purge_dir(dir) {
            Ok(removed) => tracing::info!(removed, dir = %dir.display(), "download cache purged"),
            Err(e) => tracing::warn!(error = %e, dir = %dir.display(), "download cache purge failed"),
        }
    }
}

struct FetchJob {
    entry: CatalogEntry,
    source_root: Arc<PathBuf>,
    cache_dir: Option<Arc<PathBuf>>,
    state: Arc<Mutex<FetchState>>,
}

impl FetchJob {
    fn run(self) {
        let _span = tracing::debug_span!("fetch", key = %self.entry.key).entered();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.execute())) {
            Ok(Ok(texture)) => FetchOutcome::Succeeded(texture),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "fetch failed");
                FetchOutcome::Failed(Some(e.to_string()))
            }
            Err(_) => {
                tracing::error!("fetch job panicked");
                FetchOutcome::Failed(Some("fetch job panicked".to_string()))
            }
        };
        let mut state = lock(&self.state);
        state.progress = 1.0;
        state.outcome = Some(outcome);
        state.done = true;
    }

    fn execute(&self) -> Result<Texture, AssetError> {
        let bytes = match self.read_cached()? {
            Some(bytes) => bytes,
            None => {
                let bytes = self.read_source()?;
                if let Err(e) = self.store_cached(&bytes) {
                    tracing::warn!(error = %e, "could not write download cache copy");
                }
                bytes
            }
        };
        self.set_progress(READ_SHARE);
        decode_texture(&bytes)
    }

    /// Bytes from the download cache, if present and matching the catalog.
    fn read_cached(&self) -> Result<Option<Vec<u8>>, AssetError> {
        let Some(dir) = &self.cache_dir else {
            return Ok(None);
        };
        let path = dir.join(&self.entry.path);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        if sha256_hex(&bytes).eq_ignore_ascii_case(&self.entry.sha256) {
            tracing::debug!("download cache hit");
            return Ok(Some(bytes));
        }
        tracing::debug!("stale download cache entry");
        std::fs::remove_file(&path)?;
        Ok(None)
    }

    fn read_source(&self) -> Result<Vec<u8>, AssetError> {
        let path = self.source_root.join(&self.entry.path);
        let mut file = std::fs::File::open(&path)?;
        let expected = self.entry.size.max(1) as f32;
        let reserve = usize::try_from(self.entry.size)
            .unwrap_or(PREALLOC_LIMIT)
            .min(PREALLOC_LIMIT);
        let mut bytes = Vec::with_capacity(reserve);
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            let fraction = (bytes.len() as f32 / expected).min(1.0);
            self.set_progress(fraction * READ_SHARE);
        }

        let actual = sha256_hex(&bytes);
        if !actual.eq_ignore_ascii_case(&self.entry.sha256) {
            return Err(AssetError::HashMismatch {
                key: self.entry.key.clone(),
                expected: self.entry.sha256.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    fn store_cached(&self, bytes: &[u8]) -> Result<(), AssetError> {
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };
        let path = dir.join(&self.entry.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(())
    }

    fn set_progress(&self, progress: f32) {
        lock(&self.state).progress = progress;
    }
}

/// Remove every file under `dir`, including nested ones. `dir` itself stays.
fn purge_dir(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            removed += purge_dir(&path)?;
            std::fs::remove_dir(&path)?;
        } else {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panoview_stream::TextureLoader;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    fn write_png(dir: &Path, name: &str, width: u32, height: u32, rgba: [u8; 4]) {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        img.save(dir.join(name)).unwrap();
    }

    fn wait(handle: &dyn FetchHandle) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !handle.is_done() {
            assert!(Instant::now() < deadline, "fetch did not finish");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn fetch_now(backend: &mut CatalogBackend, key: &str) -> FetchOutcome {
        let mut handle = backend.fetch(key);
        wait(&*handle);
        handle.take_outcome().unwrap()
    }

    fn setup() -> (tempfile::TempDir, CatalogBackend) {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir(&source).unwrap();
        write_png(&source, "room1_day.png", 8, 4, [200, 180, 120, 255]);
        write_png(&source, "room1_night.png", 8, 4, [10, 10, 40, 255]);
        let catalog = Catalog::build(&source).unwrap();
        let config = BackendConfig::new(&source).with_cache_dir(tmp.path().join("cache"));
        let backend = CatalogBackend::new(catalog, config).unwrap();
        (tmp, backend)
    }

    #[test]
    fn fetch_decodes_cataloged_texture() {
        let (_tmp, mut backend) = setup();
        match fetch_now(&mut backend, "room1_day") {
            FetchOutcome::Succeeded(texture) => {
                assert_eq!((texture.width(), texture.height()), (8, 4));
                assert_eq!(&texture.pixels()[..4], &[200, 180, 120, 255]);
            }
            FetchOutcome::Failed(msg) => panic!("fetch failed: {msg:?}"),
        }
    }

    #[test]
    fn unknown_key_fails_immediately() {
        let (_tmp, mut backend) = setup();
        let mut handle = backend.fetch("attic_day");
        assert!(handle.is_done());
        assert_eq!(handle.percent_complete(), 1.0);
        match handle.take_outcome() {
            Some(FetchOutcome::Failed(Some(msg))) => assert_eq!(msg, "unknown key: attic_day"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(handle.take_outcome().is_none());
    }

    #[test]
    fn tampered_source_fails_hash_check() {
        let (tmp, mut backend) = setup();
        write_png(&tmp.path().join("source"), "room1_night.png", 8, 4, [0, 0, 0, 255]);
        match fetch_now(&mut backend, "room1_night") {
            FetchOutcome::Failed(Some(msg)) => assert!(msg.contains("hash mismatch"), "{msg}"),
            other => panic!("expected hash failure, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_bytes_fail() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken_day.png"), b"not a png").unwrap();
        let catalog = Catalog::build(tmp.path()).unwrap();
        let mut backend = CatalogBackend::new(catalog, BackendConfig::new(tmp.path())).unwrap();
        match fetch_now(&mut backend, "broken_day") {
            FetchOutcome::Failed(Some(msg)) => assert!(msg.starts_with("decode error"), "{msg}"),
            other => panic!("expected decode failure, got {other:?}"),
        }
    }

    #[test]
    fn download_cache_serves_and_purges() {
        let (tmp, mut backend) = setup();
        assert!(matches!(
            fetch_now(&mut backend, "room1_day"),
            FetchOutcome::Succeeded(_)
        ));
        let cached = tmp.path().join("cache").join("room1_day.png");
        assert!(cached.is_file());

        // Source gone: the verified cached copy still serves the key.
        std::fs::remove_file(tmp.path().join("source").join("room1_day.png")).unwrap();
        assert!(matches!(
            fetch_now(&mut backend, "room1_day"),
            FetchOutcome::Succeeded(_)
        ));

        backend.purge_cache();
        assert!(!cached.exists());
        assert!(matches!(
            fetch_now(&mut backend, "room1_day"),
            FetchOutcome::Failed(Some(_))
        ));
    }

    /// Backend over one PNG at `path` (relative to the source root), with the
    /// catalog entry adjusted by `edit`.
    fn single_entry_backend(
        path: &str,
        edit: impl FnOnce(&mut CatalogEntry),
    ) -> (tempfile::TempDir, CatalogBackend) {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        let file = source.join(path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]));
        img.save(&file).unwrap();
        let bytes = std::fs::read(&file).unwrap();

        let mut entry = CatalogEntry {
            key: "a_day".into(),
            path: path.into(),
            size: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
        };
        edit(&mut entry);
        let mut catalog = Catalog::new();
        catalog.insert(entry).unwrap();
        let config = BackendConfig::new(&source).with_cache_dir(tmp.path().join("cache"));
        let backend = CatalogBackend::new(catalog, config).unwrap();
        (tmp, backend)
    }

    #[test]
    fn oversized_declared_size_still_fetches() {
        let (_tmp, mut backend) = single_entry_backend("a_day.png", |e| e.size = u64::MAX);
        match fetch_now(&mut backend, "a_day") {
            FetchOutcome::Succeeded(texture) => assert_eq!(texture.width(), 2),
            FetchOutcome::Failed(msg) => panic!("fetch failed: {msg:?}"),
        }
    }

    #[test]
    fn uppercase_catalog_hash_matches() {
        let (_tmp, mut backend) =
            single_entry_backend("a_day.png", |e| e.sha256 = e.sha256.to_ascii_uppercase());
        assert!(matches!(
            fetch_now(&mut backend, "a_day"),
            FetchOutcome::Succeeded(_)
        ));
        // Second fetch is served from the download cache copy.
        assert!(matches!(
            fetch_now(&mut backend, "a_day"),
            FetchOutcome::Succeeded(_)
        ));
    }

    #[test]
    fn purge_removes_nested_cached_copies() {
        let (tmp, mut backend) = single_entry_backend("rooms/a_day.png", |_| {});
        assert!(matches!(
            fetch_now(&mut backend, "a_day"),
            FetchOutcome::Succeeded(_)
        ));
        let cache = tmp.path().join("cache");
        assert!(cache.join("rooms").join("a_day.png").is_file());

        backend.purge_cache();
        assert!(cache.is_dir());
        assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 0);
    }

    #[test]
    fn unwritable_download_cache_does_not_fail_fetch() {
        let (tmp, mut backend) = single_entry_backend("rooms/a_day.png", |_| {});
        // A file where the nested cache directory would go.
        std::fs::write(tmp.path().join("cache").join("rooms"), b"blocker").unwrap();
        match fetch_now(&mut backend, "a_day") {
            FetchOutcome::Succeeded(texture) => assert_eq!(texture.height(), 2),
            FetchOutcome::Failed(msg) => panic!("fetch failed: {msg:?}"),
        }
    }

    #[test]
    fn loader_over_catalog_backend() {
        let (_tmp, backend) = setup();
        let mut loader = TextureLoader::new(backend);
        let received = Rc::new(RefCell::new(Vec::new()));
        let errors = Rc::new(RefCell::new(Vec::new()));
        for key in ["room1_day", "room1_day", "room1_night", "attic_day"] {
            let received = Rc::clone(&received);
            let errors = Rc::clone(&errors);
            loader.load_async(
                key,
                move |t| received.borrow_mut().push(t),
                move |e| errors.borrow_mut().push(e.message().to_string()),
            );
        }
        assert_eq!(loader.in_flight_count(), 3);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !loader.is_idle() {
            assert!(Instant::now() < deadline, "loader did not go idle");
            loader.update();
            std::thread::sleep(Duration::from_millis(2));
        }

        let received = received.borrow();
        assert_eq!(received.len(), 3);
        assert_eq!(*errors.borrow(), vec!["unknown key: attic_day".to_string()]);
        assert!(loader.is_loaded("room1_day"));
        assert!(loader.is_loaded("room1_night"));
        assert!(!loader.is_loaded("attic_day"));
        assert_eq!(loader.stats().fetches_issued, 3);
    }
}
