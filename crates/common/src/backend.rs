//! The seam between the texture loader and whatever actually delivers bytes.

use crate::types::Texture;

/// Final result of a fetch as reported by the backend.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Succeeded(Texture),
    /// The backend's error message, if it gave one.
    Failed(Option<String>),
}

/// An asynchronous fetch started by a [`TextureBackend`].
///
/// The loader polls handles once per tick. Dropping a handle releases it back
/// to the backend.
pub trait FetchHandle {
    fn is_done(&self) -> bool;

    /// Completion fraction. Backends should report values in `[0, 1]`; the
    /// loader clamps whatever it gets.
    fn percent_complete(&self) -> f32;

    /// Take the outcome of a finished fetch. Returns `None` while the fetch is
    /// still running or after the outcome was already taken.
    fn take_outcome(&mut self) -> Option<FetchOutcome>;
}

/// Delivers textures by key.
pub trait TextureBackend {
    /// Start fetching `key`. Failures are reported through the handle.
    fn fetch(&mut self, key: &str) -> Box<dyn FetchHandle>;

    /// Drop any persistent cache the backend keeps. Best effort.
    fn purge_cache(&mut self) {}
}
