//! Texture streaming: memoized single-flight loading, preload batches, room switching.
//!
//! # Invariants
//! - At most one backend fetch per key is running at any time.
//! - A key is never both cached and in flight.
//! - Subscribers of one fetch are notified in registration order.
//! - Failures are never cached; the next request refetches.

mod batch;
mod config;
mod loader;
mod room;
mod timing;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, LoaderConfig};
pub use loader::{LoadError, LoaderStats, ProgressObserverId, TextureLoader};
pub use room::RoomSwitcher;

pub fn crate_info() -> &'static str {
    "panoview-stream v0.1.0"
}
