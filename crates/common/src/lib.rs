//! Shared types for panoview: textures, room texture keys and the backend seam.

pub mod backend;
pub mod types;

pub use backend::{FetchHandle, FetchOutcome, TextureBackend};
pub use types::{Texture, TextureData, TextureError, Variant, parse_room_key, room_key};

pub fn crate_info() -> &'static str {
    "panoview-common v0.1.0"
}
