//! Texture delivery: content catalog, catalog-backed fetch backend, decoding.
//!
//! Textures are identified by catalog key and verified against the SHA-256
//! recorded in the catalog before they are decoded or cached.
//!
//! # Layout
//! A catalog JSON file lists keys, relative paths, sizes and hashes. The
//! backend reads paths from a source root and keeps verified copies in an
//! optional download cache directory.

mod backend;
mod catalog;
mod decode;

pub use backend::{BackendConfig, CatalogBackend, CatalogFetch};
pub use catalog::{CATALOG_VERSION, Catalog, CatalogEntry, sha256_hex};
pub use decode::decode_texture;

/// Errors from catalog and delivery operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog version mismatch: file has v{file_version}, expected v{expected_version}")]
    VersionMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("unknown key: {0}")]
    UnknownKey(String),
    #[error("catalog entry has an empty key")]
    InvalidKey,
    #[error("duplicate catalog key: {0}")]
    DuplicateKey(String),
    #[error("catalog path escapes the source root: {0}")]
    InvalidPath(String),
    #[error("hash mismatch for {key}: expected {expected}, got {actual}")]
    HashMismatch {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("texture error: {0}")]
    Texture(#[from] panoview_common::TextureError),
    #[error("worker pool error: {0}")]
    Pool(String),
}

pub fn crate_info() -> &'static str {
    "panoview-assets v0.1.0"
}
