//! Content catalog: the list of deliverable textures with their content hashes.
//!
//! Stored as JSON:
//! ```text
//! {
//!   "version": 1,
//!   "entries": [
//!     { "key": "room1_day", "path": "room1_day.png", "size": 48213, "sha256": "9f2c..." }
//!   ]
//! }
//! ```
//! Paths are relative to the backend's source root.

use crate::AssetError;
use panoview_common::parse_room_key;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Component, Path};

/// Current catalog format version.
pub const CATALOG_VERSION: u32 = 1;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// One deliverable texture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub key: String,
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// Catalog of texture keys, kept sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    version: u32,
    entries: Vec<CatalogEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            entries: Vec::new(),
        }
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` (not recursively) for image files and catalog them.
    /// The key of each file is its stem.
    pub fn build(dir: impl AsRef<Path>) -> Result<Self, AssetError> {
        let dir = dir.as_ref();
        let _span = tracing::info_span!("catalog_build", dir = %dir.display()).entered();
        let mut catalog = Self::new();

        for dir_entry in std::fs::read_dir(dir)? {
            let path = dir_entry?.path();
            if !path.is_file() || !is_image(&path) {
                continue;
            }
            let (Some(stem), Some(name)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.file_name().and_then(|s| s.to_str()),
            ) else {
                tracing::warn!(path = %path.display(), "skipping file with non UTF-8 name");
                continue;
            };

            let data = std::fs::read(&path)?;
            catalog.insert(CatalogEntry {
                key: stem.to_string(),
                path: name.to_string(),
                size: data.len() as u64,
                sha256: sha256_hex(&data),
            })?;
        }

        tracing::info!(entries = catalog.len(), "catalog built");
        Ok(catalog)
    }

    /// Add an entry. Keys must be unique and paths must stay inside the
    /// source root.
    pub fn insert(&mut self, entry: CatalogEntry) -> Result<(), AssetError> {
        if entry.key.is_empty() {
            return Err(AssetError::InvalidKey);
        }
        if !is_contained(&entry.path) {
            return Err(AssetError::InvalidPath(entry.path));
        }
        match self.entries.binary_search_by(|e| e.key.cmp(&entry.key)) {
            Ok(_) => Err(AssetError::DuplicateKey(entry.key)),
            Err(pos) => {
                self.entries.insert(pos, entry);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries
            .binary_search_by(|e| e.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Rooms that have at least one day or night texture, sorted.
    pub fn rooms(&self) -> Vec<String> {
        self.keys()
            .filter_map(parse_room_key)
            .map(|(room, _)| room.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Total size in bytes of all cataloged files.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self, AssetError> {
        let raw: Catalog = serde_json::from_str(json)?;
        raw.validated()
    }

    /// Save the catalog to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Load a catalog from a JSON file. Fails on a version mismatch.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let file = std::fs::File::open(path)?;
        let raw: Catalog = serde_json::from_reader(std::io::BufReader::new(file))?;
        raw.validated()
    }

    /// Re-check a deserialized catalog: version, then every entry through
    /// `insert` so ordering, uniqueness and path rules hold.
    fn validated(self) -> Result<Self, AssetError> {
        if self.version != CATALOG_VERSION {
            return Err(AssetError::VersionMismatch {
                file_version: self.version,
                expected_version: CATALOG_VERSION,
            });
        }
        let mut catalog = Self::new();
        for entry in self.entries {
            catalog.insert(entry)?;
        }
        Ok(catalog)
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_contained(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
