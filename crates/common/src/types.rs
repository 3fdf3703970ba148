use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Errors from constructing textures.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("texture has zero extent: {width}x{height}")]
    ZeroExtent { width: u32, height: u32 },
    #[error("pixel buffer is {actual} bytes, expected {expected} for RGBA8")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Decoded RGBA8 pixel data.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl fmt::Debug for TextureData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}

/// A decoded texture shared by reference count.
///
/// Clones are cheap and point at the same pixel data; every subscriber of a
/// single fetch receives the same instance, which `ptr_eq` can check.
#[derive(Debug, Clone)]
pub struct Texture(Arc<TextureData>);

impl Texture {
    /// Wrap an RGBA8 buffer, validating its length against the extent.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, TextureError> {
        if width == 0 || height == 0 {
            return Err(TextureError::ZeroExtent { width, height });
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(TextureError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self(Arc::new(TextureData {
            width,
            height,
            pixels,
        })))
    }

    /// A single-colour texture, handy for placeholders.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, TextureError> {
        let count = width as usize * height as usize;
        let pixels = rgba.iter().copied().cycle().take(count * 4).collect();
        Self::from_rgba8(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.0.pixels
    }

    pub fn data(&self) -> &TextureData {
        &self.0
    }

    /// Size of the decoded pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.0.pixels.len()
    }

    /// True if both textures are the same instance.
    pub fn ptr_eq(a: &Texture, b: &Texture) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

/// Lighting variant of a room panorama.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Day,
    Night,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Day => "day",
            Variant::Night => "night",
        }
    }

    /// The other variant.
    pub fn toggled(self) -> Self {
        match self {
            Variant::Day => Variant::Night,
            Variant::Night => Variant::Day,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Variant::Day),
            "night" => Ok(Variant::Night),
            other => Err(format!("unknown variant: {other}")),
        }
    }
}

/// Texture key for a room panorama: `{room}_{variant}`.
pub fn room_key(room: &str, variant: Variant) -> String {
    format!("{room}_{variant}")
}

/// Split a room key back into room name and variant.
pub fn parse_room_key(key: &str) -> Option<(&str, Variant)> {
    let (room, variant) = key.rsplit_once('_')?;
    if room.is_empty() {
        return None;
    }
    Some((room, variant.parse().ok()?))
}
