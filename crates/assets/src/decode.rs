use crate::AssetError;
use panoview_common::Texture;

/// Decode PNG or JPEG bytes into an RGBA8 texture.
pub fn decode_texture(bytes: &[u8]) -> Result<Texture, AssetError> {
    let img = image::load_from_memory(bytes).map_err(|e| AssetError::Decode(e.to_string()))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Texture::from_rgba8(width, height, rgba.into_raw())?)
}
