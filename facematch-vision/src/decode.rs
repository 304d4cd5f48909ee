use anyhow::{bail, Context, Result};
use image::DynamicImage;

/// Decode an uploaded image into 8-bit RGB, whatever its source format.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        bail!("image payload is empty");
    }
    let img = image::load_from_memory(bytes).context("decoding image")?;
    log::debug!(
        "decoded {}x{} image ({:?})",
        img.width(),
        img.height(),
        img.color()
    );
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}
