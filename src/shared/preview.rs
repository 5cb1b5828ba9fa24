// This is free and unencumbered software released into the public domain.

use crate::shared::{PixelBuffer, PixelFormat, RecorderError};
use image::RgbaImage;

/// Displayable bitmap: RGBA, premultiplied alpha.
pub type PreviewImage = RgbaImage;

/// Renders a platform pixel buffer into a displayable bitmap.
///
/// The buffer is locked for the duration of the copy and unlocked on every
/// path out of this function.
pub fn to_preview_image(pixels: &dyn PixelBuffer) -> Result<PreviewImage, RecorderError> {
    pixels.lock()?;
    let pixels = scopeguard::guard(pixels, |p| p.unlock());

    let width = pixels.width();
    let height = pixels.height();
    let stride = pixels.bytes_per_row();
    let format = pixels.pixel_format();
    let row_len = width * format.bytes_per_pixel();
    let data = pixels.base_address();

    if width == 0 || height == 0 {
        return Err(RecorderError::InvalidPixelBuffer(format!(
            "empty pixel buffer ({width}x{height})"
        )));
    }
    if stride < row_len || data.len() < stride * (height - 1) + row_len {
        return Err(RecorderError::InvalidPixelBuffer(format!(
            "pixel buffer too small: {} bytes for {width}x{height} stride {stride}",
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(width * height * 4);
    for row in data.chunks(stride).take(height) {
        for px in row[..row_len].chunks_exact(4) {
            let (r, g, b, a) = match format {
                PixelFormat::Bgra8 => (px[2], px[1], px[0], px[3]),
                PixelFormat::Rgba8 => (px[0], px[1], px[2], px[3]),
            };
            out.extend_from_slice(&[premultiply(r, a), premultiply(g, a), premultiply(b, a), a]);
        }
    }

    RgbaImage::from_raw(width as u32, height as u32, out)
        .ok_or_else(|| RecorderError::InvalidPixelBuffer("preview bitmap size mismatch".into()))
}

#[inline]
fn premultiply(c: u8, a: u8) -> u8 {
    ((c as u16 * a as u16 + 127) / 255) as u8
}
