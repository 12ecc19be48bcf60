//! The external encoder capability: pixels in, WebP bytes out.
//!
//! Backed by libwebp through the `webp` crate — the only Rust WebP encoder
//! with a real quality knob (the `image` crate encodes WebP lossless-only).
//! Everything here is stateless and safe to call concurrently from multiple
//! workers; the one-time [`probe`] is how the pipeline verifies the backend
//! before queueing work.
//!
//! The fallback codec is lossless PNG via the `image` crate: when libwebp
//! rejects an image, the page is preserved in PNG rather than dropped.

use crate::error::Cbz2WebpError;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use webp::Encoder;

/// Encode an image as WebP at the given quality, or losslessly.
///
/// Pixels are normalised to RGBA8 first; libwebp only accepts 8-bit RGB(A)
/// buffers and source pages arrive in whatever colour type their codec used.
pub(crate) fn encode(
    image: &DynamicImage,
    quality: u8,
    lossless: bool,
) -> Result<Vec<u8>, String> {
    let rgba = image.to_rgba8();
    let encoder = Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let memory = encoder
        .encode_simple(lossless, f32::from(quality))
        .map_err(|e| format!("libwebp encoding error: {e:?}"))?;
    Ok(memory.to_vec())
}

/// Lossless PNG re-encode used when the WebP encode fails.
pub(crate) fn encode_fallback_png(image: &DynamicImage) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(buf)
}

/// One-shot readiness probe: encode a single pixel.
///
/// Called exactly once per converter (guarded by a `OnceCell`); a failure
/// here means the encoder backend is unusable and the whole chapter
/// conversion must abort before any work is queued.
pub(crate) fn probe() -> Result<(), Cbz2WebpError> {
    let pixel = DynamicImage::new_rgba8(1, 1);
    encode(&pixel, 75, false)
        .map(|_| ())
        .map_err(Cbz2WebpError::EncoderUnavailable)
}
