//! Image encoding: `RasterImage` → base64 PNG for the remote request body.
//!
//! PNG keeps the normalised strokes exactly as the local engine saw them;
//! JPEG artefacts around glyph edges measurably hurt remote detection.

use crate::pipeline::raster::RasterImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use tracing::debug;

/// Encode to PNG bytes.
pub fn png_bytes(img: &RasterImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.to_dynamic()
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode to a base64 PNG string ready for the JSON payload.
pub fn encode_png_base64(img: &RasterImage) -> Result<String, image::ImageError> {
    let b64 = STANDARD.encode(png_bytes(img)?);
    debug!("Encoded {}x{} image → {} bytes base64", img.width(), img.height(), b64.len());
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_small_image() {
        let img = RasterImage::new(10, 10, 1, vec![200; 100]).unwrap();
        let b64 = encode_png_base64(&img).expect("encode should succeed");
        let decoded = STANDARD.decode(&b64).expect("valid base64");
        assert_eq!(&decoded[..8], b"\x89PNG\r\n\x1a\n");
        let back = image::load_from_memory(&decoded).unwrap();
        assert_eq!((back.width(), back.height()), (10, 10));
    }
}
