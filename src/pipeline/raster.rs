//! Owned pixel buffers and the area-averaging resize.
//!
//! [`RasterImage`] is the value that flows between pipeline stages. Every
//! stage takes `&RasterImage` and returns a fresh one, so a slide's original
//! decode is never mutated and repeated runs see identical input.

use crate::error::DeckScanError;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, Rgba};
use std::fmt;

/// An owned 8-bit raster with 1 (gray), 3 (RGB) or 4 (RGBA) channels.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl RasterImage {
    /// Wrap a row-major interleaved buffer, checking its length and depth.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self, DeckScanError> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(DeckScanError::Internal(format!(
                "unsupported channel count {channels}"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(DeckScanError::Internal(format!(
                "pixel buffer holds {} bytes, expected {expected} for {width}x{height}x{channels}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    /// Convert a decoded image, keeping gray sources single-channel.
    ///
    /// 16-bit and float sources are reduced to 8 bits per channel.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        let color = img.color();
        let (width, height) = (img.width(), img.height());
        let (channels, pixels) = if !color.has_color() {
            (1, img.into_luma8().into_raw())
        } else if color.has_alpha() {
            (4, img.into_rgba8().into_raw())
        } else {
            (3, img.into_rgb8().into_raw())
        };
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    pub fn from_gray(img: GrayImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            channels: 1,
            pixels: img.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Back to an `image` crate value, e.g. for PNG encoding.
    pub fn to_dynamic(&self) -> DynamicImage {
        let (w, h) = (self.width, self.height);
        let buf = self.pixels.clone();
        // Lengths are checked at construction, so the buffers always fit.
        match self.channels {
            1 => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, buf).map(DynamicImage::ImageLuma8),
            3 => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, buf).map(DynamicImage::ImageRgb8),
            _ => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, buf).map(DynamicImage::ImageRgba8),
        }
        .unwrap_or_else(|| DynamicImage::new_luma8(w, h))
    }

    /// Single-channel luminance using BT.601 weights in 14-bit fixed point.
    ///
    /// Alpha is ignored.
    pub fn to_gray(&self) -> GrayImage {
        if self.channels == 1 {
            return GrayImage::from_raw(self.width, self.height, self.pixels.clone())
                .unwrap_or_else(|| GrayImage::new(self.width, self.height));
        }
        let step = self.channels as usize;
        let luma: Vec<u8> = self
            .pixels
            .chunks_exact(step)
            .map(|px| {
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                ((r * 4899 + g * 9617 + b * 1868 + (1 << 13)) >> 14) as u8
            })
            .collect();
        GrayImage::from_raw(self.width, self.height, luma)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// Downscale to fit within `max_width` × `max_height`, preserving aspect
    /// ratio, using area averaging. Never upscales.
    pub fn resize_area(&self, max_width: u32, max_height: u32) -> RasterImage {
        if self.is_empty() || (self.width <= max_width && self.height <= max_height) {
            return self.clone();
        }
        let scale = f64::min(
            max_width as f64 / self.width as f64,
            max_height as f64 / self.height as f64,
        );
        let new_w = ((self.width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
        let new_h = ((self.height as f64 * scale).round() as u32).clamp(1, max_height.max(1));

        let ch = self.channels as usize;
        let (src_w, src_h) = (self.width as usize, self.height as usize);
        let x_taps = area_taps(src_w, new_w as usize);
        let y_taps = area_taps(src_h, new_h as usize);

        // Horizontal pass into an f32 scratch buffer, then vertical.
        let mut horiz = vec![0f32; new_w as usize * src_h * ch];
        for y in 0..src_h {
            let row = &self.pixels[y * src_w * ch..(y + 1) * src_w * ch];
            for (dx, taps) in x_taps.iter().enumerate() {
                for c in 0..ch {
                    let acc: f32 = taps.iter().map(|&(sx, w)| row[sx * ch + c] as f32 * w).sum();
                    horiz[(y * new_w as usize + dx) * ch + c] = acc;
                }
            }
        }

        let out_stride = new_w as usize * ch;
        let mut out = vec![0u8; new_h as usize * out_stride];
        for (dy, taps) in y_taps.iter().enumerate() {
            for i in 0..out_stride {
                let acc: f32 = taps.iter().map(|&(sy, w)| horiz[sy * out_stride + i] * w).sum();
                out[dy * out_stride + i] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }

        RasterImage {
            width: new_w,
            height: new_h,
            channels: self.channels,
            pixels: out,
        }
    }
}

/// For each destination index, the source indices it covers and their
/// normalised fractional-coverage weights.
fn area_taps(src: usize, dst: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|d| {
            let start = d as f64 * scale;
            let end = ((d + 1) as f64 * scale).min(src as f64);
            let mut taps = Vec::new();
            let mut s = start.floor() as usize;
            while s < src && (s as f64) < end {
                let covered = end.min(s as f64 + 1.0) - start.max(s as f64);
                if covered > 1e-9 {
                    taps.push((s, covered));
                }
                s += 1;
            }
            let total: f64 = taps.iter().map(|&(_, w)| w).sum();
            taps.into_iter()
                .map(|(s, w)| (s, (w / total) as f32))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, channels: u8, value: u8) -> RasterImage {
        RasterImage::new(
            width,
            height,
            channels,
            vec![value; (width * height) as usize * channels as usize],
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_bad_buffers() {
        assert!(RasterImage::new(2, 2, 3, vec![0; 11]).is_err());
        assert!(RasterImage::new(2, 2, 2, vec![0; 8]).is_err());
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let img = solid(320, 240, 3, 90);
        assert_eq!(img.resize_area(1920, 1080), img);
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let img = solid(400, 200, 1, 10);
        let out = img.resize_area(100, 100);
        assert_eq!((out.width(), out.height()), (100, 50));

        let tall = solid(300, 900, 3, 10);
        let out = tall.resize_area(1920, 300);
        assert_eq!((out.width(), out.height()), (100, 300));
        assert_eq!(out.channels(), 3);
    }

    #[test]
    fn area_average_of_checkerboard_is_mid_gray() {
        let pixels: Vec<u8> = (0..16u32)
            .flat_map(|y| (0..16u32).map(move |x| if (x + y) % 2 == 0 { 0 } else { 255 }))
            .collect();
        let img = RasterImage::new(16, 16, 1, pixels).unwrap();
        let out = img.resize_area(8, 8);
        assert!(out.pixels().iter().all(|&p| p == 128 || p == 127));
    }

    #[test]
    fn constant_image_stays_constant() {
        let out = solid(37, 23, 4, 201).resize_area(10, 10);
        assert!(out.pixels().iter().all(|&p| p == 201));
    }

    #[test]
    fn gray_conversion_uses_luminance_weights() {
        let img = RasterImage::new(3, 1, 3, vec![255, 0, 0, 0, 255, 0, 0, 0, 255]).unwrap();
        let gray = img.to_gray();
        assert_eq!(gray.as_raw(), &vec![76, 150, 29]);
    }

    #[test]
    fn dynamic_round_trip_keeps_depth() {
        let gray = RasterImage::from_dynamic(DynamicImage::new_luma8(4, 3));
        assert_eq!(gray.channels(), 1);
        let rgba = RasterImage::from_dynamic(DynamicImage::new_rgba8(4, 3));
        assert_eq!(rgba.channels(), 4);
        assert_eq!(RasterImage::from_dynamic(rgba.to_dynamic()), rgba);
    }
}
