//! Image normalisation: turn a camera photo or screenshot of a slide into a
//! clean single-channel raster the recognisers read well.
//!
//! Two paths:
//!
//! * [`ImageNormalizer::normalize`]: the photo path. Resize, grayscale,
//!   denoise, contrast, sharpen, and (aggressive only) binarise.
//! * [`ImageNormalizer::normalize_slide`]: the presentation path. Resize,
//!   grayscale, invert dark themes, close, adaptive contrast.
//!
//! Both are deterministic: identical input always yields a bit-identical
//! output, which the extractor and its tests rely on.

use crate::config::ExtractionConfig;
use crate::pipeline::filters;
use crate::pipeline::raster::RasterImage;
use std::time::Instant;
use tracing::debug;

/// Filter strength for non-local means (gentle path).
const NLM_STRENGTH: f32 = 3.0;
const NLM_PATCH_RADIUS: u32 = 1;
const NLM_SEARCH_RADIUS: u32 = 3;

/// Bilateral parameters (aggressive path): diameter, sigma colour, sigma space.
const BILATERAL: (u32, f32, f32) = (9, 75.0, 75.0);

const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_PHOTO: f32 = 2.0;
const CLAHE_CLIP_SLIDE: f32 = 3.0;

/// Mean luminance below which a slide counts as dark-themed.
const DARK_BACKGROUND_MEAN: f64 = 128.0;

/// Deterministic cleanup pipeline bounded by a maximum output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageNormalizer {
    max_width: u32,
    max_height: u32,
}

impl ImageNormalizer {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.max_width, config.max_height)
    }

    /// Run the photo path.
    ///
    /// Gentle (`aggressive == false`): non-local-means denoise, CLAHE with
    /// clip limit 2, 3×3 sharpen. Aggressive: bilateral denoise, global
    /// equalisation, 5×5 sharpen, then Otsu ∧ adaptive binarisation.
    pub fn normalize(&self, image: &RasterImage, aggressive: bool) -> RasterImage {
        let started = Instant::now();
        let resized = image.resize_area(self.max_width, self.max_height);
        let gray = resized.to_gray();

        let out = if aggressive {
            let (d, sc, ss) = BILATERAL;
            let denoised = filters::bilateral(&gray, d, sc, ss);
            let enhanced = filters::equalize(&denoised);
            let sharpened = filters::convolve(&enhanced, &filters::SHARPEN_STRONG, 5, 1.0 / 8.0);
            filters::binarize(&sharpened)
        } else {
            let denoised =
                filters::non_local_means(&gray, NLM_STRENGTH, NLM_PATCH_RADIUS, NLM_SEARCH_RADIUS);
            let enhanced = filters::clahe(&denoised, CLAHE_CLIP_PHOTO, CLAHE_TILES, CLAHE_TILES);
            filters::convolve(&enhanced, &filters::SHARPEN_GENTLE, 3, 1.0)
        };

        debug!(
            "Normalised {}x{} → {}x{} (aggressive={}) in {}ms",
            image.width(),
            image.height(),
            out.width(),
            out.height(),
            aggressive,
            started.elapsed().as_millis()
        );
        RasterImage::from_gray(out)
    }

    /// Run the presentation-slide path.
    ///
    /// Dark backgrounds (mean luminance < 128) are inverted first so text is
    /// always dark on light before closing and CLAHE (clip limit 3).
    pub fn normalize_slide(&self, image: &RasterImage) -> RasterImage {
        let resized = image.resize_area(self.max_width, self.max_height);
        let mut gray = resized.to_gray();

        let brightness = filters::mean(&gray);
        if brightness < DARK_BACKGROUND_MEAN {
            debug!("Dark slide (mean {:.1}), inverting", brightness);
            gray = filters::invert(&gray);
        }

        let closed = filters::close_2x2(&gray);
        let out = filters::clahe(&closed, CLAHE_CLIP_SLIDE, CLAHE_TILES, CLAHE_TILES);
        RasterImage::from_gray(out)
    }
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}
