//! Pixel filters on 8-bit grayscale rasters.
//!
//! Where `imageproc` ships the operation (Otsu level, global equalisation,
//! Gaussian blur, bilateral filter, kernel convolution, grayscale closing) we
//! call it. Non-local means and CLAHE have no counterpart there and are
//! implemented here directly over the raw buffer. Every filter is a pure
//! function of its input; none keep state between calls.
//!
//! Borders replicate the nearest edge pixel unless noted otherwise.

use image::{GrayImage, Luma};
use imageproc::contrast::{equalize_histogram, otsu_level};
use imageproc::filter::{bilateral_filter, gaussian_blur_f32, Kernel};
use imageproc::morphology::{grayscale_close, Mask};

/// 3×3 sharpening kernel used by the gentle path.
pub const SHARPEN_GENTLE: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];

/// 5×5 sharpening kernel used by the aggressive path; apply with scale 1/8.
#[rustfmt::skip]
pub const SHARPEN_STRONG: [f32; 25] = [
    -1.0, -1.0, -1.0, -1.0, -1.0,
    -1.0,  2.0,  2.0,  2.0, -1.0,
    -1.0,  2.0,  8.0,  2.0, -1.0,
    -1.0,  2.0,  2.0,  2.0, -1.0,
    -1.0, -1.0, -1.0, -1.0, -1.0,
];

/// Offset added to the local Gaussian mean before comparing (block 11, C = 2).
const ADAPTIVE_C: f32 = 2.0;
/// Gaussian sigma equivalent to an 11-pixel adaptive-threshold block.
const ADAPTIVE_SIGMA: f32 = 2.0;

#[inline]
fn at(src: &GrayImage, x: i64, y: i64) -> u8 {
    let cx = x.clamp(0, src.width() as i64 - 1) as u32;
    let cy = y.clamp(0, src.height() as i64 - 1) as u32;
    src.get_pixel(cx, cy).0[0]
}

#[inline]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Non-local-means denoising.
///
/// Each output pixel is a weighted mean of pixels in a
/// `(2·search_radius+1)²` window, weighted by `exp(-d / h²)` where `d` is the
/// mean squared difference between the `(2·patch_radius+1)²` patches around
/// the two pixels. Patch distances are accumulated per offset with an
/// integral image, so the cost is independent of the patch size.
pub fn non_local_means(src: &GrayImage, h: f32, patch_radius: u32, search_radius: u32) -> GrayImage {
    let (w, ht) = (src.width() as usize, src.height() as usize);
    if w == 0 || ht == 0 {
        return src.clone();
    }
    let n = w * ht;
    let pr = patch_radius as i64;
    let sr = search_radius as i64;
    let inv_h2 = 1.0 / f64::from((h * h).max(f32::EPSILON));

    let mut weight_sum = vec![0f64; n];
    let mut value_sum = vec![0f64; n];
    let mut diff = vec![0f64; n];
    let mut integral = vec![0f64; (w + 1) * (ht + 1)];

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            for y in 0..ht {
                for x in 0..w {
                    let p = src.get_pixel(x as u32, y as u32).0[0] as f64;
                    let q = at(src, x as i64 + dx, y as i64 + dy) as f64;
                    diff[y * w + x] = (p - q) * (p - q);
                }
            }
            for y in 0..ht {
                let mut row = 0f64;
                for x in 0..w {
                    row += diff[y * w + x];
                    integral[(y + 1) * (w + 1) + x + 1] = integral[y * (w + 1) + x + 1] + row;
                }
            }
            for y in 0..ht as i64 {
                let y0 = (y - pr).max(0) as usize;
                let y1 = (y + pr + 1).min(ht as i64) as usize;
                for x in 0..w as i64 {
                    let x0 = (x - pr).max(0) as usize;
                    let x1 = (x + pr + 1).min(w as i64) as usize;
                    let sum = integral[y1 * (w + 1) + x1] - integral[y0 * (w + 1) + x1]
                        - integral[y1 * (w + 1) + x0]
                        + integral[y0 * (w + 1) + x0];
                    let count = ((y1 - y0) * (x1 - x0)) as f64;
                    let weight = (-(sum / count) * inv_h2).exp();
                    let i = y as usize * w + x as usize;
                    weight_sum[i] += weight;
                    value_sum[i] += weight * at(src, x + dx, y + dy) as f64;
                }
            }
        }
    }

    let out: Vec<u8> = value_sum
        .iter()
        .zip(&weight_sum)
        .map(|(v, wsum)| to_u8((v / wsum) as f32))
        .collect();
    GrayImage::from_raw(src.width(), src.height(), out).unwrap_or_else(|| src.clone())
}

/// Edge-preserving bilateral filter with a `diameter` × `diameter` window.
pub fn bilateral(src: &GrayImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    if src.width() == 0 || src.height() == 0 {
        return src.clone();
    }
    bilateral_filter(src, diameter, sigma_color, sigma_space)
}

/// Contrast-limited adaptive histogram equalisation.
///
/// The image is split into a `tiles_x` × `tiles_y` grid (fewer when the
/// image is smaller than the grid). Each tile's histogram is clipped at
/// `clip_limit × tile_area / 256` with the excess redistributed evenly, and
/// pixels are mapped by bilinear interpolation between the four nearest tile
/// lookup tables.
pub fn clahe(src: &GrayImage, clip_limit: f32, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (w, h) = (src.width() as usize, src.height() as usize);
    if w == 0 || h == 0 {
        return src.clone();
    }
    let tx = (tiles_x as usize).clamp(1, w);
    let ty = (tiles_y as usize).clamp(1, h);
    let x_bounds: Vec<usize> = (0..=tx).map(|i| i * w / tx).collect();
    let y_bounds: Vec<usize> = (0..=ty).map(|i| i * h / ty).collect();

    let mut luts = vec![[0u8; 256]; tx * ty];
    for j in 0..ty {
        for i in 0..tx {
            let mut hist = [0u32; 256];
            for y in y_bounds[j]..y_bounds[j + 1] {
                for x in x_bounds[i]..x_bounds[i + 1] {
                    hist[src.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
                }
            }
            let area = ((y_bounds[j + 1] - y_bounds[j]) * (x_bounds[i + 1] - x_bounds[i])) as u32;
            luts[j * tx + i] = clipped_equalisation(&mut hist, area, clip_limit);
        }
    }

    let tile_w = w as f32 / tx as f32;
    let tile_h = h as f32 / ty as f32;
    let axis = |pos: usize, tile: f32, count: usize| {
        let f = (pos as f32 + 0.5) / tile - 0.5;
        let lo = f.floor();
        let frac = f - lo;
        let lo = lo as i64;
        let a = lo.clamp(0, count as i64 - 1) as usize;
        let b = (lo + 1).clamp(0, count as i64 - 1) as usize;
        (a, b, frac)
    };

    let mut out = GrayImage::new(src.width(), src.height());
    for y in 0..h {
        let (y0, y1, fy) = axis(y, tile_h, ty);
        for x in 0..w {
            let (x0, x1, fx) = axis(x, tile_w, tx);
            let v = src.get_pixel(x as u32, y as u32).0[0] as usize;
            let tl = luts[y0 * tx + x0][v] as f32;
            let tr = luts[y0 * tx + x1][v] as f32;
            let bl = luts[y1 * tx + x0][v] as f32;
            let br = luts[y1 * tx + x1][v] as f32;
            let top = tl + (tr - tl) * fx;
            let bottom = bl + (br - bl) * fx;
            out.put_pixel(x as u32, y as u32, Luma([to_u8(top + (bottom - top) * fy)]));
        }
    }
    out
}

fn clipped_equalisation(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        for (v, slot) in lut.iter_mut().enumerate() {
            *slot = v as u8;
        }
        return lut;
    }
    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for bin in hist.iter_mut() {
            *bin += share;
        }
        if remainder > 0 {
            let step = (256 / remainder).max(1);
            for bin in hist.iter_mut().step_by(step).take(remainder) {
                *bin += 1;
            }
        }
    }
    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (v, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[v] = to_u8(cdf as f32 * scale);
    }
    lut
}

/// Global histogram equalisation.
pub fn equalize(src: &GrayImage) -> GrayImage {
    equalize_histogram(src)
}

/// Convolve with a square `ksize` × `ksize` kernel (row-major), multiply by
/// `scale`, round and saturate to 8 bits.
pub fn convolve(src: &GrayImage, kernel: &[f32], ksize: usize, scale: f32) -> GrayImage {
    let k = ksize as u32;
    Kernel::new(kernel, k, k).filter(src, |out: &mut u8, acc: f32| *out = to_u8(acc * scale))
}

/// Binarise as the AND of a global Otsu threshold and an adaptive
/// local-Gaussian threshold. A pixel stays white only if both agree it is
/// background.
pub fn binarize(src: &GrayImage) -> GrayImage {
    let global = otsu_level(src);
    let local_mean = gaussian_blur_f32(src, ADAPTIVE_SIGMA);
    let mut out = GrayImage::new(src.width(), src.height());
    for (x, y, px) in src.enumerate_pixels() {
        let v = px.0[0];
        let otsu_white = v > global;
        let adaptive_white = v as f32 > local_mean.get_pixel(x, y).0[0] as f32 - ADAPTIVE_C;
        let value = if otsu_white && adaptive_white { 255 } else { 0 };
        out.put_pixel(x, y, Luma([value]));
    }
    out
}

/// Morphological closing (dilate, then erode) with a 2×2 rectangle anchored
/// at its bottom-right cell. Fills pinholes and hairline gaps in glyphs.
pub fn close_2x2(src: &GrayImage) -> GrayImage {
    if src.width() == 0 || src.height() == 0 {
        return src.clone();
    }
    let mask = Mask::from_image(&GrayImage::from_pixel(2, 2, Luma([255])), 1, 1);
    grayscale_close(src, &mask)
}

/// Photographic negative.
pub fn invert(src: &GrayImage) -> GrayImage {
    let mut out = src.clone();
    for px in out.pixels_mut() {
        px.0[0] = 255 - px.0[0];
    }
    out
}

/// Mean pixel value, 0 for an empty image.
pub fn mean(src: &GrayImage) -> f64 {
    let n = src.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    src.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n as f64
}
