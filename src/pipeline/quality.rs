//! Scalar quality metrics and capture advice for a slide image.

use crate::pipeline::raster::RasterImage;
use image::GrayImage;
use imageproc::filter::laplacian_filter;
use serde::{Deserialize, Serialize};

/// Quality metrics for one image.
///
/// `blur_score`, `noise_level` and `overall_quality` lie in `[0, 1]`;
/// `brightness` in `[0, 255]`; `contrast` is the raw luminance standard
/// deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub blur_score: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub noise_level: f64,
    pub overall_quality: f64,
}

/// Metrics and advice for one labelled input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub label: String,
    pub metrics: QualityMetrics,
    pub recommendations: Vec<String>,
}

const BLUR_SCALE: f64 = 1000.0;
// Same Laplacian variance as the blur score on a coarser scale.
const NOISE_SCALE: f64 = 10000.0;
const CONTRAST_SCALE: f64 = 50.0;
const MIN_WIDTH: u32 = 800;
const MIN_HEIGHT: u32 = 600;

/// Computes [`QualityMetrics`] and advisory strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAnalyzer;

impl QualityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, image: &RasterImage) -> QualityMetrics {
        metrics_for(&image.to_gray())
    }

    /// Advice for improving the capture, in a fixed order. Never empty.
    ///
    /// Unlike [`recommendations`], this also flags captures smaller than
    /// 800x600.
    pub fn recommend(&self, image: &RasterImage) -> Vec<String> {
        advice(&self.analyze(image), Some((image.width(), image.height())))
    }

    /// Metrics and advice together, computed from one analysis pass.
    pub fn report(&self, image: &RasterImage, label: impl Into<String>) -> QualityReport {
        let metrics = self.analyze(image);
        QualityReport {
            label: label.into(),
            recommendations: advice(&metrics, Some((image.width(), image.height()))),
            metrics,
        }
    }
}

fn metrics_for(gray: &GrayImage) -> QualityMetrics {
    let lap_var = laplacian_variance(gray);
    let (brightness, contrast) = mean_and_std(gray.as_raw().iter().map(|&v| v as f64));
    let blur_score = (lap_var / BLUR_SCALE).clamp(0.0, 1.0);
    let noise_level = (lap_var / NOISE_SCALE).clamp(0.0, 1.0);
    QualityMetrics {
        blur_score,
        brightness,
        contrast,
        noise_level,
        overall_quality: (blur_score + (contrast / CONTRAST_SCALE).clamp(0.0, 1.0)) / 2.0,
    }
}

/// Population variance of the 4-neighbour Laplacian response.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let lap = laplacian_filter(gray);
    mean_and_std(lap.pixels().map(|p| p.0[0] as f64)).1.powi(2)
}

fn mean_and_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (n, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    (mean, var.sqrt())
}

/// Threshold-driven capture advice for a set of metrics.
pub fn recommendations(m: &QualityMetrics) -> Vec<String> {
    advice(m, None)
}

fn advice(m: &QualityMetrics, size: Option<(u32, u32)>) -> Vec<String> {
    let mut out = Vec::new();
    if m.blur_score < 0.3 {
        out.push("Image is blurry - retake with improved focus".to_string());
    }
    if let Some((width, height)) = size {
        if width < MIN_WIDTH || height < MIN_HEIGHT {
            out.push("Image resolution is low - use at least 800x600".to_string());
        }
    }
    if m.brightness < 50.0 {
        out.push("Image is too dark - increase lighting or exposure".to_string());
    } else if m.brightness > 200.0 {
        out.push("Image is too bright - reduce exposure".to_string());
    }
    if m.contrast < 20.0 {
        out.push("Low contrast - adjust camera settings or lighting".to_string());
    }
    if m.noise_level > 0.7 {
        out.push("High noise detected - use better lighting or a lower ISO".to_string());
    }
    if out.is_empty() {
        out.push("Image quality is acceptable for OCR".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> RasterImage {
        RasterImage::from_gray(GrayImage::from_fn(width, height, |x, y| image::Luma([f(x, y)])))
    }

    #[test]
    fn flat_image_is_blurry_and_flat() {
        let m = QualityAnalyzer::new().analyze(&gray(20, 20, |_, _| 128));
        assert_eq!(m.blur_score, 0.0);
        assert_eq!(m.noise_level, 0.0);
        assert!((m.brightness - 128.0).abs() < 1e-9);
        assert_eq!(m.contrast, 0.0);
        assert_eq!(m.overall_quality, 0.0);
        let advice = recommendations(&m);
        assert_eq!(advice.len(), 2);
        assert!(advice[0].contains("blurry"));
        assert!(advice[1].contains("Low contrast"));
    }

    #[test]
    fn checkerboard_is_sharp_and_noisy() {
        let m = QualityAnalyzer::new().analyze(&gray(32, 32, |x, y| if (x + y) % 2 == 0 { 0 } else { 255 }));
        assert_eq!(m.blur_score, 1.0);
        assert_eq!(m.noise_level, 1.0);
        assert!((m.contrast - 127.5).abs() < 1e-9);
        assert_eq!(m.overall_quality, 1.0);
        assert_eq!(
            recommendations(&m),
            vec!["High noise detected - use better lighting or a lower ISO".to_string()]
        );
    }

    #[test]
    fn noise_and_blur_share_one_variance() {
        let m = QualityAnalyzer::new().analyze(&gray(40, 40, |x, _| if x % 10 == 0 { 140 } else { 120 }));
        assert!(m.blur_score > 0.0 && m.blur_score < 1.0);
        assert!((m.noise_level * 10.0 - m.blur_score).abs() < 1e-9);
    }

    #[test]
    fn small_captures_get_resolution_advice() {
        let stripes = |x: u32, _: u32| -> u8 { if (x / 4) % 2 == 0 { 30 } else { 220 } };
        let analyzer = QualityAnalyzer::new();

        let small = analyzer.recommend(&gray(640, 480, stripes));
        assert!(small.contains(&"Image resolution is low - use at least 800x600".to_string()));
        assert!(!small.iter().any(|r| r.contains("acceptable")));

        // Either dimension short is enough.
        let narrow = analyzer.report(&gray(799, 600, stripes), "narrow.png");
        assert!(narrow.recommendations.iter().any(|r| r.contains("resolution is low")));

        let large = analyzer.recommend(&gray(800, 600, stripes));
        assert!(!large.iter().any(|r| r.contains("resolution")));
    }

    #[test]
    fn dark_and_bright_advice() {
        let base = QualityMetrics {
            blur_score: 0.8,
            brightness: 120.0,
            contrast: 40.0,
            noise_level: 0.1,
            overall_quality: 0.8,
        };
        assert_eq!(
            recommendations(&base),
            vec!["Image quality is acceptable for OCR".to_string()]
        );
        let dark = QualityMetrics { brightness: 20.0, ..base };
        assert!(recommendations(&dark)[0].contains("too dark"));
        let bright = QualityMetrics { brightness: 230.0, ..base };
        assert!(recommendations(&bright)[0].contains("too bright"));
    }
}
