//! Configuration types for slide text extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Every component receives the config
//! (or the slice of it it needs) through its constructor; nothing reads
//! process-wide state, so each stage can be tested in isolation.

use crate::error::DeckScanError;
use crate::progress::ProgressCallback;
use std::fmt;

/// Default remote text-detection endpoint (Google Cloud Vision `images:annotate`).
pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Configuration for a slide extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use deckscan::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .aggressive(true)
///     .concurrency(2)
///     .min_text_length(30)
///     .build()
///     .unwrap();
/// assert!(config.aggressive);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum normalised image width in pixels. Default: 1920.
    ///
    /// Larger inputs are downscaled with area averaging, preserving aspect
    /// ratio. Smaller inputs are never upscaled.
    pub max_width: u32,

    /// Maximum normalised image height in pixels. Default: 1080.
    pub max_height: u32,

    /// Use the aggressive cleanup path (bilateral denoise, global
    /// equalisation, 5×5 sharpen, binarisation). Default: false.
    ///
    /// Helps with glare and uneven lighting on phone photos; hurts on clean
    /// screenshots where the gentle path already gives crisp glyphs.
    pub aggressive: bool,

    /// Use the presentation-slide path (dark-background inversion, closing,
    /// adaptive contrast) instead of the photo path. Default: false.
    pub slide_mode: bool,

    /// Minimum trimmed text length (in characters) for a result to be valid. Default: 20.
    pub min_text_length: usize,

    /// Minimum share of alphabetic characters among non-space characters. Default: 0.3.
    pub min_alpha_ratio: f64,

    /// Local-engine fragments below this confidence are dropped. Default: 0.3.
    pub min_fragment_confidence: f32,

    /// Number of slides in flight at once. Default: 4.
    ///
    /// Local-engine calls are serialised regardless; this mostly overlaps
    /// normalisation with remote fallback calls.
    pub concurrency: usize,

    /// API key for the remote text-detection service.
    /// When `None` the fallback never touches the network.
    pub vision_api_key: Option<String>,

    /// Remote text-detection endpoint. Default: [`DEFAULT_VISION_ENDPOINT`].
    pub vision_endpoint: String,

    /// Maximum number of annotations requested from the remote service. Default: 50.
    pub max_annotations: u32,

    /// Confidence reported for remote results that carry no per-token scores. Default: 0.8.
    pub default_remote_confidence: f32,

    /// Per-request timeout for the remote service, in seconds. Default: 30.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Name or path of the tesseract executable. Default: "tesseract".
    pub tesseract_binary: String,

    /// Recognition language passed to the local engine. Default: "eng".
    pub ocr_language: String,

    /// Tesseract page segmentation mode. Default: 3 (fully automatic).
    pub page_seg_mode: u8,

    /// Deadline for one local recognition call, in seconds. Default: 60.
    ///
    /// A recogniser process still running after this is killed and the
    /// attempt counts as a local-engine failure.
    pub local_timeout_secs: u64,

    /// Optional progress observer for batch runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            aggressive: false,
            slide_mode: false,
            min_text_length: 20,
            min_alpha_ratio: 0.3,
            min_fragment_confidence: 0.3,
            concurrency: 4,
            vision_api_key: None,
            vision_endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            max_annotations: 50,
            default_remote_confidence: 0.8,
            api_timeout_secs: 30,
            download_timeout_secs: 120,
            tesseract_binary: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            page_seg_mode: 3,
            local_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_width", &self.max_width)
            .field("max_height", &self.max_height)
            .field("aggressive", &self.aggressive)
            .field("slide_mode", &self.slide_mode)
            .field("min_text_length", &self.min_text_length)
            .field("min_alpha_ratio", &self.min_alpha_ratio)
            .field("min_fragment_confidence", &self.min_fragment_confidence)
            .field("concurrency", &self.concurrency)
            .field(
                "vision_api_key",
                &self.vision_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("vision_endpoint", &self.vision_endpoint)
            .field("max_annotations", &self.max_annotations)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("tesseract_binary", &self.tesseract_binary)
            .field("ocr_language", &self.ocr_language)
            .field("page_seg_mode", &self.page_seg_mode)
            .field("local_timeout_secs", &self.local_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when a non-empty remote credential is configured.
    pub fn has_remote_credential(&self) -> bool {
        self.vision_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.config.max_width = width;
        self.config.max_height = height;
        self
    }

    pub fn aggressive(mut self, v: bool) -> Self {
        self.config.aggressive = v;
        self
    }

    pub fn slide_mode(mut self, v: bool) -> Self {
        self.config.slide_mode = v;
        self
    }

    pub fn min_text_length(mut self, n: usize) -> Self {
        self.config.min_text_length = n;
        self
    }

    pub fn min_alpha_ratio(mut self, ratio: f64) -> Self {
        self.config.min_alpha_ratio = ratio;
        self
    }

    pub fn min_fragment_confidence(mut self, c: f32) -> Self {
        self.config.min_fragment_confidence = c.clamp(0.0, 1.0);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn vision_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.vision_api_key = Some(key.into());
        self
    }

    pub fn vision_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.vision_endpoint = url.into();
        self
    }

    pub fn max_annotations(mut self, n: u32) -> Self {
        self.config.max_annotations = n.max(1);
        self
    }

    pub fn default_remote_confidence(mut self, c: f32) -> Self {
        self.config.default_remote_confidence = c.clamp(0.0, 1.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn tesseract_binary(mut self, bin: impl Into<String>) -> Self {
        self.config.tesseract_binary = bin.into();
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn page_seg_mode(mut self, psm: u8) -> Self {
        self.config.page_seg_mode = psm;
        self
    }

    pub fn local_timeout_secs(mut self, secs: u64) -> Self {
        self.config.local_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, DeckScanError> {
        let c = &self.config;
        if c.max_width == 0 || c.max_height == 0 {
            return Err(DeckScanError::InvalidConfig(format!(
                "Maximum dimensions must be positive, got {}x{}",
                c.max_width, c.max_height
            )));
        }
        if !(0.0..=1.0).contains(&c.min_alpha_ratio) {
            return Err(DeckScanError::InvalidConfig(format!(
                "Minimum alpha ratio must be within 0–1, got {}",
                c.min_alpha_ratio
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(DeckScanError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.local_timeout_secs == 0 {
            return Err(DeckScanError::InvalidConfig(
                "Local engine timeout must be ≥ 1 second".into(),
            ));
        }
        if c.page_seg_mode > 13 {
            return Err(DeckScanError::InvalidConfig(format!(
                "Page segmentation mode must be 0–13, got {}",
                c.page_seg_mode
            )));
        }
        if c.vision_endpoint.trim().is_empty() {
            return Err(DeckScanError::InvalidConfig(
                "Vision endpoint must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
