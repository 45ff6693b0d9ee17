//! # deckscan
//!
//! Extract clean, analysable text from photos and screenshots of pitch-deck
//! slides.
//!
//! ## Why this crate?
//!
//! Slide photos arrive skewed, glary, under-exposed, JPEG-smeared or with
//! white-on-dark themes. A single OCR engine either chokes on the bad ones
//! or costs a network round trip on the good ones. This crate normalises
//! every image, reads it with a local recogniser first, and only calls a
//! remote text-detection service when the local output fails a cheap
//! validity check. The result is one ordered text document per deck, ready
//! for downstream analysis.
//!
//! ## Pipeline Overview
//!
//! ```text
//! slide images
//!  │
//!  ├─ 1. Input      read local files or download URLs, sniff format
//!  ├─ 2. Normalize  resize, grayscale, denoise, contrast, sharpen (spawn_blocking)
//!  ├─ 3. Primary    local recogniser (tesseract), serialised behind a mutex
//!  ├─ 4. Validate   length + alphabetic-ratio gate
//!  ├─ 5. Fallback   remote text detection, only when the primary is rejected
//!  └─ 6. Output     composite document + per-slide records + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deckscan::{BatchCoordinator, ExtractionConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .vision_api_key(std::env::var("GOOGLE_CLOUD_VISION_API_KEY").unwrap_or_default())
//!         .build()?;
//!     let coordinator = BatchCoordinator::from_config(config)?;
//!     let output = coordinator
//!         .process_paths(&["01-problem.jpg", "02-solution.jpg"], &CancellationToken::new())
//!         .await?;
//!     println!("{}", output.composite);
//!     eprintln!("{}/{} slides valid", output.stats.valid_slides, output.stats.total_slides);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deckscan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! deckscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{assess_paths, BatchCoordinator};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, DEFAULT_VISION_ENDPOINT};
pub use error::{DeckScanError, EngineFailure, EngineKind, FailureReason};
pub use output::{
    BatchOutput, BatchStats, CompositeDocument, ExtractionMethod, ExtractionResult, SlideRecord,
};
pub use pipeline::extract::{DualEngineExtractor, Engine, Recognition};
pub use pipeline::input::{decode_bytes, load_image};
pub use pipeline::local::{LocalEngine, RecognitionBackend, TesseractBackend, TextFragment};
pub use pipeline::normalize::ImageNormalizer;
pub use pipeline::quality::{QualityAnalyzer, QualityMetrics, QualityReport};
pub use pipeline::raster::RasterImage;
pub use pipeline::remote::RemoteEngine;
pub use pipeline::text::TextValidator;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{process_batch_stream, process_paths_stream, SlideStream};
