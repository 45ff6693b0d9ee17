//! Batch coordination: run every slide of a deck through normalisation and
//! extraction, then assemble the composite document.
//!
//! ## Ordering
//!
//! Slides overlap up to `config.concurrency` at a time, but the stream is
//! `buffered` (not `buffer_unordered`), so records always come back in input
//! order and slide `i` always gets index `i + 1`. The composite therefore
//! never depends on which slide happened to finish first.
//!
//! ## Cancellation
//!
//! The token is checked when a slide is about to start. Slides that never
//! start are skipped: no record, counted in
//! [`BatchStats::skipped_slides`](crate::output::BatchStats). A slide already
//! in flight finishes through the extractor, which abandons any remote call
//! still pending.

use crate::config::ExtractionConfig;
use crate::error::DeckScanError;
use crate::output::{BatchOutput, BatchStats, CompositeDocument, SlideRecord};
use crate::pipeline::extract::DualEngineExtractor;
use crate::pipeline::input;
use crate::pipeline::normalize::ImageNormalizer;
use crate::pipeline::quality::{QualityAnalyzer, QualityReport};
use crate::pipeline::raster::RasterImage;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sequences extraction over an ordered deck of slide images.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    config: ExtractionConfig,
    normalizer: ImageNormalizer,
    extractor: Arc<DualEngineExtractor>,
}

impl BatchCoordinator {
    pub fn new(config: ExtractionConfig, extractor: DualEngineExtractor) -> Self {
        Self {
            normalizer: ImageNormalizer::from_config(&config),
            extractor: Arc::new(extractor),
            config,
        }
    }

    /// Build with the process-wide local engine and the configured remote
    /// service.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, DeckScanError> {
        let extractor = DualEngineExtractor::from_config(&config)?;
        Ok(Self::new(config, extractor))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn extractor(&self) -> &DualEngineExtractor {
        &self.extractor
    }

    /// Normalise and extract one slide.
    ///
    /// Returns `Ok(None)` when `cancel` fired before the slide started.
    pub async fn process_slide(
        &self,
        index: usize,
        total: usize,
        image: RasterImage,
        label: String,
        cancel: &CancellationToken,
    ) -> Result<Option<SlideRecord>, DeckScanError> {
        let cb = self.config.progress_callback.as_ref();
        if cancel.is_cancelled() {
            debug!("Slide {} ({}) skipped: cancelled", index, label);
            if let Some(cb) = cb {
                cb.on_slide_skipped(index, total);
            }
            return Ok(None);
        }
        if let Some(cb) = cb {
            cb.on_slide_start(index, total, &label);
        }

        let normalizer = self.normalizer;
        let (slide_mode, aggressive) = (self.config.slide_mode, self.config.aggressive);
        let normalized = tokio::task::spawn_blocking(move || {
            if slide_mode {
                normalizer.normalize_slide(&image)
            } else {
                normalizer.normalize(&image, aggressive)
            }
        })
        .await
        .map_err(|e| DeckScanError::Internal(format!("normalisation task panicked: {e}")))?;

        let result = self.extractor.extract(&normalized, cancel).await;
        debug!(
            "Slide {} ({}): {} via {}, {:.2}s",
            index,
            label,
            if result.is_valid() { "valid" } else { "invalid" },
            result.method(),
            result.processing_time_secs()
        );
        if let Some(cb) = cb {
            cb.on_slide_complete(index, total, result.method(), result.text().len());
        }
        Ok(Some(SlideRecord::new(index, label, result)))
    }

    /// Process an ordered deck of `(image, label)` pairs.
    ///
    /// Individual slide failures never fail the batch; they show up as
    /// `Failed` records. Returns `Err` only for internal faults, or
    /// [`DeckScanError::Cancelled`] when cancellation skipped every slide.
    pub async fn process_batch(
        &self,
        images: Vec<(RasterImage, String)>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutput, DeckScanError> {
        let started = Instant::now();
        let total = images.len();
        info!(
            "Processing {} slides (concurrency {}, {})",
            total,
            self.config.concurrency,
            self.mode_name()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(total);
        }

        let outcomes: Vec<Result<Option<SlideRecord>, DeckScanError>> = stream::iter(
            images
                .into_iter()
                .enumerate()
                .map(|(i, (image, label))| self.process_slide(i + 1, total, image, label, cancel)),
        )
        .buffered(self.config.concurrency.max(1))
        .collect()
        .await;

        let mut records = Vec::with_capacity(total);
        let mut skipped = 0usize;
        for outcome in outcomes {
            match outcome? {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }
        if records.is_empty() && skipped > 0 {
            return Err(DeckScanError::Cancelled);
        }

        let composite = CompositeDocument::build(&records);
        let stats = BatchStats::tally(&records, skipped, started.elapsed().as_millis() as u64);
        info!(
            "Batch complete: {}/{} valid ({} primary, {} fallback, {} failed, {} skipped) in {}ms",
            stats.valid_slides,
            total,
            stats.primary_slides,
            stats.fallback_slides,
            stats.failed_slides,
            stats.skipped_slides,
            stats.wall_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, stats.valid_slides);
        }

        Ok(BatchOutput {
            composite,
            records,
            stats,
        })
    }

    /// Load every input (path or URL) in order, then process the deck.
    ///
    /// Any input that cannot be read or decoded fails the whole call before
    /// extraction starts.
    pub async fn process_paths<S: AsRef<str>>(
        &self,
        inputs: &[S],
        cancel: &CancellationToken,
    ) -> Result<BatchOutput, DeckScanError> {
        let images = load_all(inputs, &self.config).await?;
        self.process_batch(images, cancel).await
    }

    /// Process inputs and write the composite document to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn process_paths_to_file<S: AsRef<str>>(
        &self,
        inputs: &[S],
        output_path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutput, DeckScanError> {
        let output = self.process_paths(inputs, cancel).await?;
        write_atomic(output_path.as_ref(), output.composite.as_str()).await?;
        Ok(output)
    }

    /// Synchronous wrapper around [`process_batch`](Self::process_batch).
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn process_batch_sync(
        &self,
        images: Vec<(RasterImage, String)>,
    ) -> Result<BatchOutput, DeckScanError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| DeckScanError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.process_batch(images, &CancellationToken::new()))
    }

    fn mode_name(&self) -> &'static str {
        match (self.config.slide_mode, self.config.aggressive) {
            (true, _) => "slide mode",
            (false, true) => "aggressive",
            (false, false) => "gentle",
        }
    }
}

/// Quality metrics and capture advice for each input, without extraction.
///
/// Metrics describe the image as captured, before normalisation.
pub async fn assess_paths<S: AsRef<str>>(
    inputs: &[S],
    config: &ExtractionConfig,
) -> Result<Vec<QualityReport>, DeckScanError> {
    let images = load_all(inputs, config).await?;
    let mut reports = Vec::with_capacity(images.len());
    for (image, label) in images {
        let report = tokio::task::spawn_blocking(move || QualityAnalyzer::new().report(&image, label))
            .await
            .map_err(|e| DeckScanError::Internal(format!("quality task panicked: {e}")))?;
        reports.push(report);
    }
    Ok(reports)
}

async fn load_all<S: AsRef<str>>(
    inputs: &[S],
    config: &ExtractionConfig,
) -> Result<Vec<(RasterImage, String)>, DeckScanError> {
    if inputs.is_empty() {
        return Err(DeckScanError::EmptyBatch);
    }
    let timeout = config.download_timeout_secs;
    stream::iter(inputs.iter().map(|s| input::load_image(s.as_ref(), timeout)))
        .buffered(config.concurrency.max(1))
        .try_collect()
        .await
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), DeckScanError> {
    let write_err = |e: std::io::Error| DeckScanError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ExtractionMethod;
    use crate::pipeline::local::{LocalEngine, RecognitionBackend, TextFragment};
    use image::GrayImage;

    struct Echo;

    impl RecognitionBackend for Echo {
        fn recognize(&mut self, image: &GrayImage) -> Result<Vec<TextFragment>, String> {
            Ok(vec![TextFragment::new(
                format!("A slide that is {} pixels wide", image.width()),
                0.9,
            )])
        }
    }

    fn coordinator(config: ExtractionConfig) -> BatchCoordinator {
        let extractor =
            DualEngineExtractor::with_local_engine(&config, Arc::new(LocalEngine::with_backend(Echo)))
                .unwrap();
        BatchCoordinator::new(config, extractor)
    }

    fn slide(width: u32, label: &str) -> (RasterImage, String) {
        (
            RasterImage::new(width, 8, 1, vec![255; width as usize * 8]).unwrap(),
            label.to_string(),
        )
    }

    #[tokio::test]
    async fn records_follow_input_order() {
        let c = coordinator(ExtractionConfig::builder().concurrency(3).build().unwrap());
        let deck = vec![slide(30, "a.png"), slide(10, "b.png"), slide(20, "c.png")];
        let out = c.process_batch(deck, &CancellationToken::new()).await.unwrap();
        let widths: Vec<&str> = out.records.iter().map(|r| r.result().text()).collect();
        assert_eq!(
            widths,
            vec![
                "A slide that is 30 pixels wide",
                "A slide that is 10 pixels wide",
                "A slide that is 20 pixels wide"
            ]
        );
        assert_eq!(
            out.records.iter().map(|r| r.index()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(out.stats.primary_slides, 3);
        assert_eq!(out.composite.block_count(), 3);
    }

    #[tokio::test]
    async fn empty_deck_gives_empty_output() {
        let c = coordinator(ExtractionConfig::default());
        let out = c.process_batch(vec![], &CancellationToken::new()).await.unwrap();
        assert!(out.records.is_empty());
        assert!(out.composite.is_empty());
    }

    #[tokio::test]
    async fn cancelled_batch_is_an_error() {
        let c = coordinator(ExtractionConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = c.process_batch(vec![slide(10, "a.png")], &token).await.unwrap_err();
        assert!(matches!(err, DeckScanError::Cancelled));
    }

    #[test]
    fn sync_wrapper_runs_the_batch() {
        let c = coordinator(ExtractionConfig::builder().slide_mode(true).build().unwrap());
        let out = c.process_batch_sync(vec![slide(12, "only.png")]).unwrap();
        assert_eq!(out.records[0].result().method(), ExtractionMethod::Primary);
    }

    #[tokio::test]
    async fn no_inputs_is_rejected() {
        let c = coordinator(ExtractionConfig::default());
        let err = c
            .process_paths::<&str>(&[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeckScanError::EmptyBatch));
    }

    #[test]
    fn assess_reports_each_input_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let dark = dir.path().join("dark.png");
        let flat = dir.path().join("flat.png");
        GrayImage::from_pixel(16, 16, image::Luma([10])).save(&dark).unwrap();
        GrayImage::from_pixel(16, 16, image::Luma([128])).save(&flat).unwrap();
        let inputs = [dark.to_string_lossy().into_owned(), flat.to_string_lossy().into_owned()];

        let reports =
            tokio_test::block_on(assess_paths(&inputs, &ExtractionConfig::default())).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].label, "dark.png");
        assert!(reports[0]
            .recommendations
            .iter()
            .any(|r| r.contains("too dark")));
        assert_eq!(reports[1].label, "flat.png");
        assert!((reports[1].metrics.brightness - 128.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/deck.txt");
        write_atomic(&path, "--- Slide 1 (a.png) ---\nhello\n").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "--- Slide 1 (a.png) ---\nhello\n"
        );
        assert!(!dir.path().join("out/deck.txt.tmp").exists());
    }
}
