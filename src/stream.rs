//! Streaming batch API: emit slide records as they complete.
//!
//! Long decks over a slow fallback service take a while. A stream lets
//! callers show partial results immediately or hand slides to the downstream
//! analyser one at a time instead of waiting for the whole composite.
//!
//! Records are yielded in input order (the stream is `buffered`, not
//! `buffer_unordered`). Slides skipped by cancellation are left out.

use crate::batch::BatchCoordinator;
use crate::error::DeckScanError;
use crate::output::SlideRecord;
use crate::pipeline::input;
use crate::pipeline::raster::RasterImage;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A boxed stream of slide records.
pub type SlideStream = Pin<Box<dyn Stream<Item = Result<SlideRecord, DeckScanError>> + Send>>;

/// Process a deck, yielding each [`SlideRecord`] as soon as it and every
/// slide before it are done.
///
/// # Example
/// ```rust,no_run
/// use deckscan::{process_batch_stream, BatchCoordinator, ExtractionConfig};
/// use futures::StreamExt;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let coordinator = Arc::new(BatchCoordinator::from_config(ExtractionConfig::default())?);
/// let deck = vec![deckscan::load_image("intro.png", 30).await?];
/// let mut records = process_batch_stream(coordinator, deck, CancellationToken::new());
/// while let Some(record) = records.next().await {
///     let record = record?;
///     println!("slide {}: {}", record.index(), record.result().method());
/// }
/// # Ok(())
/// # }
/// ```
pub fn process_batch_stream(
    coordinator: Arc<BatchCoordinator>,
    images: Vec<(RasterImage, String)>,
    cancel: CancellationToken,
) -> SlideStream {
    let total = images.len();
    let concurrency = coordinator.config().concurrency.max(1);
    info!("Starting streaming batch: {} slides", total);
    if let Some(ref cb) = coordinator.config().progress_callback {
        cb.on_batch_start(total);
    }

    let s = stream::iter(images.into_iter().enumerate().map(move |(i, (image, label))| {
        let coordinator = Arc::clone(&coordinator);
        let cancel = cancel.clone();
        async move {
            coordinator
                .process_slide(i + 1, total, image, label, &cancel)
                .await
        }
    }))
    .buffered(concurrency)
    .filter_map(|outcome| async move { outcome.transpose() });

    Box::pin(s)
}

/// Load inputs (paths or URLs), then stream their records.
///
/// Loading happens up front: an unreadable input fails here, before any
/// slide is processed.
pub async fn process_paths_stream<S: AsRef<str>>(
    coordinator: Arc<BatchCoordinator>,
    inputs: &[S],
    cancel: CancellationToken,
) -> Result<SlideStream, DeckScanError> {
    if inputs.is_empty() {
        return Err(DeckScanError::EmptyBatch);
    }
    let timeout = coordinator.config().download_timeout_secs;
    let images: Vec<(RasterImage, String)> =
        stream::iter(inputs.iter().map(|s| input::load_image(s.as_ref(), timeout)))
            .buffered(coordinator.config().concurrency.max(1))
            .try_collect()
            .await?;
    Ok(process_batch_stream(coordinator, images, cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::pipeline::extract::DualEngineExtractor;
    use crate::pipeline::local::{LocalEngine, RecognitionBackend, TextFragment};
    use image::GrayImage;

    struct Fixed;

    impl RecognitionBackend for Fixed {
        fn recognize(&mut self, _image: &GrayImage) -> Result<Vec<TextFragment>, String> {
            Ok(vec![TextFragment::new("Competition and differentiation", 0.9)])
        }
    }

    fn coordinator() -> Arc<BatchCoordinator> {
        let config = ExtractionConfig::builder().concurrency(2).build().unwrap();
        let extractor =
            DualEngineExtractor::with_local_engine(&config, Arc::new(LocalEngine::with_backend(Fixed)))
                .unwrap();
        Arc::new(BatchCoordinator::new(config, extractor))
    }

    fn deck(n: usize) -> Vec<(RasterImage, String)> {
        (0..n)
            .map(|i| {
                (
                    RasterImage::new(8, 8, 1, vec![250; 64]).unwrap(),
                    format!("slide-{i}.png"),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn yields_every_slide_in_order() {
        let records: Vec<SlideRecord> = process_batch_stream(coordinator(), deck(4), CancellationToken::new())
            .try_collect()
            .await
            .unwrap();
        let indices: Vec<usize> = records.iter().map(|r| r.index()).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert_eq!(records[3].label(), "slide-3.png");
    }

    #[tokio::test]
    async fn cancelled_stream_is_empty() {
        let token = CancellationToken::new();
        token.cancel();
        let records: Vec<_> = process_batch_stream(coordinator(), deck(3), token).collect().await;
        assert!(records.is_empty());
    }
}
