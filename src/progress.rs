//! Progress-callback trait for per-slide extraction events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the batch coordinator works through the deck.
//!
//! # Example
//!
//! ```rust
//! use deckscan::{BatchProgressCallback, ExtractionConfig, ExtractionMethod};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_slide_complete(&self, index: usize, total: usize, method: ExtractionMethod, _len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("slide {index}/{total} via {method}");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ExtractionMethod;
use std::sync::Arc;

/// Called by the batch coordinator as it processes each slide.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the
/// per-slide hooks fire from several tasks at once. All methods default to
/// no-ops so callers only override what they care about.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first slide starts.
    fn on_batch_start(&self, total_slides: usize) {
        let _ = total_slides;
    }

    /// Called when a slide enters normalisation.
    ///
    /// `index` is 1-based.
    fn on_slide_start(&self, index: usize, total_slides: usize, label: &str) {
        let _ = (index, total_slides, label);
    }

    /// Called when a slide has a final [`ExtractionMethod`].
    ///
    /// `text_len` is the byte length of the extracted text (0 when failed).
    fn on_slide_complete(
        &self,
        index: usize,
        total_slides: usize,
        method: ExtractionMethod,
        text_len: usize,
    ) {
        let _ = (index, total_slides, method, text_len);
    }

    /// Called for a slide that was never started because the run was cancelled.
    fn on_slide_skipped(&self, index: usize, total_slides: usize) {
        let _ = (index, total_slides);
    }

    /// Called once after every slide was attempted or skipped.
    fn on_batch_complete(&self, total_slides: usize, valid_slides: usize) {
        let _ = (total_slides, valid_slides);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        failures: AtomicUsize,
        skipped: AtomicUsize,
        valid_total: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_slide_start(&self, _index: usize, _total: usize, _label: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_slide_complete(
            &self,
            _index: usize,
            _total: usize,
            method: ExtractionMethod,
            _text_len: usize,
        ) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            if method == ExtractionMethod::Failed {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_slide_skipped(&self, _index: usize, _total: usize) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, valid_slides: usize) {
            self.valid_total.store(valid_slides, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(3);
        cb.on_slide_start(1, 3, "intro.png");
        cb.on_slide_complete(1, 3, ExtractionMethod::Primary, 42);
        cb.on_slide_skipped(3, 3);
        cb.on_batch_complete(3, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_slide_start(1, 3, "a.png");
        tracker.on_slide_complete(1, 3, ExtractionMethod::Primary, 120);
        tracker.on_slide_start(2, 3, "b.png");
        tracker.on_slide_complete(2, 3, ExtractionMethod::Failed, 0);
        tracker.on_slide_skipped(3, 3);
        tracker.on_batch_complete(3, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.valid_total.load(Ordering::SeqCst), 1);
    }
}
