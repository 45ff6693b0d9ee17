//! Error types for the deckscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DeckScanError`] — **Fatal**: the batch cannot proceed at all
//!   (missing input file, undecodable image, invalid configuration).
//!   Returned as `Err(DeckScanError)` from the top-level `process_*` functions.
//!
//! * [`EngineFailure`] — **Non-fatal**: one recognition engine could not
//!   produce acceptable text for one slide. Failures are converted into
//!   issue strings on [`crate::output::ExtractionResult`] and never escape
//!   the extractor, so a single unreadable slide does not cost the batch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the deckscan library.
///
/// Per-engine failures use [`EngineFailure`] and end up in
/// [`crate::output::ExtractionResult::issues`] rather than here.
#[derive(Debug, Error)]
pub enum DeckScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes do not start with the magic of any supported raster format.
    #[error("Unsupported image format for '{source_name}' (supported: png, jpg, jpeg, bmp, tiff, webp)")]
    UnsupportedFormat { source_name: String },

    /// Format was recognised but the image could not be decoded.
    #[error("Failed to decode image '{source_name}': {detail}")]
    DecodeFailed { source_name: String, detail: String },

    /// The batch contained no images.
    #[error("No images were supplied")]
    EmptyBatch,

    // ── Run control ───────────────────────────────────────────────────────
    /// The batch was cancelled before any slide was processed.
    #[error("Batch cancelled before any slide was processed")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the composite output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which recognition engine an attempt used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// On-host recognition backend (tesseract by default).
    Local,
    /// Remote text-detection service.
    Remote,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Local => f.write_str("local engine"),
            EngineKind::Remote => f.write_str("remote engine"),
        }
    }
}

/// Why an engine attempt did not yield acceptable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The engine never initialised; permanent for the process lifetime.
    Unavailable { detail: String },
    /// A required credential is missing; no call was made.
    NotConfigured { detail: String },
    /// The engine raised an error during the call.
    Call { detail: String },
    /// The remote service answered with a non-success HTTP status.
    Http { status: u16, detail: String },
    /// The call exceeded its deadline.
    Timeout { secs: u64 },
    /// The caller cancelled the run while the call was in flight.
    Cancelled,
    /// The engine answered but reported no text at all.
    NoText,
    /// The engine produced text that failed the validity gate.
    Rejected { chars: usize, alpha_ratio: f64 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unavailable { detail } => write!(f, "unavailable: {detail}"),
            FailureReason::NotConfigured { detail } => write!(f, "not configured: {detail}"),
            FailureReason::Call { detail } => write!(f, "error: {detail}"),
            FailureReason::Http { status, detail } => write!(f, "HTTP {status}: {detail}"),
            FailureReason::Timeout { secs } => write!(f, "timed out after {secs}s"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::NoText => f.write_str("no text detected"),
            FailureReason::Rejected { chars, alpha_ratio } => write!(
                f,
                "output rejected ({chars} chars, alpha ratio {alpha_ratio:.2})"
            ),
        }
    }
}

/// A non-fatal, structured failure of a single engine attempt.
///
/// The `Display` form is what lands in
/// [`crate::output::ExtractionResult::issues`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{engine} {reason}")]
pub struct EngineFailure {
    pub engine: EngineKind,
    pub reason: FailureReason,
    /// Wall-clock time spent on the attempt.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl EngineFailure {
    pub fn new(engine: EngineKind, reason: FailureReason, elapsed: Duration) -> Self {
        Self {
            engine,
            reason,
            elapsed,
        }
    }

    /// True for failures that say nothing about the image itself.
    pub fn is_environmental(&self) -> bool {
        matches!(
            self.reason,
            FailureReason::Unavailable { .. }
                | FailureReason::NotConfigured { .. }
                | FailureReason::Cancelled
        )
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_display() {
        let e = DeckScanError::UnsupportedFormat {
            source_name: "slide.gif".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("slide.gif"), "got: {msg}");
        assert!(msg.contains("webp"));
    }

    #[test]
    fn engine_failure_display_names_engine_and_reason() {
        let f = EngineFailure::new(
            EngineKind::Remote,
            FailureReason::Timeout { secs: 30 },
            Duration::from_secs(30),
        );
        assert_eq!(f.to_string(), "remote engine timed out after 30s");
    }

    #[test]
    fn rejected_display_rounds_ratio() {
        let f = EngineFailure::new(
            EngineKind::Local,
            FailureReason::Rejected {
                chars: 9,
                alpha_ratio: 0.0,
            },
            Duration::ZERO,
        );
        assert!(f.to_string().contains("9 chars"));
        assert!(f.to_string().contains("0.00"));
    }

    #[test]
    fn environmental_failures() {
        let cancelled =
            EngineFailure::new(EngineKind::Remote, FailureReason::Cancelled, Duration::ZERO);
        let no_text = EngineFailure::new(EngineKind::Remote, FailureReason::NoText, Duration::ZERO);
        assert!(cancelled.is_environmental());
        assert!(!no_text.is_environmental());
    }

    #[test]
    fn engine_failure_serialises_elapsed_as_seconds() {
        let f = EngineFailure::new(
            EngineKind::Local,
            FailureReason::NoText,
            Duration::from_millis(1500),
        );
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["engine"], "local");
        assert_eq!(json["reason"]["kind"], "no_text");
    }
}
