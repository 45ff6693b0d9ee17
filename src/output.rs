//! Result types produced by extraction and batch aggregation.
//!
//! Everything here is an immutable value once constructed:
//! [`ExtractionResult::is_valid`] is computed exactly once from the text and
//! cannot drift, [`SlideRecord`] exposes read-only accessors, and the
//! [`CompositeDocument`] is built in a single pass over the records.

use crate::pipeline::text::TextValidator;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which terminal state of the extractor produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// The local engine's output passed validation.
    Primary,
    /// The local engine failed; the remote service's output passed validation.
    Fallback,
    /// Neither engine produced valid text.
    Failed,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionMethod::Primary => f.write_str("primary"),
            ExtractionMethod::Fallback => f.write_str("fallback"),
            ExtractionMethod::Failed => f.write_str("failed"),
        }
    }
}

/// The outcome of extracting text from one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    text: String,
    method: ExtractionMethod,
    confidence: f32,
    processing_time_secs: f64,
    issues: Vec<String>,
    valid: bool,
}

impl ExtractionResult {
    /// Build a result, deriving validity from `text` with `validator`.
    ///
    /// `confidence` is clamped to `[0, 1]` and negative times to zero.
    pub fn new(
        text: impl Into<String>,
        method: ExtractionMethod,
        confidence: f32,
        processing_time_secs: f64,
        issues: Vec<String>,
        validator: &TextValidator,
    ) -> Self {
        let text = text.into();
        let valid = validator.is_valid(&text);
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            text,
            method,
            confidence,
            processing_time_secs: processing_time_secs.max(0.0),
            issues,
            valid,
        }
    }

    /// Terminal result when both engines failed: empty text, zero confidence.
    pub fn failed(issues: Vec<String>, processing_time_secs: f64) -> Self {
        Self {
            text: String::new(),
            method: ExtractionMethod::Failed,
            confidence: 0.0,
            processing_time_secs: processing_time_secs.max(0.0),
            issues,
            valid: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn method(&self) -> ExtractionMethod {
        self.method
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn processing_time_secs(&self) -> f64 {
        self.processing_time_secs
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// True when the trimmed text is non-empty (the composite-inclusion test).
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// One submitted image and its extraction outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideRecord {
    index: usize,
    label: String,
    result: ExtractionResult,
}

impl SlideRecord {
    /// `index` is 1-based, matching the slide's position in the input.
    pub fn new(index: usize, label: impl Into<String>, result: ExtractionResult) -> Self {
        Self {
            index,
            label: label.into(),
            result,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn result(&self) -> &ExtractionResult {
        &self.result
    }
}

/// The single ordered text artifact handed to downstream analysis.
///
/// Each slide with non-blank text contributes
///
/// ```text
/// --- Slide <index> (<label>) ---
/// <text>
///
/// ```
///
/// in record order. Slides with blank text are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CompositeDocument(String);

impl CompositeDocument {
    /// Assemble the composite from records, preserving their order.
    pub fn build(records: &[SlideRecord]) -> Self {
        let mut lines: Vec<String> = Vec::new();
        for record in records.iter().filter(|r| r.result.has_text()) {
            lines.push(slide_delimiter(record.index, &record.label));
            lines.push(record.result.text.clone());
            lines.push(String::new());
        }
        Self(lines.join("\n"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Number of slide blocks in the document.
    pub fn block_count(&self) -> usize {
        self.0
            .lines()
            .filter(|l| l.starts_with("--- Slide ") && l.ends_with(" ---"))
            .count()
    }
}

impl fmt::Display for CompositeDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CompositeDocument {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The literal delimiter line for a slide.
pub fn slide_delimiter(index: usize, label: &str) -> String {
    format!("--- Slide {index} ({label}) ---")
}

/// Simple tallies over a batch's records, for reporting collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Slides that produced a record.
    pub total_slides: usize,
    /// Records whose result passed validation.
    pub valid_slides: usize,
    pub primary_slides: usize,
    pub fallback_slides: usize,
    pub failed_slides: usize,
    /// Slides never started because the run was cancelled.
    pub skipped_slides: usize,
    /// Sum of per-slide engine time, in seconds.
    pub total_processing_secs: f64,
    /// Wall-clock time of the whole batch, in milliseconds.
    pub wall_duration_ms: u64,
}

impl BatchStats {
    pub fn tally(records: &[SlideRecord], skipped_slides: usize, wall_duration_ms: u64) -> Self {
        let count = |m: ExtractionMethod| records.iter().filter(|r| r.result.method == m).count();
        Self {
            total_slides: records.len(),
            valid_slides: records.iter().filter(|r| r.result.valid).count(),
            primary_slides: count(ExtractionMethod::Primary),
            fallback_slides: count(ExtractionMethod::Fallback),
            failed_slides: count(ExtractionMethod::Failed),
            skipped_slides,
            total_processing_secs: records
                .iter()
                .map(|r| r.result.processing_time_secs)
                .sum(),
            wall_duration_ms,
        }
    }
}

/// Everything a batch run produces.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput {
    pub composite: CompositeDocument,
    pub records: Vec<SlideRecord>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Split into the `(composite, records)` pair consumed downstream.
    pub fn into_parts(self) -> (CompositeDocument, Vec<SlideRecord>) {
        (self.composite, self.records)
    }
}
