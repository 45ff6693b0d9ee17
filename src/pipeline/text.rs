//! Text-validity gate and fragment cleanup.
//!
//! The validity rule is the single decision point of the extractor: it runs
//! after every engine attempt and decides whether to accept, escalate to the
//! fallback, or give up. It is deliberately cheap and engine-agnostic, so the
//! same text always gets the same verdict regardless of which engine read it.

use crate::config::ExtractionConfig;
use once_cell::sync::Lazy;
use regex::Regex;

/// Length/alpha-ratio heuristic deciding whether extracted text is meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextValidator {
    min_length: usize,
    min_alpha_ratio: f64,
}

/// The measurements behind a validity verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextAssessment {
    /// Characters in the trimmed text.
    pub chars: usize,
    /// Alphabetic share of non-space characters (0 when there are none).
    pub alpha_ratio: f64,
    pub valid: bool,
}

impl Default for TextValidator {
    fn default() -> Self {
        Self::new(20, 0.3)
    }
}

impl TextValidator {
    pub fn new(min_length: usize, min_alpha_ratio: f64) -> Self {
        Self {
            min_length,
            min_alpha_ratio,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.min_text_length, config.min_alpha_ratio)
    }

    /// Measure `text` and apply the rule.
    ///
    /// Valid iff the trimmed text has at least `min_length` characters, the
    /// text contains at least one non-space character, and the alphabetic
    /// share of non-space characters reaches `min_alpha_ratio`.
    pub fn assess(&self, text: &str) -> TextAssessment {
        let chars = text.trim().chars().count();
        let ratio = alpha_ratio(text);
        let valid = match ratio {
            Some(r) => chars >= self.min_length && r >= self.min_alpha_ratio,
            None => false,
        };
        TextAssessment {
            chars,
            alpha_ratio: ratio.unwrap_or(0.0),
            valid,
        }
    }

    pub fn is_valid(&self, text: &str) -> bool {
        self.assess(text).valid
    }
}

/// Alphabetic characters divided by characters other than `' '`.
///
/// Only the ASCII space is excluded from the denominator; line breaks and
/// tabs count as non-space. Returns `None` when the denominator is zero.
pub fn alpha_ratio(text: &str) -> Option<f64> {
    let non_space = text.chars().filter(|&c| c != ' ').count();
    if non_space == 0 {
        return None;
    }
    let alpha = text.chars().filter(|c| c.is_alphabetic()).count();
    Some(alpha as f64 / non_space as f64)
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalise one recognised fragment: strip invisible Unicode, collapse
/// internal whitespace runs to a single space, trim.
pub fn clean_fragment(input: &str) -> String {
    let visible = input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    );
    RE_WHITESPACE.replace_all(visible.trim(), " ").into_owned()
}

/// Normalise full-page text from the remote service: CRLF → LF, strip
/// invisible Unicode and trailing whitespace per line, keep line structure.
pub fn clean_page_text(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(
            [
                '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
            ],
            "",
        )
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
