//! Dual-engine extraction: local recogniser first, remote service second.
//!
//! ## State machine
//!
//! ```text
//! Init ──▶ TryPrimary ──valid──▶ Accept(Primary)
//!              │
//!           invalid
//!              ▼
//!         TryFallback ──valid──▶ Accept(Fallback)
//!              │
//!           invalid
//!              ▼
//!           Failed
//! ```
//!
//! Each state is entered at most once, so one image costs at most two engine
//! invocations and neither engine is retried. Every attempt ends in either a
//! validated [`Recognition`] or an [`EngineFailure`]; failures become issue
//! strings on the final [`ExtractionResult`] and never leave this module as
//! errors.

use crate::config::ExtractionConfig;
use crate::error::{DeckScanError, EngineFailure, EngineKind, FailureReason};
use crate::output::{ExtractionMethod, ExtractionResult};
use crate::pipeline::local::LocalEngine;
use crate::pipeline::raster::RasterImage;
use crate::pipeline::remote::RemoteEngine;
use crate::pipeline::text::TextValidator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Raw output of one engine attempt, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Engine-reported confidence, 0–1.
    pub confidence: f32,
    pub elapsed: Duration,
}

/// One of the two recognition engines.
#[derive(Debug, Clone)]
pub enum Engine {
    Local {
        engine: Arc<LocalEngine>,
        min_fragment_confidence: f32,
    },
    Remote(RemoteEngine),
}

impl Engine {
    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Local { .. } => EngineKind::Local,
            Engine::Remote(_) => EngineKind::Remote,
        }
    }

    /// Run the engine once on `image`.
    pub async fn extract(
        &self,
        image: &RasterImage,
        cancel: &CancellationToken,
    ) -> Result<Recognition, EngineFailure> {
        match self {
            Engine::Local {
                engine,
                min_fragment_confidence,
            } => engine.extract(image, *min_fragment_confidence, cancel).await,
            Engine::Remote(remote) => remote.extract(image, cancel).await,
        }
    }
}

enum ExtractionState {
    Init,
    TryPrimary,
    TryFallback {
        primary: EngineFailure,
    },
    Accept {
        recognition: Recognition,
        method: ExtractionMethod,
        issues: Vec<String>,
        elapsed: Duration,
    },
    Failed {
        primary: EngineFailure,
        fallback: EngineFailure,
    },
}

/// Runs the primary engine and, when its output fails validation, the
/// fallback engine.
#[derive(Debug, Clone)]
pub struct DualEngineExtractor {
    primary: Engine,
    fallback: Engine,
    validator: TextValidator,
}

impl DualEngineExtractor {
    pub fn new(primary: Engine, fallback: Engine, validator: TextValidator) -> Self {
        Self {
            primary,
            fallback,
            validator,
        }
    }

    /// The process-wide local engine as primary, the configured remote
    /// service as fallback.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, DeckScanError> {
        Self::with_local_engine(config, LocalEngine::shared(config))
    }

    /// Like [`from_config`](Self::from_config) with a caller-supplied local engine.
    pub fn with_local_engine(
        config: &ExtractionConfig,
        local: Arc<LocalEngine>,
    ) -> Result<Self, DeckScanError> {
        Ok(Self::new(
            Engine::Local {
                engine: local,
                min_fragment_confidence: config.min_fragment_confidence,
            },
            Engine::Remote(RemoteEngine::from_config(config)?),
            TextValidator::from_config(config),
        ))
    }

    /// Extract text from an already-normalised image.
    pub async fn extract(&self, image: &RasterImage, cancel: &CancellationToken) -> ExtractionResult {
        let mut state = ExtractionState::Init;
        loop {
            state = match state {
                ExtractionState::Init => ExtractionState::TryPrimary,

                ExtractionState::TryPrimary => match self.attempt(&self.primary, image, cancel).await {
                    Ok(recognition) => ExtractionState::Accept {
                        elapsed: recognition.elapsed,
                        recognition,
                        method: ExtractionMethod::Primary,
                        issues: Vec::new(),
                    },
                    Err(primary) => ExtractionState::TryFallback { primary },
                },

                ExtractionState::TryFallback { primary } => {
                    match self.attempt(&self.fallback, image, cancel).await {
                        Ok(recognition) => ExtractionState::Accept {
                            elapsed: primary.elapsed + recognition.elapsed,
                            issues: vec![format!(
                                "{primary}; {} used as fallback",
                                self.fallback.kind()
                            )],
                            recognition,
                            method: ExtractionMethod::Fallback,
                        },
                        Err(fallback) => ExtractionState::Failed { primary, fallback },
                    }
                }

                ExtractionState::Accept {
                    recognition,
                    method,
                    issues,
                    elapsed,
                } => {
                    return ExtractionResult::new(
                        recognition.text,
                        method,
                        recognition.confidence,
                        elapsed.as_secs_f64(),
                        issues,
                        &self.validator,
                    );
                }

                ExtractionState::Failed { primary, fallback } => {
                    let elapsed = primary.elapsed + fallback.elapsed;
                    return ExtractionResult::failed(
                        vec![primary.to_string(), fallback.to_string()],
                        elapsed.as_secs_f64(),
                    );
                }
            };
        }
    }

    /// One engine invocation followed by the validity gate.
    async fn attempt(
        &self,
        engine: &Engine,
        image: &RasterImage,
        cancel: &CancellationToken,
    ) -> Result<Recognition, EngineFailure> {
        let outcome = engine.extract(image, cancel).await.and_then(|recognition| {
            let assessment = self.validator.assess(&recognition.text);
            if assessment.valid {
                Ok(recognition)
            } else {
                Err(EngineFailure::new(
                    engine.kind(),
                    FailureReason::Rejected {
                        chars: assessment.chars,
                        alpha_ratio: assessment.alpha_ratio,
                    },
                    recognition.elapsed,
                ))
            }
        });

        match &outcome {
            Ok(r) => debug!(
                "{} accepted: {} chars, confidence {:.2}",
                engine.kind(),
                r.text.chars().count(),
                r.confidence
            ),
            Err(f) if f.is_environmental() => debug!("{}", f),
            Err(f) => warn!("{}", f),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::local::{RecognitionBackend, TextFragment};
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        fragments: Vec<TextFragment>,
        calls: Arc<AtomicUsize>,
    }

    impl RecognitionBackend for Scripted {
        fn recognize(&mut self, _image: &GrayImage) -> Result<Vec<TextFragment>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.fragments.clone())
        }
    }

    fn extractor(local: LocalEngine) -> DualEngineExtractor {
        DualEngineExtractor::with_local_engine(&ExtractionConfig::default(), Arc::new(local)).unwrap()
    }

    fn scripted(fragments: Vec<TextFragment>) -> (LocalEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Scripted {
            fragments,
            calls: Arc::clone(&calls),
        };
        (LocalEngine::with_backend(backend), calls)
    }

    fn image() -> RasterImage {
        RasterImage::new(16, 16, 1, vec![255; 256]).unwrap()
    }

    #[tokio::test]
    async fn valid_primary_is_accepted_without_fallback() {
        let (local, calls) = scripted(vec![
            TextFragment::new("Problem:", 0.92),
            TextFragment::new("onboarding takes three weeks", 0.88),
        ]);
        let result = extractor(local).extract(&image(), &CancellationToken::new()).await;
        assert_eq!(result.method(), ExtractionMethod::Primary);
        assert_eq!(result.text(), "Problem: onboarding takes three weeks");
        assert!(result.is_valid());
        assert!(result.issues().is_empty());
        assert!((result.confidence() - 0.9).abs() < 1e-6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_primary_text_escalates_to_fallback() {
        // High confidence but nothing printable survives.
        let (local, calls) = scripted(vec![TextFragment::new("  ", 0.9)]);
        let result = extractor(local).extract(&image(), &CancellationToken::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.method(), ExtractionMethod::Failed);
        assert_eq!(result.issues().len(), 2);
        assert!(result.issues()[0].starts_with("local engine output rejected (0 chars"));
        assert!(result.issues()[1].starts_with("remote engine not configured"));
    }

    #[tokio::test]
    async fn unavailable_primary_without_credential_fails() {
        let result = extractor(LocalEngine::unavailable("tesseract not found"))
            .extract(&image(), &CancellationToken::new())
            .await;
        assert_eq!(result.method(), ExtractionMethod::Failed);
        assert_eq!(result.text(), "");
        assert_eq!(result.confidence(), 0.0);
        assert!(!result.is_valid());
        assert_eq!(
            result.issues(),
            &[
                "local engine unavailable: tesseract not found".to_string(),
                "remote engine not configured: remote text-detection API key not set".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let (local, calls) = scripted(vec![TextFragment::new("Anything at all here, really", 0.9)]);
        let token = CancellationToken::new();
        token.cancel();
        let result = extractor(local).extract(&image(), &token).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.method(), ExtractionMethod::Failed);
        assert!(result.issues()[0].contains("cancelled"));
    }

    #[tokio::test]
    async fn symbol_soup_is_rejected() {
        let (local, _) = scripted(vec![TextFragment::new("### /// 111 --- ||| 222 ***", 0.95)]);
        let result = extractor(local).extract(&image(), &CancellationToken::new()).await;
        assert_eq!(result.method(), ExtractionMethod::Failed);
        assert!(result.issues()[0].contains("alpha ratio 0.00"));
    }
}
