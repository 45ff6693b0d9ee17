//! The remote text-detection engine (Google Cloud Vision `images:annotate`
//! wire format).
//!
//! One POST per attempt, no retries: the extractor already has a policy for
//! what happens after a failed attempt, and a second identical request to a
//! service that just timed out rarely helps a slide.

use crate::config::ExtractionConfig;
use crate::error::{DeckScanError, EngineFailure, EngineKind, FailureReason};
use crate::pipeline::encode::encode_png_base64;
use crate::pipeline::extract::Recognition;
use crate::pipeline::raster::RasterImage;
use crate::pipeline::text::clean_page_text;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct AnnotateRequest<'a> {
    requests: [ImageRequest<'a>; 1],
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image: ImageContent<'a>,
    features: [Feature; 1],
}

#[derive(Serialize)]
struct ImageContent<'a> {
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    max_results: u32,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<Status>,
}

#[derive(Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
    confidence: Option<f32>,
}

#[derive(Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Status,
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// HTTP client for the remote text-detection service.
#[derive(Clone)]
pub struct RemoteEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_annotations: u32,
    default_confidence: f32,
    timeout_secs: u64,
}

impl std::fmt::Debug for RemoteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEngine")
            .field("endpoint", &self.endpoint)
            .field("configured", &self.is_configured())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl RemoteEngine {
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, DeckScanError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DeckScanError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.vision_endpoint.clone(),
            api_key: config
                .vision_api_key
                .clone()
                .filter(|_| config.has_remote_credential()),
            max_annotations: config.max_annotations,
            default_confidence: config.default_remote_confidence,
            timeout_secs: config.api_timeout_secs,
        })
    }

    /// True when a credential is present, i.e. an attempt would hit the network.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Detect text in `image`.
    ///
    /// Without a credential this returns `NotConfigured` immediately. The
    /// request is bounded by the configured timeout and abandoned as soon as
    /// `cancel` fires.
    pub async fn extract(
        &self,
        image: &RasterImage,
        cancel: &CancellationToken,
    ) -> Result<Recognition, EngineFailure> {
        let fail = |reason, elapsed| EngineFailure::new(EngineKind::Remote, reason, elapsed);

        let Some(key) = self.api_key.as_deref() else {
            return Err(fail(
                FailureReason::NotConfigured {
                    detail: "remote text-detection API key not set".into(),
                },
                Duration::ZERO,
            ));
        };
        if cancel.is_cancelled() {
            return Err(fail(FailureReason::Cancelled, Duration::ZERO));
        }

        let started = Instant::now();
        let owned = image.clone();
        let b64 = match tokio::task::spawn_blocking(move || encode_png_base64(&owned)).await {
            Ok(Ok(b64)) => b64,
            Ok(Err(e)) => {
                return Err(fail(
                    FailureReason::Call {
                        detail: format!("PNG encoding failed: {e}"),
                    },
                    started.elapsed(),
                ))
            }
            Err(e) => {
                return Err(fail(
                    FailureReason::Call {
                        detail: format!("encode task panicked: {e}"),
                    },
                    started.elapsed(),
                ))
            }
        };

        let mut url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            fail(
                FailureReason::Call {
                    detail: format!("invalid endpoint '{}': {e}", self.endpoint),
                },
                started.elapsed(),
            )
        })?;
        url.query_pairs_mut().append_pair("key", key);

        let body = AnnotateRequest {
            requests: [ImageRequest {
                image: ImageContent { content: &b64 },
                features: [Feature {
                    kind: "TEXT_DETECTION",
                    max_results: self.max_annotations,
                }],
            }],
        };

        let request = self
            .client
            .post(url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&body);
        let call = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(fail(FailureReason::Cancelled, started.elapsed()));
            }
            outcome = call => outcome,
        };
        let elapsed = started.elapsed();

        let (status, text) = outcome.map_err(|e| {
            let reason = if e.is_timeout() {
                FailureReason::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                FailureReason::Call {
                    detail: e.to_string(),
                }
            };
            fail(reason, elapsed)
        })?;

        if !status.is_success() {
            return Err(fail(
                FailureReason::Http {
                    status: status.as_u16(),
                    detail: error_detail(&text, status),
                },
                elapsed,
            ));
        }

        let (text, confidence) =
            parse_annotations(&text, self.default_confidence).map_err(|r| fail(r, elapsed))?;
        debug!(
            "Remote engine: {} chars, confidence {:.2}, {}ms",
            text.len(),
            confidence,
            elapsed.as_millis()
        );
        Ok(Recognition {
            text,
            confidence,
            elapsed,
        })
    }
}

/// Pull `(full_text, confidence)` out of an `images:annotate` response body.
///
/// The first annotation is the full text; the rest are per-token entries
/// whose `confidence` values, when present, are averaged. Without any,
/// `default_confidence` is used.
pub fn parse_annotations(body: &str, default_confidence: f32) -> Result<(String, f32), FailureReason> {
    let parsed: AnnotateResponse = serde_json::from_str(body).map_err(|e| FailureReason::Call {
        detail: format!("invalid response body: {e}"),
    })?;
    let Some(first) = parsed.responses.into_iter().next() else {
        return Err(FailureReason::NoText);
    };
    if let Some(status) = first.error {
        return Err(FailureReason::Call {
            detail: status.message,
        });
    }
    let mut annotations = first.text_annotations.into_iter();
    let Some(full) = annotations.next() else {
        return Err(FailureReason::NoText);
    };
    let text = clean_page_text(&full.description);
    if text.is_empty() {
        return Err(FailureReason::NoText);
    }

    let scores: Vec<f32> = annotations.filter_map(|a| a.confidence).collect();
    let confidence = if scores.is_empty() {
        default_confidence
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };
    Ok((text, confidence))
}

fn error_detail(body: &str, status: reqwest::StatusCode) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) if !env.error.message.is_empty() => env.error.message,
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let body = AnnotateRequest {
            requests: [ImageRequest {
                image: ImageContent { content: "AAAA" },
                features: [Feature {
                    kind: "TEXT_DETECTION",
                    max_results: 50,
                }],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["requests"][0]["image"]["content"], "AAAA");
        assert_eq!(json["requests"][0]["features"][0]["type"], "TEXT_DETECTION");
        assert_eq!(json["requests"][0]["features"][0]["maxResults"], 50);
    }

    #[test]
    fn full_text_with_token_confidences() {
        let body = r#"{"responses":[{"textAnnotations":[
            {"description":"Our Team\nFounders with 20 years"},
            {"description":"Our","confidence":0.9},
            {"description":"Team","confidence":0.7},
            {"description":"Founders"}
        ]}]}"#;
        let (text, conf) = parse_annotations(body, 0.8).unwrap();
        assert_eq!(text, "Our Team\nFounders with 20 years");
        assert!((conf - 0.8).abs() < 1e-6);
    }

    #[test]
    fn default_confidence_without_token_scores() {
        let body = r#"{"responses":[{"textAnnotations":[{"description":"Business model"},{"description":"Business"}]}]}"#;
        let (_, conf) = parse_annotations(body, 0.8).unwrap();
        assert_eq!(conf, 0.8);
    }

    #[test]
    fn empty_responses_mean_no_text() {
        assert_eq!(parse_annotations(r#"{"responses":[{}]}"#, 0.8), Err(FailureReason::NoText));
        assert_eq!(parse_annotations(r#"{"responses":[]}"#, 0.8), Err(FailureReason::NoText));
        assert_eq!(
            parse_annotations(r#"{"responses":[{"textAnnotations":[{"description":"  "}]}]}"#, 0.8),
            Err(FailureReason::NoText)
        );
    }

    #[test]
    fn per_image_error_is_a_call_failure() {
        let body = r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#;
        assert_eq!(
            parse_annotations(body, 0.8),
            Err(FailureReason::Call {
                detail: "Bad image data.".into()
            })
        );
    }

    #[test]
    fn garbage_body_is_a_call_failure() {
        assert!(matches!(
            parse_annotations("<html>", 0.8),
            Err(FailureReason::Call { .. })
        ));
    }

    #[test]
    fn http_error_detail_prefers_service_message() {
        let body = r#"{"error":{"code":403,"message":"API key not valid."}}"#;
        assert_eq!(
            error_detail(body, reqwest::StatusCode::FORBIDDEN),
            "API key not valid."
        );
        assert_eq!(error_detail("", reqwest::StatusCode::FORBIDDEN), "Forbidden");
    }

    #[tokio::test]
    async fn missing_key_short_circuits() {
        let engine = RemoteEngine::from_config(&ExtractionConfig::default()).unwrap();
        assert!(!engine.is_configured());
        let img = RasterImage::new(4, 4, 1, vec![0; 16]).unwrap();
        let err = engine
            .extract(&img, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.reason, FailureReason::NotConfigured { .. }));
        assert_eq!(err.elapsed, Duration::ZERO);
    }

    #[test]
    fn whitespace_key_counts_as_missing() {
        let config = ExtractionConfig::builder()
            .vision_api_key("   ")
            .build()
            .unwrap();
        assert!(!RemoteEngine::from_config(&config).unwrap().is_configured());

        let config = ExtractionConfig::builder()
            .vision_api_key("AIza-test")
            .build()
            .unwrap();
        assert!(RemoteEngine::from_config(&config).unwrap().is_configured());
    }
}
