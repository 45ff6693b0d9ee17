//! The local recognition engine.
//!
//! ## Lifecycle
//!
//! Loading a recogniser is expensive (model files, language data), so the
//! engine is built once and shared. If loading fails the engine is stored in
//! its `Unavailable` state and stays there: every later attempt fails fast
//! with the original reason instead of re-probing per slide.
//!
//! ## Serialisation
//!
//! Backends are not assumed to be reentrant. The handle sits behind a
//! `Mutex` and each call runs on the blocking pool while holding it, so at
//! most one recognition is in flight per engine no matter how many slides the
//! batch overlaps. A call that outlives `local_timeout_secs` has its process
//! killed and fails like any other call error.

use crate::config::ExtractionConfig;
use crate::error::{EngineFailure, EngineKind, FailureReason};
use crate::pipeline::extract::Recognition;
use crate::pipeline::raster::RasterImage;
use crate::pipeline::text::clean_fragment;
use image::GrayImage;
use once_cell::sync::OnceCell;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One recognised piece of text and the engine's confidence in it (0–1).
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub confidence: f32,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// A synchronous recogniser that turns a grayscale image into fragments.
///
/// Takes `&mut self`: the engine guarantees exclusive access, so
/// implementations may keep scratch buffers or a non-thread-safe handle.
pub trait RecognitionBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &str {
        "custom"
    }

    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<TextFragment>, String>;
}

/// Recognition through the `tesseract` command-line tool in TSV mode.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    binary: String,
    language: String,
    page_seg_mode: u8,
    timeout_secs: u64,
}

impl TesseractBackend {
    /// Probe the binary once with `--version`; an error here makes the
    /// engine permanently unavailable.
    pub fn load(config: &ExtractionConfig) -> Result<Self, String> {
        let output = Command::new(&config.tesseract_binary)
            .arg("--version")
            .output()
            .map_err(|e| format!("failed to run '{}': {e}", config.tesseract_binary))?;
        if !output.status.success() {
            return Err(format!(
                "'{} --version' exited with {}",
                config.tesseract_binary, output.status
            ));
        }
        let banner = String::from_utf8_lossy(&output.stdout);
        info!(
            "Local engine ready: {}",
            banner.lines().next().unwrap_or("tesseract").trim()
        );
        Ok(Self {
            binary: config.tesseract_binary.clone(),
            language: config.ocr_language.clone(),
            page_seg_mode: config.page_seg_mode,
            timeout_secs: config.local_timeout_secs,
        })
    }

    /// Run one recognition, killing the process if it outlives the deadline.
    ///
    /// Called from the blocking pool, so the runtime handle is available and
    /// `block_on` does not stall a worker.
    fn run(&self, png: &Path) -> Result<Output, String> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| "local engine must run inside a tokio runtime".to_string())?;
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg(png)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(self.page_seg_mode.to_string())
            .arg("tsv")
            .kill_on_drop(true);
        let deadline = Duration::from_secs(self.timeout_secs);
        handle.block_on(async {
            match tokio::time::timeout(deadline, cmd.output()).await {
                Ok(output) => output.map_err(|e| format!("failed to run tesseract: {e}")),
                Err(_) => Err(format!("tesseract timed out after {}s", self.timeout_secs)),
            }
        })
    }
}

impl RecognitionBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<TextFragment>, String> {
        let tmp = tempfile::Builder::new()
            .prefix("deckscan-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| format!("temp file: {e}"))?;
        image
            .save_with_format(tmp.path(), image::ImageFormat::Png)
            .map_err(|e| format!("writing temp image: {e}"))?;

        let output = self.run(tmp.path())?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("tesseract failed: {}", stderr.trim()));
        }
        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Word-level rows (level 5) of tesseract TSV output, confidence scaled to 0–1.
///
/// Rows with negative confidence or blank text are structural and skipped.
pub fn parse_tsv(tsv: &str) -> Vec<TextFragment> {
    tsv.lines()
        .skip(1)
        .filter_map(|row| {
            let cols: Vec<&str> = row.split('\t').collect();
            if cols.len() < 12 || cols[0].trim() != "5" {
                return None;
            }
            let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
            let text = cols[11].trim();
            if text.is_empty() || conf < 0.0 {
                return None;
            }
            Some(TextFragment::new(text, (conf / 100.0).clamp(0.0, 1.0)))
        })
        .collect()
}

/// Join fragments into page text and compute the page confidence.
///
/// Fragments below `min_confidence` are left out of the text, but the
/// confidence is the mean over every fragment the backend returned.
pub fn join_fragments(fragments: &[TextFragment], min_confidence: f32) -> (String, f32) {
    if fragments.is_empty() {
        return (String::new(), 0.0);
    }
    let confidence =
        fragments.iter().map(|f| f.confidence).sum::<f32>() / fragments.len() as f32;
    let text = fragments
        .iter()
        .filter(|f| f.confidence >= min_confidence)
        .map(|f| clean_fragment(&f.text))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (text, confidence)
}

enum EngineState {
    Ready {
        name: String,
        backend: Mutex<Box<dyn RecognitionBackend>>,
    },
    Unavailable(String),
}

/// Process-wide handle to the local recogniser.
pub struct LocalEngine {
    state: EngineState,
}

static SHARED: OnceCell<Arc<LocalEngine>> = OnceCell::new();

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            EngineState::Ready { name, .. } => f.debug_tuple("LocalEngine").field(name).finish(),
            EngineState::Unavailable(reason) => f
                .debug_struct("LocalEngine")
                .field("unavailable", reason)
                .finish(),
        }
    }
}

impl LocalEngine {
    pub fn with_backend(backend: impl RecognitionBackend + 'static) -> Self {
        Self {
            state: EngineState::Ready {
                name: backend.name().to_string(),
                backend: Mutex::new(Box::new(backend)),
            },
        }
    }

    /// An engine that failed to initialise.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: EngineState::Unavailable(reason.into()),
        }
    }

    /// Initialise the tesseract backend, recording failure instead of
    /// returning it.
    pub fn load(config: &ExtractionConfig) -> Self {
        match TesseractBackend::load(config) {
            Ok(backend) => Self::with_backend(backend),
            Err(reason) => {
                warn!("Local engine unavailable: {}", reason);
                Self::unavailable(reason)
            }
        }
    }

    /// The process-wide engine, loaded on first use.
    ///
    /// Only the first caller's configuration is used for loading; later
    /// calls get the same instance whatever config they pass.
    pub fn shared(config: &ExtractionConfig) -> Arc<LocalEngine> {
        SHARED
            .get_or_init(|| Arc::new(Self::load(config)))
            .clone()
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, EngineState::Ready { .. })
    }

    /// Recognise `image`, dropping fragments below `min_fragment_confidence`.
    ///
    /// Never starts work once `cancel` has fired.
    pub async fn extract(
        self: &Arc<Self>,
        image: &RasterImage,
        min_fragment_confidence: f32,
        cancel: &CancellationToken,
    ) -> Result<Recognition, EngineFailure> {
        let fail = |reason, elapsed| EngineFailure::new(EngineKind::Local, reason, elapsed);

        if let EngineState::Unavailable(reason) = &self.state {
            return Err(fail(
                FailureReason::Unavailable {
                    detail: reason.clone(),
                },
                Duration::ZERO,
            ));
        }
        if cancel.is_cancelled() {
            return Err(fail(FailureReason::Cancelled, Duration::ZERO));
        }

        let gray = image.to_gray();
        let engine = Arc::clone(self);
        let token = cancel.clone();
        let outcome =
            tokio::task::spawn_blocking(move || engine.recognize_blocking(&gray, &token)).await;

        let (fragments, elapsed) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err((reason, elapsed))) => return Err(fail(reason, elapsed)),
            Err(e) => {
                return Err(fail(
                    FailureReason::Call {
                        detail: format!("recognition task panicked: {e}"),
                    },
                    Duration::ZERO,
                ))
            }
        };

        let (text, confidence) = join_fragments(&fragments, min_fragment_confidence);
        debug!(
            "Local engine: {} fragments → {} chars, confidence {:.2}, {}ms",
            fragments.len(),
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

    /// The clock starts once the lock is held: time spent queued behind
    /// other slides is not charged to this one.
    fn recognize_blocking(
        &self,
        image: &GrayImage,
        cancel: &CancellationToken,
    ) -> Result<(Vec<TextFragment>, Duration), (FailureReason, Duration)> {
        match &self.state {
            EngineState::Ready { backend, .. } => {
                let mut guard = backend.lock().map_err(|_| {
                    let detail = "local engine lock poisoned by an earlier panic".to_string();
                    (FailureReason::Call { detail }, Duration::ZERO)
                })?;
                if cancel.is_cancelled() {
                    return Err((FailureReason::Cancelled, Duration::ZERO));
                }
                let started = Instant::now();
                let result = guard.recognize(image);
                let elapsed = started.elapsed();
                result
                    .map(|fragments| (fragments, elapsed))
                    .map_err(|detail| (FailureReason::Call { detail }, elapsed))
            }
            EngineState::Unavailable(reason) => Err((
                FailureReason::Unavailable {
                    detail: reason.clone(),
                },
                Duration::ZERO,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Result<Vec<TextFragment>, String>);

    impl RecognitionBackend for Scripted {
        fn recognize(&mut self, _image: &GrayImage) -> Result<Vec<TextFragment>, String> {
            self.0.clone()
        }
    }

    fn blank() -> RasterImage {
        RasterImage::new(8, 8, 1, vec![255; 64]).unwrap()
    }

    #[test]
    fn tsv_keeps_word_rows_only() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t96.5\tSeries\n\
                   5\t1\t1\t1\t1\t2\t70\t10\t40\t20\t88\tA\n\
                   5\t1\t1\t1\t1\t3\t120\t10\t40\t20\t-1\t \n";
        let frags = parse_tsv(tsv);
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].text, "Series");
        assert!((frags[0].confidence - 0.965).abs() < 1e-6);
        assert!((frags[1].confidence - 0.88).abs() < 1e-6);
    }

    #[test]
    fn join_drops_low_confidence_but_averages_all() {
        let frags = vec![
            TextFragment::new("Revenue", 0.9),
            TextFragment::new("~~", 0.1),
            TextFragment::new("grew  3x", 0.8),
        ];
        let (text, conf) = join_fragments(&frags, 0.3);
        assert_eq!(text, "Revenue grew 3x");
        assert!((conf - 0.6).abs() < 1e-6);
    }

    #[test]
    fn join_of_nothing_is_empty() {
        assert_eq!(join_fragments(&[], 0.3), (String::new(), 0.0));
    }

    #[tokio::test]
    async fn unavailable_engine_fails_fast() {
        let engine = Arc::new(LocalEngine::unavailable("no tesseract"));
        assert!(!engine.is_available());
        let err = engine
            .extract(&blank(), 0.3, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.engine, EngineKind::Local);
        assert!(matches!(err.reason, FailureReason::Unavailable { .. }));
        assert!(err.to_string().contains("engine unavailable"));
    }

    #[tokio::test]
    async fn backend_errors_become_call_failures() {
        let engine = Arc::new(LocalEngine::with_backend(Scripted(Err("boom".into()))));
        let err = engine
            .extract(&blank(), 0.3, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::Call { detail: "boom".into() });
    }

    #[tokio::test]
    async fn cancelled_token_prevents_the_call() {
        let engine = Arc::new(LocalEngine::with_backend(Scripted(Ok(vec![]))));
        let token = CancellationToken::new();
        token.cancel();
        let err = engine.extract(&blank(), 0.3, &token).await.unwrap_err();
        assert_eq!(err.reason, FailureReason::Cancelled);
    }

    /// Sleeps for a fixed time and counts its calls.
    struct Slow {
        delay: Duration,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl RecognitionBackend for Slow {
        fn recognize(&mut self, _image: &GrayImage) -> Result<Vec<TextFragment>, String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(vec![TextFragment::new("Use of funds", 0.9)])
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn time_waiting_for_the_lock_is_not_counted() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let engine = Arc::new(LocalEngine::with_backend(Slow {
            delay: Duration::from_millis(150),
            calls: Arc::clone(&calls),
        }));
        let token = CancellationToken::new();
        let image = blank();
        let (a, b, c) = tokio::join!(
            engine.extract(&image, 0.3, &token),
            engine.extract(&image, 0.3, &token),
            engine.extract(&image, 0.3, &token),
        );
        for rec in [a.unwrap(), b.unwrap(), c.unwrap()] {
            assert!(rec.elapsed >= Duration::from_millis(150));
            assert!(rec.elapsed < Duration::from_millis(290), "{:?}", rec.elapsed);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_while_queued_never_calls_the_backend() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let engine = Arc::new(LocalEngine::with_backend(Slow {
            delay: Duration::from_millis(200),
            calls: Arc::clone(&calls),
        }));
        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .extract(&blank(), 0.3, &CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = CancellationToken::new();
        let queued = {
            let engine = Arc::clone(&engine);
            let token = token.clone();
            tokio::spawn(async move { engine.extract(&blank(), 0.3, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        assert!(first.await.unwrap().is_ok());
        let err = queued.await.unwrap().unwrap_err();
        assert_eq!(err.reason, FailureReason::Cancelled);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hung_recogniser_is_killed_at_the_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tesseract");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 'tesseract 5.3.0'; exit 0; fi\nsleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ExtractionConfig::builder()
            .tesseract_binary(script.to_string_lossy())
            .local_timeout_secs(1)
            .build()
            .unwrap();
        let engine = Arc::new(LocalEngine::load(&config));
        assert!(engine.is_available());

        let started = Instant::now();
        let err = engine
            .extract(&blank(), 0.3, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            err.reason,
            FailureReason::Call {
                detail: "tesseract timed out after 1s".into()
            }
        );
    }

    #[tokio::test]
    async fn successful_recognition() {
        let engine = Arc::new(LocalEngine::with_backend(Scripted(Ok(vec![
            TextFragment::new("Go-to-market", 0.95),
            TextFragment::new("strategy", 0.85),
        ]))));
        let rec = engine
            .extract(&blank(), 0.3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rec.text, "Go-to-market strategy");
        assert!((rec.confidence - 0.9).abs() < 1e-6);
    }
}
