//! CLI binary for deckscan.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use deckscan::{
    assess_paths, BatchCoordinator, BatchOutput, BatchProgressCallback, ExtractionConfig,
    ExtractionMethod, ProgressCallback, QualityReport, DEFAULT_VISION_ENDPOINT,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per slide.
/// Slides may complete out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    labels: Mutex<HashMap<usize, (String, Instant)>>,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading slides…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            labels: Mutex::new(HashMap::new()),
            skipped: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} slides  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn take(&self, index: usize) -> (String, f64) {
        self.labels
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|(label, t)| (label, t.elapsed().as_secs_f64()))
            .unwrap_or_default()
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_slides: usize) {
        self.activate_bar(total_slides);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting text from {total_slides} slides…"))
        ));
    }

    fn on_slide_start(&self, index: usize, _total: usize, label: &str) {
        if let Ok(mut m) = self.labels.lock() {
            m.insert(index, (label.to_string(), Instant::now()));
        }
        self.bar.set_message(label.to_string());
    }

    fn on_slide_complete(
        &self,
        index: usize,
        total: usize,
        method: ExtractionMethod,
        text_len: usize,
    ) {
        let (label, secs) = self.take(index);
        let mark = match method {
            ExtractionMethod::Primary => green("✓"),
            ExtractionMethod::Fallback => yellow("↻"),
            ExtractionMethod::Failed => red("✗"),
        };
        self.bar.println(format!(
            "  {} Slide {:>3}/{:<3}  {:<9} {:<8}  {}  {}",
            mark,
            index,
            total,
            method.to_string(),
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
            dim(&label),
        ));
        self.bar.inc(1);
    }

    fn on_slide_skipped(&self, _index: usize, _total: usize) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_slides: usize, valid_slides: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        let invalid = total_slides.saturating_sub(valid_slides + skipped);
        if invalid == 0 && skipped == 0 {
            eprintln!(
                "{} {} slides extracted",
                green("✔"),
                bold(&valid_slides.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} slides valid  ({} without text, {} skipped)",
                if valid_slides == 0 { red("✘") } else { cyan("⚠") },
                bold(&valid_slides.to_string()),
                total_slides,
                red(&invalid.to_string()),
                skipped,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a deck to stdout (files are processed in argument order)
  deckscan slides/*.jpg

  # Write the composite document to a file
  deckscan slides/*.png -o deck.txt

  # Phone photos with glare: aggressive cleanup
  deckscan --aggressive IMG_4711.jpg IMG_4712.jpg

  # Dark-themed screenshots
  deckscan --slide-mode keynote-*.png

  # Per-slide JSON records with methods, confidences and issues
  deckscan --json slides/*.jpg > deck.json

  # Capture advice only (no extraction)
  deckscan --quality IMG_4711.jpg

ENGINES:
  primary   local tesseract (must be on PATH or set with --tesseract)
  fallback  Google Cloud Vision TEXT_DETECTION, used only when the primary
            output is too short or mostly non-alphabetic

ENVIRONMENT VARIABLES:
  GOOGLE_CLOUD_VISION_API_KEY  Remote text-detection API key (enables fallback)
  DECKSCAN_VISION_ENDPOINT     Override the remote endpoint
  DECKSCAN_CONCURRENCY         Slides in flight at once
  RUST_LOG                     Log filter (overrides -v / -q)
"#;

/// Extract clean text from photographed or screenshotted pitch-deck slides.
#[derive(Parser, Debug)]
#[command(
    name = "deckscan",
    version,
    about = "Extract clean text from photographed or screenshotted pitch-deck slides",
    long_about = "Normalise slide images, read them with a local OCR engine, and fall back to a \
remote text-detection service only when the local result is unusable. Prints one composite \
document with a delimiter block per slide.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Slide images (local paths or HTTP/HTTPS URLs), in deck order.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Write the composite document to this file instead of stdout.
    #[arg(short, long, env = "DECKSCAN_OUTPUT")]
    output: Option<PathBuf>,

    /// Aggressive cleanup: bilateral denoise, equalise, strong sharpen, binarise.
    #[arg(long, env = "DECKSCAN_AGGRESSIVE")]
    aggressive: bool,

    /// Presentation-slide cleanup: invert dark themes, close gaps, adaptive contrast.
    #[arg(long, env = "DECKSCAN_SLIDE_MODE", conflicts_with = "aggressive")]
    slide_mode: bool,

    /// Number of slides in flight at once.
    #[arg(short, long, env = "DECKSCAN_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Remote text-detection API key. Without it the fallback is skipped.
    #[arg(long, env = "GOOGLE_CLOUD_VISION_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Remote text-detection endpoint.
    #[arg(long, env = "DECKSCAN_VISION_ENDPOINT", default_value = DEFAULT_VISION_ENDPOINT)]
    endpoint: String,

    /// Minimum trimmed text length for a slide to count as valid.
    #[arg(long, env = "DECKSCAN_MIN_LENGTH", default_value_t = 20)]
    min_length: usize,

    /// Minimum alphabetic share of non-space characters (0.0–1.0).
    #[arg(long, env = "DECKSCAN_MIN_ALPHA_RATIO", default_value_t = 0.3)]
    min_alpha_ratio: f64,

    /// Tesseract executable.
    #[arg(long, env = "DECKSCAN_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Recognition language for the local engine.
    #[arg(long, env = "DECKSCAN_LANGUAGE", default_value = "eng")]
    language: String,

    /// Tesseract page segmentation mode (0–13).
    #[arg(long, env = "DECKSCAN_PSM", default_value_t = 3)]
    psm: u8,

    /// Output per-slide records and stats as JSON instead of the composite text.
    #[arg(long, env = "DECKSCAN_JSON")]
    json: bool,

    /// Print quality metrics and capture advice only; no extraction.
    #[arg(long)]
    quality: bool,

    /// Disable progress bar.
    #[arg(long, env = "DECKSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DECKSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DECKSCAN_QUIET")]
    quiet: bool,

    /// HTTP download timeout for URL inputs, in seconds.
    #[arg(long, env = "DECKSCAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Remote text-detection request timeout, in seconds.
    #[arg(long, env = "DECKSCAN_API_TIMEOUT", default_value_t = 30)]
    api_timeout: u64,

    /// Per-slide deadline for the local recogniser, in seconds.
    #[arg(long, env = "DECKSCAN_LOCAL_TIMEOUT", default_value_t = 60)]
    local_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar covers what INFO logs would say; keep them quiet
    // unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.quality;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Quality-only mode ────────────────────────────────────────────────
    if cli.quality {
        let reports = assess_paths(cli.inputs.as_slice(), &config)
            .await
            .context("Quality assessment failed")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?
            );
        } else {
            print_quality(&reports);
        }
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let coordinator = BatchCoordinator::from_config(config).context("Invalid configuration")?;
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let quiet = cli.quiet;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if !quiet {
                    eprintln!("{} interrupted, finishing slides in flight…", cyan("⚠"));
                }
                cancel.cancel();
            }
        });
    }

    let output = if let Some(ref output_path) = cli.output {
        coordinator
            .process_paths_to_file(cli.inputs.as_slice(), output_path, &cancel)
            .await
            .context("Extraction failed")?
    } else {
        coordinator
            .process_paths(cli.inputs.as_slice(), &cancel)
            .await
            .context("Extraction failed")?
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.composite.as_str().as_bytes())
            .context("Failed to write to stdout")?;
        if !output.composite.as_str().ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet && !cli.json {
        print_summary(&output, cli.output.as_ref(), show_progress);
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .aggressive(cli.aggressive)
        .slide_mode(cli.slide_mode)
        .concurrency(cli.concurrency)
        .vision_endpoint(cli.endpoint.clone())
        .min_text_length(cli.min_length)
        .min_alpha_ratio(cli.min_alpha_ratio)
        .tesseract_binary(cli.tesseract.clone())
        .ocr_language(cli.language.clone())
        .page_seg_mode(cli.psm)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .local_timeout_secs(cli.local_timeout);

    if let Some(ref key) = cli.api_key {
        builder = builder.vision_api_key(key.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(output: &BatchOutput, path: Option<&PathBuf>, show_progress: bool) {
    let stats = &output.stats;
    if !show_progress {
        eprintln!(
            "Extracted {}/{} slides in {}ms ({} primary, {} fallback, {} failed, {} skipped)",
            stats.valid_slides,
            stats.total_slides,
            stats.wall_duration_ms,
            stats.primary_slides,
            stats.fallback_slides,
            stats.failed_slides,
            stats.skipped_slides,
        );
    } else {
        eprintln!(
            "   {} primary  /  {} fallback  /  {} failed  —  {}ms total",
            dim(&stats.primary_slides.to_string()),
            dim(&stats.fallback_slides.to_string()),
            dim(&stats.failed_slides.to_string()),
            stats.wall_duration_ms,
        );
    }
    if let Some(path) = path {
        eprintln!("   →  {}", bold(&path.display().to_string()));
    }
    for record in output.records.iter().filter(|r| !r.result().is_valid()) {
        for issue in record.result().issues() {
            eprintln!("   {} slide {}: {}", red("!"), record.index(), dim(issue));
        }
    }
}

fn print_quality(reports: &[QualityReport]) {
    for report in reports {
        let m = &report.metrics;
        println!("{}", bold(&report.label));
        println!("  Overall:     {:.2}", m.overall_quality);
        println!("  Sharpness:   {:.2}", m.blur_score);
        println!("  Brightness:  {:.1}", m.brightness);
        println!("  Contrast:    {:.1}", m.contrast);
        println!("  Noise:       {:.2}", m.noise_level);
        for advice in &report.recommendations {
            println!("  {} {}", cyan("›"), advice);
        }
    }
}
