//! CLI binary for handtex.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use handtex::convert::write_atomic;
use handtex::{
    convert, convert_stream, convert_to_file, ConversionConfig, ConversionProgressCallback,
    ConversionResult, MathMode, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── Terminal styling ─────────────────────────────────────────────────────

static COLOR: Lazy<bool> =
    Lazy::new(|| io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none());

#[derive(Clone, Copy)]
enum Tone {
    Good,
    Bad,
    Warn,
    Quiet,
    Loud,
}

impl Tone {
    fn paint(self, text: impl Display) -> String {
        if !*COLOR {
            return text.to_string();
        }
        let code = match self {
            Tone::Good => "32",
            Tone::Bad => "31",
            Tone::Warn => "33",
            Tone::Quiet => "2",
            Tone::Loud => "1",
        };
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    /// Status mark for `failed` out of `total`.
    fn mark(failed: usize, total: usize) -> String {
        match failed {
            0 => Tone::Good.paint("✔"),
            f if f == total => Tone::Bad.paint("✘"),
            _ => Tone::Warn.paint("!"),
        }
    }
}

fn counting_bar(len: u64, what: &str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    let template = format!("{{spinner}} {{msg:<12}} {{wide_bar}} {{pos}}/{{len}} {what}");
    if let Ok(style) = ProgressStyle::with_template(&template) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

// ── Region progress ──────────────────────────────────────────────────────

/// Live bar over the regions of a single image. Starts as a spinner while
/// detection runs.
struct RegionBar {
    bar: ProgressBar,
    started: Mutex<Vec<Option<Instant>>>,
}

impl RegionBar {
    fn new() -> Arc<Self> {
        let bar = counting_bar(0, "regions");
        bar.set_message("detecting");
        Arc::new(Self {
            bar,
            started: Mutex::new(Vec::new()),
        })
    }

    fn seconds(&self, region: usize) -> f64 {
        let started = self
            .started
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(region).and_then(Option::take));
        started.map_or(0.0, |t| t.elapsed().as_secs_f64())
    }
}

impl ConversionProgressCallback for RegionBar {
    fn on_conversion_start(&self, total: usize) {
        if let Ok(mut started) = self.started.lock() {
            *started = vec![None; total];
        }
        self.bar.set_length(total as u64);
        self.bar.set_message("recognising");
    }

    fn on_region_start(&self, region: usize, _total: usize) {
        if let Ok(mut started) = self.started.lock() {
            if let Some(slot) = started.get_mut(region) {
                *slot = Some(Instant::now());
            }
        }
    }

    fn on_region_complete(&self, region: usize, _total: usize, glyphs: usize) {
        let secs = self.seconds(region);
        self.bar.println(format!(
            "{} #{:<3} {}",
            Tone::Good.paint("✓"),
            region + 1,
            Tone::Quiet.paint(format!("{glyphs} glyphs, {secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_region_error(&self, region: usize, _total: usize, error: &str) {
        let secs = self.seconds(region);
        let first_line = error.lines().next().unwrap_or(error);
        self.bar.println(format!(
            "{} #{:<3} {} {}",
            Tone::Bad.paint("✗"),
            region + 1,
            Tone::Bad.paint(first_line),
            Tone::Quiet.paint(format!("{secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total: usize, recognized: usize) {
        self.bar.finish_and_clear();
        let unresolved = total.saturating_sub(recognized);
        let tail = if unresolved == 0 {
            String::new()
        } else {
            format!(", {} unresolved", Tone::Bad.paint(unresolved))
        };
        eprintln!(
            "{} {}/{total} regions{tail}",
            Tone::mark(unresolved, total),
            Tone::Loud.paint(recognized),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (stdout)
  handtex whiteboard.jpg

  # Inline math, written to a file
  handtex --math-mode inline homework.png -o homework.tex

  # A compilable document with extra packages
  handtex --standalone --package amsmath --package mathtools notes.png -o notes.tex

  # Convert from URL
  handtex https://example.com/equation.png

  # Many images at once; one .tex per image in out/
  handtex page1.png page2.png page3.png -o out/

  # JSON output with the expression tree and per-node confidence
  handtex --json equation.png > equation.json

  # List the nodes worth double-checking
  handtex --review 0.6 equation.png

SUPPORTED FORMATS:
  image/png, image/jpeg, image/webp, image/heic (HEIC needs a build with `--features heic`)

ENVIRONMENT VARIABLES:
  Every flag has an HANDTEX_* equivalent, e.g. HANDTEX_MATH_MODE=display.
  RUST_LOG overrides the log filter chosen by --verbose/--quiet.
"#;

/// Convert images of handwritten mathematics to LaTeX.
#[derive(Parser, Debug)]
#[command(
    name = "handtex",
    version,
    about = "Convert images of handwritten mathematics to LaTeX",
    long_about = "Convert photos and scans of handwritten mathematics (local files or URLs) to \
LaTeX. Formulas are detected, recognised symbol by symbol and laid out into fractions, scripts, \
radicals, sums, integrals and matrices before being written as canonical LaTeX.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write LaTeX to this file (one input) or into this directory (several).
    #[arg(short, long, env = "HANDTEX_OUTPUT")]
    output: Option<PathBuf>,

    /// How each formula is wrapped.
    #[arg(long, env = "HANDTEX_MATH_MODE", value_enum, default_value = "raw")]
    math_mode: MathModeArg,

    /// Emit a compilable .tex document.
    #[arg(long, env = "HANDTEX_STANDALONE")]
    standalone: bool,

    /// Package for the standalone preamble (repeatable).
    #[arg(long = "package", env = "HANDTEX_PACKAGES", value_delimiter = ',',
          default_values_t = ["amsmath".to_string(), "amssymb".to_string()])]
    packages: Vec<String>,

    /// Text placed between formulas from different regions.
    #[arg(long, env = "HANDTEX_SEPARATOR", default_value = "\n")]
    separator: String,

    /// Maximum formula regions per image.
    #[arg(long, env = "HANDTEX_MAX_REGIONS", default_value_t = 32)]
    max_regions: usize,

    /// Minimum region detection confidence (0–1).
    #[arg(long, env = "HANDTEX_MIN_CONFIDENCE", default_value_t = 0.1)]
    min_confidence: f32,

    /// Grey level (0–255) below which a pixel counts as ink.
    #[arg(long, env = "HANDTEX_INK_THRESHOLD", default_value_t = 128)]
    ink_threshold: u8,

    /// Symbol hypotheses kept per glyph.
    #[arg(long, env = "HANDTEX_TOP_K", default_value_t = 3)]
    top_k: usize,

    /// Images converted concurrently (default: CPU count).
    #[arg(short, long, env = "HANDTEX_WORKERS")]
    workers: Option<usize>,

    /// Regions of one image recognised concurrently.
    #[arg(long, env = "HANDTEX_REGION_CONCURRENCY", default_value_t = 4)]
    region_concurrency: usize,

    /// Whole-image deadline in milliseconds.
    #[arg(long, env = "HANDTEX_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Per-region recognition budget in milliseconds.
    #[arg(long, env = "HANDTEX_REGION_TIMEOUT_MS", default_value_t = 5_000)]
    region_timeout_ms: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "HANDTEX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output structured JSON (ConversionResult) instead of LaTeX.
    #[arg(long, env = "HANDTEX_JSON")]
    json: bool,

    /// After converting, list nodes whose confidence is below this value.
    #[arg(long, value_name = "THRESHOLD")]
    review: Option<f32>,

    /// Disable progress bar.
    #[arg(long, env = "HANDTEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HANDTEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "HANDTEX_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum MathModeArg {
    Raw,
    Inline,
    Display,
    Equation,
}

impl From<MathModeArg> for MathMode {
    fn from(v: MathModeArg) -> Self {
        match v {
            MathModeArg::Raw => MathMode::Raw,
            MathModeArg::Inline => MathMode::Inline,
            MathModeArg::Display => MathMode::Display,
            MathModeArg::Equation => MathMode::Equation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    if cli.inputs.len() > 1 {
        return run_batch(&cli, show_progress).await;
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(RegionBar::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let input = &cli.inputs[0];

    // ── Run conversion ───────────────────────────────────────────────────
    if let (Some(output_path), false) = (&cli.output, cli.json || cli.review.is_some()) {
        let stats = convert_to_file(input, output_path, &config)
            .await
            .context("Conversion failed")?;

        if !cli.quiet {
            eprintln!(
                "{} {}/{} regions, {} glyphs, {}ms -> {}",
                Tone::mark(stats.failed_regions, stats.total_regions),
                stats.recognized_regions,
                stats.total_regions,
                stats.total_glyphs,
                stats.total_duration_ms,
                Tone::Loud.paint(output_path.display()),
            );
        }
        return Ok(());
    }

    let result = convert(input, &config)
        .await
        .context("Conversion failed")?;
    let text = render(&cli, &config, &result)?;

    match &cli.output {
        Some(path) => write_atomic(path, &text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print_stdout(&text)?,
    }

    if let Some(threshold) = cli.review {
        print_review(&result, threshold);
    }

    if !cli.quiet && !show_progress && !cli.json {
        eprintln!(
            "Recognised {}/{} regions ({} glyphs) in {}ms",
            result.stats.recognized_regions,
            result.stats.total_regions,
            result.stats.total_glyphs,
            result.stats.total_duration_ms
        );
    }

    Ok(())
}

/// Several inputs: stream results, one bar over images.
async fn run_batch(cli: &Cli, show_progress: bool) -> Result<()> {
    let config = build_config(cli, None)?;
    if let Some(ref dir) = cli.output {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let bar = show_progress.then(|| {
        let bar = counting_bar(cli.inputs.len() as u64, "images");
        bar.set_message("converting");
        bar
    });

    let mut results = convert_stream(cli.inputs.clone(), &config);
    let mut json_results = Vec::new();
    let mut failed = 0usize;

    while let Some((input, outcome)) = results.next().await {
        let line = match outcome {
            Ok(result) => {
                if cli.json {
                    json_results.push(serde_json::json!({ "input": input, "result": result }));
                } else if let Some(ref dir) = cli.output {
                    let path = dir.join(output_name(&input));
                    let text = result.formatted(&config.output);
                    write_atomic(&path, &text)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                } else {
                    println!("% {input}\n{}", result.formatted(&config.output));
                }
                format!(
                    "{} {input} {}",
                    Tone::Good.paint("✓"),
                    Tone::Quiet.paint(format!("({} regions)", result.stats.total_regions))
                )
            }
            Err(e) => {
                failed += 1;
                if cli.json {
                    json_results.push(serde_json::json!({ "input": input, "error": e.to_string() }));
                }
                format!("{} {input} {}", Tone::Bad.paint("✗"), Tone::Bad.paint(e))
            }
        };
        match &bar {
            Some(bar) => {
                bar.println(line);
                bar.inc(1);
            }
            None if !cli.quiet && !cli.json => eprintln!("{line}"),
            None => {}
        }
    }

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    if cli.json {
        let json = serde_json::to_string_pretty(&json_results).context("Failed to serialise output")?;
        println!("{json}");
    }
    if !cli.quiet {
        let total = cli.inputs.len();
        eprintln!(
            "{} {}/{total} images",
            Tone::mark(failed, total),
            Tone::Loud.paint(total - failed),
        );
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} images failed", cli.inputs.len());
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .max_regions(cli.max_regions)
        .min_confidence(cli.min_confidence)
        .ink_threshold(cli.ink_threshold)
        .top_k(cli.top_k)
        .region_concurrency(cli.region_concurrency)
        .request_timeout_ms(cli.timeout_ms)
        .region_timeout_ms(cli.region_timeout_ms)
        .download_timeout_secs(cli.download_timeout)
        .math_mode(cli.math_mode.clone().into())
        .region_separator(cli.separator.replace("\\n", "\n"))
        .standalone(cli.standalone)
        .packages(cli.packages.iter().cloned());

    if let Some(workers) = cli.workers {
        builder = builder.workers(workers);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn render(cli: &Cli, config: &ConversionConfig, result: &ConversionResult) -> Result<String> {
    if cli.json {
        serde_json::to_string_pretty(result).context("Failed to serialise output")
    } else {
        Ok(result.formatted(&config.output))
    }
}

fn print_stdout(text: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(text.as_bytes())
        .context("Failed to write to stdout")?;
    if !text.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

fn print_review(result: &ConversionResult, threshold: f32) {
    let low = result.low_confidence(threshold);
    if low.is_empty() {
        eprintln!("{} nothing below {threshold}", Tone::Good.paint("✔"));
        return;
    }
    eprintln!("{} {} nodes below {threshold}:", Tone::Warn.paint("!"), low.len());
    for id in low {
        let confidence = result.confidence.get(&id).copied().unwrap_or(0.0);
        let latex = result
            .tree
            .find(id)
            .and_then(|n| handtex::latex::synthesize(n).ok())
            .unwrap_or_default();
        eprintln!("  {id:>5} {confidence:.2} {}", Tone::Quiet.paint(latex));
    }
}

/// `dir/photo.jpg` or `https://host/eq.png?x` → `photo.tex` / `eq.tex`.
fn output_name(input: &str) -> String {
    let last = input
        .split(['?', '#'])
        .next()
        .unwrap_or(input)
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(input);
    let stem = Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("formula");
    format!("{stem}.tex")
}
