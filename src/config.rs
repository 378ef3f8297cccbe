//! Configuration types for handwritten-math conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across threads, serialise them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! The knobs are grouped by pipeline stage ([`IngestConfig`],
//! [`DetectorConfig`], [`RecognizerConfig`], [`ComposerConfig`],
//! [`OutputOptions`]); every threshold the heuristics use lives here rather
//! than as a constant in the stage itself.
//!
//! # Design choice: builder over constructor
//! A thirty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::HandTexError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for an image-to-LaTeX conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use handtex::{ConversionConfig, MathMode};
///
/// let config = ConversionConfig::builder()
///     .max_regions(4)
///     .region_timeout_ms(2_000)
///     .math_mode(MathMode::Display)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub ingest: IngestConfig,
    pub detector: DetectorConfig,
    pub recognizer: RecognizerConfig,
    pub composer: ComposerConfig,
    pub output: OutputOptions,

    /// Whole-request deadline in milliseconds. Default: 30 000.
    ///
    /// Covers ingestion, detection and recognition. If it expires before
    /// composition begins the request fails with [`HandTexError::Timeout`]
    /// and partial recognition is discarded.
    pub request_timeout_ms: u64,

    /// Per-region recognition budget in milliseconds. Default: 5 000.
    ///
    /// A region that exceeds it degrades to an `Unresolved` node; the rest
    /// of the document still converts.
    pub region_timeout_ms: u64,

    /// Requests that may run detection + recognition at once. Default: the
    /// number of available CPUs.
    pub workers: usize,

    /// Regions of one image recognised concurrently. Default: 4.
    pub region_concurrency: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-region progress events.
    #[serde(skip)]
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            detector: DetectorConfig::default(),
            recognizer: RecognizerConfig::default(),
            composer: ComposerConfig::default(),
            output: OutputOptions::default(),
            request_timeout_ms: 30_000,
            region_timeout_ms: 5_000,
            workers: default_workers(),
            region_concurrency: 4,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("ingest", &self.ingest)
            .field("detector", &self.detector)
            .field("recognizer", &self.recognizer)
            .field("composer", &self.composer)
            .field("output", &self.output)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("region_timeout_ms", &self.region_timeout_ms)
            .field("workers", &self.workers)
            .field("region_concurrency", &self.region_concurrency)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Continue building from an existing configuration.
    pub fn to_builder(&self) -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: self.clone(),
        }
    }
}

// ── Stage configs ────────────────────────────────────────────────────────

/// Limits applied before any decoding happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum accepted input size in bytes. Default: 20 MiB.
    pub max_bytes: u64,
    /// Maximum width or height in pixels. Default: 8192.
    ///
    /// Checked against the image header before the pixel buffer is
    /// allocated, so an oversized upload never costs its full decode.
    pub max_dimension: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            max_dimension: 8192,
        }
    }
}

/// Thresholds for the connected-component region detector and the shared
/// candidate post-processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Luma value below which a pixel counts as ink. Default: 128.
    pub ink_threshold: u8,
    /// Components with fewer pixels are treated as noise. Default: 4.
    pub min_component_pixels: u32,
    /// Components closer than `region_gap_ratio × median component height`
    /// belong to the same region. Default: 2.0.
    pub region_gap_ratio: f32,
    /// Lower bound on the grouping gap in pixels. Default: 6.
    pub min_region_gap: u32,
    /// Candidates scoring below this are dropped. Default: 0.1.
    pub min_confidence: f32,
    /// Candidates overlapping more than this IoU are merged. Default: 0.5.
    pub iou_threshold: f32,
    /// At most this many regions survive, highest confidence first. Default: 32.
    pub max_regions: usize,
    /// Pixels of margin added around every region. Default: 2.
    pub padding: u32,
    /// Ink mass (pixels) at which a candidate's size score reaches one half.
    /// Default: 20.0.
    pub score_half_mass: f32,
    /// Ink density (ink / box area) up to which a candidate is not penalised.
    /// Solid blobs above it look like smudges or fills. Default: 0.7.
    pub max_ink_density: f32,
    /// Score lost by a box that is completely filled with ink. Default: 0.7.
    pub density_penalty: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ink_threshold: 128,
            min_component_pixels: 4,
            region_gap_ratio: 2.0,
            min_region_gap: 6,
            min_confidence: 0.1,
            iou_threshold: 0.5,
            max_regions: 32,
            padding: 2,
            score_half_mass: 20.0,
            max_ink_density: 0.7,
            density_penalty: 0.7,
        }
    }
}

/// Thresholds for the template-matching symbol recogniser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Luma value below which a pixel counts as ink. Default: 128.
    pub ink_threshold: u8,
    /// Hypotheses kept per glyph. Default: 3.
    pub top_k: usize,
    /// Width/height ratio from which a component is a horizontal bar. Default: 3.0.
    pub bar_aspect_ratio: f32,
    /// Minimum ink fill of a bar's bounding box. Default: 0.6.
    pub min_bar_fill: f32,
    /// Components with fewer ink pixels inside a region are ignored. Default: 2.
    pub min_glyph_pixels: u32,
    /// Two stacked bars closer than `equals_gap_ratio × bar width` read as
    /// `=`. Default: 0.6.
    pub equals_gap_ratio: f32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            ink_threshold: 128,
            top_k: 3,
            bar_aspect_ratio: 3.0,
            min_bar_fill: 0.6,
            min_glyph_pixels: 2,
            equals_gap_ratio: 0.6,
        }
    }
}

/// Layout thresholds used by the structure composer. Ratios are relative to
/// the height of the unit being compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// A script must be at most this fraction of its base's height. Default: 0.8.
    pub script_size_ratio: f32,
    /// Centre raised by more than this fraction of base height → superscript.
    /// Default: 0.2.
    pub superscript_offset: f32,
    /// Centre lowered by more than this fraction of base height → subscript.
    /// Default: 0.2.
    pub subscript_offset: f32,
    /// Vertical overlap (relative to the smaller height) above which a unit
    /// stays on the baseline. Default: 0.75.
    pub baseline_overlap_ratio: f32,
    /// Width of a radical sign's hook as a fraction of the sign's width.
    /// Content starting within the sign past the hook is its radicand.
    /// Default: 0.35.
    pub radical_hook_ratio: f32,
    /// A bracket must be this many times the median glyph height to open a
    /// matrix. Default: 1.8.
    pub matrix_bracket_ratio: f32,
    /// Horizontal gaps wider than this fraction of median glyph height split
    /// matrix columns. Default: 0.8.
    pub matrix_column_gap: f32,
    /// A matrix's closing bracket must be at least this fraction of the
    /// opening bracket's height. Default: 0.75.
    pub matrix_closer_height_ratio: f32,
    /// ...and overlap it vertically by this fraction of the smaller of the
    /// two. Default: 0.5.
    pub matrix_closer_overlap_ratio: f32,
    /// A radical's index may start this many sign widths left of the sign
    /// and this many sign heights above it. Default: 1.0.
    pub radical_index_reach: f32,
    /// Integral limits must be at most this fraction of the sign's height.
    /// Default: 0.6.
    pub limit_size_ratio: f32,
    /// Limits and body of a big operator may start this fraction of the
    /// operator's width before its right edge. Default: 0.25.
    pub operator_overhang_ratio: f32,
    /// Side limits (integrals) may sit at most `max(width, ratio × height)`
    /// right of the sign. Default: 0.5.
    pub side_limit_gap_ratio: f32,
    /// Side limits are centred within this fraction of the sign's height
    /// from its top (upper) or bottom (lower). Default: 0.35.
    pub side_limit_band_ratio: f32,
    /// Stacked limits (sums, products) are centred within the operator's
    /// width widened by this fraction on either side. Default: 0.5.
    pub stacked_limit_span_ratio: f32,
    /// Stacked limits may tuck into the operator by this fraction of its
    /// height. Default: 0.25.
    pub stacked_limit_tuck_ratio: f32,
    /// Stacked limits lie at most this many operator heights away. Default: 1.0.
    pub stacked_limit_reach_ratio: f32,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            script_size_ratio: 0.8,
            superscript_offset: 0.2,
            subscript_offset: 0.2,
            baseline_overlap_ratio: 0.75,
            radical_hook_ratio: 0.35,
            matrix_bracket_ratio: 1.8,
            matrix_column_gap: 0.8,
            matrix_closer_height_ratio: 0.75,
            matrix_closer_overlap_ratio: 0.5,
            radical_index_reach: 1.0,
            limit_size_ratio: 0.6,
            operator_overhang_ratio: 0.25,
            side_limit_gap_ratio: 0.5,
            side_limit_band_ratio: 0.35,
            stacked_limit_span_ratio: 0.5,
            stacked_limit_tuck_ratio: 0.25,
            stacked_limit_reach_ratio: 1.0,
        }
    }
}

/// How LaTeX is presented to people (CLI output, exported files).
///
/// [`crate::output::ConversionResult::latex`] is always the raw document;
/// these options only apply to [`crate::output::ConversionResult::formatted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    pub math_mode: MathMode,
    /// Inserted between formulas from different regions. Default: newline.
    pub region_separator: String,
    /// Emit a compilable `.tex` document with a package preamble. Default: false.
    pub standalone: bool,
    /// Packages loaded by the standalone preamble. Default: amsmath, amssymb.
    pub packages: Vec<String>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            math_mode: MathMode::default(),
            region_separator: "\n".to_string(),
            standalone: false,
            packages: vec!["amsmath".to_string(), "amssymb".to_string()],
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn ingest(mut self, ingest: IngestConfig) -> Self {
        self.config.ingest = ingest;
        self
    }

    pub fn detector(mut self, detector: DetectorConfig) -> Self {
        self.config.detector = detector;
        self
    }

    pub fn recognizer(mut self, recognizer: RecognizerConfig) -> Self {
        self.config.recognizer = recognizer;
        self
    }

    pub fn composer(mut self, composer: ComposerConfig) -> Self {
        self.config.composer = composer;
        self
    }

    pub fn output(mut self, output: OutputOptions) -> Self {
        self.config.output = output;
        self
    }

    pub fn max_bytes(mut self, n: u64) -> Self {
        self.config.ingest.max_bytes = n.max(1);
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.ingest.max_dimension = px.max(1);
        self
    }

    pub fn ink_threshold(mut self, t: u8) -> Self {
        self.config.detector.ink_threshold = t;
        self.config.recognizer.ink_threshold = t;
        self
    }

    pub fn min_confidence(mut self, c: f32) -> Self {
        self.config.detector.min_confidence = c.clamp(0.0, 1.0);
        self
    }

    pub fn iou_threshold(mut self, t: f32) -> Self {
        self.config.detector.iou_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn max_regions(mut self, n: usize) -> Self {
        self.config.detector.max_regions = n.max(1);
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.config.recognizer.top_k = k.max(1);
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms.max(1);
        self
    }

    pub fn region_timeout_ms(mut self, ms: u64) -> Self {
        self.config.region_timeout_ms = ms.max(1);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn region_concurrency(mut self, n: usize) -> Self {
        self.config.region_concurrency = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn math_mode(mut self, mode: MathMode) -> Self {
        self.config.output.math_mode = mode;
        self
    }

    pub fn region_separator(mut self, sep: impl Into<String>) -> Self {
        self.config.output.region_separator = sep.into();
        self
    }

    pub fn standalone(mut self, v: bool) -> Self {
        self.config.output.standalone = v;
        self
    }

    pub fn packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.output.packages = packages.into_iter().map(Into::into).collect();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, HandTexError> {
        let c = &self.config;
        let unit = |name: &str, v: f32| -> Result<(), HandTexError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(HandTexError::InvalidConfig(format!(
                    "{name} must be within 0–1, got {v}"
                )))
            }
        };
        let positive = |name: &str, v: f32| -> Result<(), HandTexError> {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(HandTexError::InvalidConfig(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };

        if c.ingest.max_bytes == 0 || c.ingest.max_dimension == 0 {
            return Err(HandTexError::InvalidConfig(
                "Ingest limits must be ≥ 1".into(),
            ));
        }
        unit("min_confidence", c.detector.min_confidence)?;
        unit("iou_threshold", c.detector.iou_threshold)?;
        positive("region_gap_ratio", c.detector.region_gap_ratio)?;
        positive("score_half_mass", c.detector.score_half_mass)?;
        unit("density_penalty", c.detector.density_penalty)?;
        if !(0.0..1.0).contains(&c.detector.max_ink_density) {
            return Err(HandTexError::InvalidConfig(format!(
                "max_ink_density must be within 0–1 (exclusive of 1), got {}",
                c.detector.max_ink_density
            )));
        }
        if c.detector.max_regions == 0 {
            return Err(HandTexError::InvalidConfig("max_regions must be ≥ 1".into()));
        }
        if c.recognizer.top_k == 0 {
            return Err(HandTexError::InvalidConfig("top_k must be ≥ 1".into()));
        }
        positive("bar_aspect_ratio", c.recognizer.bar_aspect_ratio)?;
        unit("min_bar_fill", c.recognizer.min_bar_fill)?;
        positive("equals_gap_ratio", c.recognizer.equals_gap_ratio)?;
        positive("script_size_ratio", c.composer.script_size_ratio)?;
        unit("superscript_offset", c.composer.superscript_offset)?;
        unit("subscript_offset", c.composer.subscript_offset)?;
        unit("baseline_overlap_ratio", c.composer.baseline_overlap_ratio)?;
        unit("radical_hook_ratio", c.composer.radical_hook_ratio)?;
        positive("matrix_bracket_ratio", c.composer.matrix_bracket_ratio)?;
        positive("matrix_column_gap", c.composer.matrix_column_gap)?;
        unit("matrix_closer_height_ratio", c.composer.matrix_closer_height_ratio)?;
        unit("matrix_closer_overlap_ratio", c.composer.matrix_closer_overlap_ratio)?;
        positive("radical_index_reach", c.composer.radical_index_reach)?;
        positive("limit_size_ratio", c.composer.limit_size_ratio)?;
        unit("operator_overhang_ratio", c.composer.operator_overhang_ratio)?;
        positive("side_limit_gap_ratio", c.composer.side_limit_gap_ratio)?;
        unit("side_limit_band_ratio", c.composer.side_limit_band_ratio)?;
        positive("stacked_limit_span_ratio", c.composer.stacked_limit_span_ratio)?;
        unit("stacked_limit_tuck_ratio", c.composer.stacked_limit_tuck_ratio)?;
        positive("stacked_limit_reach_ratio", c.composer.stacked_limit_reach_ratio)?;
        if c.request_timeout_ms == 0 || c.region_timeout_ms == 0 {
            return Err(HandTexError::InvalidConfig("Timeouts must be ≥ 1ms".into()));
        }
        if c.workers == 0 || c.region_concurrency == 0 {
            return Err(HandTexError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How formulas are wrapped for presentation.
///
/// | Mode | Output |
/// |------|--------|
/// | Raw | `x^{2}` (default) |
/// | Inline | `$x^{2}$` |
/// | Display | `$$x^{2}$$` |
/// | Equation | `\begin{equation}x^{2}\end{equation}` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathMode {
    #[default]
    Raw,
    Inline,
    Display,
    Equation,
}

impl MathMode {
    /// Wrap one formula. Empty formulas stay empty.
    pub fn wrap(&self, latex: &str) -> String {
        if latex.is_empty() {
            return String::new();
        }
        match self {
            MathMode::Raw => latex.to_string(),
            MathMode::Inline => format!("${latex}$"),
            MathMode::Display => format!("$${latex}$$"),
            MathMode::Equation => format!("\\begin{{equation}}\n{latex}\n\\end{{equation}}"),
        }
    }
}

impl std::str::FromStr for MathMode {
    type Err = HandTexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "none" => Ok(MathMode::Raw),
            "inline" => Ok(MathMode::Inline),
            "display" => Ok(MathMode::Display),
            "equation" => Ok(MathMode::Equation),
            other => Err(HandTexError::InvalidConfig(format!(
                "unknown math mode '{other}' (expected raw, inline, display or equation)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConversionConfig::builder().build().unwrap();
        assert_eq!(config.ingest.max_bytes, 20 * 1024 * 1024);
        assert_eq!(config.ingest.max_dimension, 8192);
        assert!(config.workers >= 1);
    }

    #[test]
    fn setters_clamp() {
        let config = ConversionConfig::builder()
            .min_confidence(3.0)
            .max_regions(0)
            .workers(0)
            .top_k(0)
            .build()
            .unwrap();
        assert_eq!(config.detector.min_confidence, 1.0);
        assert_eq!(config.detector.max_regions, 1);
        assert_eq!(config.workers, 1);
        assert_eq!(config.recognizer.top_k, 1);
    }

    #[test]
    fn build_rejects_out_of_range_ratios() {
        let composer = ComposerConfig {
            baseline_overlap_ratio: 1.5,
            ..ComposerConfig::default()
        };
        let err = ConversionConfig::builder().composer(composer).build().unwrap_err();
        assert!(matches!(err, HandTexError::InvalidConfig(ref m) if m.contains("baseline_overlap_ratio")));

        let detector = DetectorConfig {
            max_ink_density: 1.0,
            ..DetectorConfig::default()
        };
        let err = ConversionConfig::builder().detector(detector).build().unwrap_err();
        assert!(matches!(err, HandTexError::InvalidConfig(ref m) if m.contains("max_ink_density")));

        let composer = ComposerConfig {
            stacked_limit_reach_ratio: 0.0,
            ..ComposerConfig::default()
        };
        assert!(ConversionConfig::builder().composer(composer).build().is_err());
    }

    #[test]
    fn math_modes_wrap() {
        assert_eq!(MathMode::Raw.wrap("x"), "x");
        assert_eq!(MathMode::Inline.wrap("x"), "$x$");
        assert_eq!(MathMode::Display.wrap("x"), "$$x$$");
        assert_eq!(
            MathMode::Equation.wrap("x"),
            "\\begin{equation}\nx\n\\end{equation}"
        );
        assert_eq!(MathMode::Display.wrap(""), "");
        assert_eq!("Inline".parse::<MathMode>().unwrap(), MathMode::Inline);
        assert!("bogus".parse::<MathMode>().is_err());
    }

    #[test]
    fn config_round_trips_through_json_without_callback() {
        let config = ConversionConfig::builder()
            .max_regions(7)
            .math_mode(MathMode::Display)
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: ConversionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.detector.max_regions, 7);
        assert_eq!(back.output.math_mode, MathMode::Display);
        assert!(back.progress_callback.is_none());

        let partial: ConversionConfig =
            serde_json::from_str(r#"{"detector": {"max_regions": 2}}"#).unwrap();
        assert_eq!(partial.detector.max_regions, 2);
        assert_eq!(partial.detector.iou_threshold, 0.5);
    }
}
