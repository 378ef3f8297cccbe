//! Eager (whole-image) conversion entry points.
//!
//! ## Where the time goes
//!
//! Ingestion, detection and recognition are CPU-bound and run on blocking
//! threads; only composition and synthesis (cheap, tree-sized work) run
//! inline. A [`Converter`] bounds the number of requests in the CPU-heavy
//! phases with a semaphore sized to `workers`, and each request fans its
//! regions out `region_concurrency` at a time.
//!
//! ## Deadlines
//!
//! Every request carries a deadline (`request_timeout_ms`) covering
//! ingestion, detection and recognition. If it expires before composition
//! begins, the partial recognition is discarded and the request fails with
//! [`HandTexError::Timeout`]. Each region additionally gets its own budget
//! (`region_timeout_ms`); a region that overruns degrades to an
//! `Unresolved` node and the rest of the image still converts.
//!
//! Use [`crate::stream::convert_stream`] instead when converting many
//! images and you want results as they complete.

use crate::config::ConversionConfig;
use crate::error::{HandTexError, RegionError};
use crate::latex::synthesize_roots;
use crate::output::{ConversionResult, ConversionStats, RegionResult};
use crate::pipeline::compose::compose_region;
use crate::pipeline::detect::{finalize_regions, InkRegionDetector, Region, RegionDetector};
use crate::pipeline::ingest::{ingest, Image};
use crate::pipeline::input;
use crate::pipeline::recognize::{Budget, Glyph, SymbolRecognizer, TemplateRecognizer};
use crate::tree::{ExpressionNode, ExpressionTree};
use futures::stream::{self, StreamExt};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Owns the worker pool and the pluggable detection/recognition stages.
///
/// Cheap to share: wrap in an `Arc` and call from as many tasks as needed;
/// the semaphore caps how many run their CPU-heavy phases at once.
pub struct Converter {
    detector: Arc<dyn RegionDetector>,
    recognizer: Arc<dyn SymbolRecognizer>,
    permits: Arc<Semaphore>,
    config: ConversionConfig,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("workers", &self.config.workers)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl Converter {
    /// A converter with the default ink detector and template recogniser.
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            detector: Arc::new(InkRegionDetector),
            recognizer: Arc::new(TemplateRecognizer::default()),
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
        }
    }

    pub fn with_detector(mut self, detector: impl RegionDetector + 'static) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    pub fn with_recognizer(mut self, recognizer: impl SymbolRecognizer + 'static) -> Self {
        self.recognizer = Arc::new(recognizer);
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert a local path or HTTP(S) URL.
    pub async fn convert(&self, input: &str) -> Result<ConversionResult, HandTexError> {
        let source = input::resolve_input(input, self.config.download_timeout_secs).await?;
        self.convert_bytes(source.bytes, &source.mime).await
    }

    /// Convert raw image bytes declared as `mime`.
    pub async fn convert_bytes(
        &self,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<ConversionResult, HandTexError> {
        self.convert_bytes_with(bytes, mime, &self.config).await
    }

    /// Like [`Converter::convert_bytes`] with per-request settings. The
    /// worker pool is the converter's own regardless of `config.workers`.
    pub async fn convert_bytes_with(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        config: &ConversionConfig,
    ) -> Result<ConversionResult, HandTexError> {
        let total_start = Instant::now();
        info!(bytes = bytes.len(), mime, "Starting conversion");

        let ingest_config = config.ingest.clone();
        let mime = mime.to_string();
        let deadline = deadline_after(config.request_timeout_ms);
        let ingest_start = Instant::now();
        let image = run_before(deadline, total_start, async move {
            tokio::task::spawn_blocking(move || ingest(&bytes, &mime, &ingest_config))
                .await
                .map_err(|e| HandTexError::Internal(format!("ingest task failed: {e}")))?
        })
        .await?;
        let ingest_duration_ms = ingest_start.elapsed().as_millis() as u64;

        self.finish(Arc::new(image), config, deadline, total_start, ingest_duration_ms)
            .await
    }

    /// Convert an already-decoded image.
    pub async fn convert_image(
        &self,
        image: Image,
        config: &ConversionConfig,
    ) -> Result<ConversionResult, HandTexError> {
        let total_start = Instant::now();
        let deadline = deadline_after(config.request_timeout_ms);
        self.finish(Arc::new(image), config, deadline, total_start, 0)
            .await
    }

    async fn finish(
        &self,
        image: Arc<Image>,
        config: &ConversionConfig,
        deadline: tokio::time::Instant,
        total_start: Instant,
        ingest_duration_ms: u64,
    ) -> Result<ConversionResult, HandTexError> {
        // ── Detect + recognise under the worker pool and the deadline ────
        let (regions, outcomes, detect_duration_ms, recognize_duration_ms) =
            run_before(deadline, total_start, async {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| HandTexError::Internal("worker pool closed".to_string()))?;

                let detect_start = Instant::now();
                let detector = Arc::clone(&self.detector);
                let detector_config = config.detector.clone();
                let detect_image = Arc::clone(&image);
                let regions = tokio::task::spawn_blocking(move || {
                    let candidates = detector.detect(&detect_image, &detector_config);
                    finalize_regions(candidates, &detector_config)
                })
                .await
                .map_err(|e| HandTexError::Internal(format!("detection task failed: {e}")))?;
                let detect_duration_ms = detect_start.elapsed().as_millis() as u64;
                info!(
                    regions = regions.len(),
                    duration_ms = detect_duration_ms,
                    "Regions detected"
                );

                if let Some(ref cb) = config.progress_callback {
                    cb.on_conversion_start(regions.len());
                }

                let recognize_start = Instant::now();
                let outcomes = self.recognize_regions(&image, &regions, config).await;
                Ok((
                    regions,
                    outcomes,
                    detect_duration_ms,
                    recognize_start.elapsed().as_millis() as u64,
                ))
            })
            .await?;

        // ── Compose + synthesise inline ──────────────────────────────────
        let compose_start = Instant::now();
        let mut roots = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            roots.push(match &outcome.result {
                Ok(glyphs) => compose_region(glyphs, &config.composer),
                Err(e) => {
                    warn!("{e}; region left unresolved");
                    ExpressionNode::unresolved(outcome.region.index)
                }
            });
        }
        let tree = ExpressionTree::new(roots);
        let formulas = synthesize_roots(&tree)?;
        let compose_duration_ms = compose_start.elapsed().as_millis() as u64;

        let region_results: Vec<RegionResult> = outcomes
            .into_iter()
            .zip(&tree.roots)
            .map(|(outcome, root)| RegionResult {
                region: outcome.region,
                root: root.id,
                glyphs: outcome.result.as_ref().map(Vec::len).unwrap_or(0),
                error: outcome.result.err(),
                duration_ms: outcome.duration_ms,
            })
            .collect();

        let failed = region_results.iter().filter(|r| r.error.is_some()).count();
        let stats = ConversionStats {
            total_regions: regions.len(),
            recognized_regions: regions.len() - failed,
            failed_regions: failed,
            total_glyphs: region_results.iter().map(|r| r.glyphs).sum(),
            ingest_duration_ms,
            detect_duration_ms,
            recognize_duration_ms,
            compose_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "Conversion complete: {}/{} regions, {} glyphs, {}ms total",
            stats.recognized_regions, stats.total_regions, stats.total_glyphs, stats.total_duration_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_conversion_complete(stats.total_regions, stats.recognized_regions);
        }

        Ok(ConversionResult {
            id: Uuid::new_v4(),
            latex: formulas.join("\n"),
            formulas,
            confidence: tree.confidence_map(),
            tree: Arc::new(tree),
            regions: region_results,
            stats,
        })
    }

    /// Recognise every region concurrently, each under its own budget.
    /// Outcomes come back in reading order.
    async fn recognize_regions(
        &self,
        image: &Arc<Image>,
        regions: &[Region],
        config: &ConversionConfig,
    ) -> Vec<RegionOutcome> {
        let total = regions.len();
        let budget_ms = config.region_timeout_ms;

        let mut outcomes: Vec<RegionOutcome> = stream::iter(regions.iter().copied().map(|region| {
            let image = Arc::clone(image);
            let recognizer = Arc::clone(&self.recognizer);
            let recognizer_config = config.recognizer.clone();
            let cb = config.progress_callback.clone();
            async move {
                if let Some(ref cb) = cb {
                    cb.on_region_start(region.index, total);
                }
                let started = Instant::now();
                let budget = Budget::new(Duration::from_millis(budget_ms));
                let task = tokio::task::spawn_blocking(move || {
                    recognizer.recognize(&image, &region, &recognizer_config, &budget)
                });
                let result = match tokio::time::timeout(Duration::from_millis(budget_ms), task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(RegionError::RecognitionFailed {
                        region: region.index,
                        detail: e.to_string(),
                    }),
                    Err(_) => Err(RegionError::RecognitionTimeout {
                        region: region.index,
                        budget_ms,
                    }),
                };
                let duration_ms = started.elapsed().as_millis() as u64;

                match &result {
                    Ok(glyphs) => {
                        debug!(region = region.index, glyphs = glyphs.len(), duration_ms, "Region done");
                        if let Some(ref cb) = cb {
                            cb.on_region_complete(region.index, total, glyphs.len());
                        }
                    }
                    Err(e) => {
                        if let Some(ref cb) = cb {
                            cb.on_region_error(region.index, total, &e.to_string());
                        }
                    }
                }
                RegionOutcome {
                    region,
                    result,
                    duration_ms,
                }
            }
        }))
        .buffer_unordered(config.region_concurrency.max(1))
        .collect()
        .await;

        outcomes.sort_by_key(|o| o.region.index);
        outcomes
    }
}

struct RegionOutcome {
    region: Region,
    result: Result<Vec<Glyph>, RegionError>,
    duration_ms: u64,
}

fn deadline_after(ms: u64) -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_millis(ms)
}

/// Run `fut` to completion unless `deadline` passes first.
async fn run_before<T>(
    deadline: tokio::time::Instant,
    started: Instant,
    fut: impl std::future::Future<Output = Result<T, HandTexError>>,
) -> Result<T, HandTexError> {
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            warn!(elapsed_ms, "Request deadline expired; discarding partial work");
            Err(HandTexError::Timeout { elapsed_ms })
        }
    }
}

// ── Free functions ───────────────────────────────────────────────────────

/// Convert an image file or URL to LaTeX.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`: Local file path or HTTP/HTTPS URL to a JPEG, PNG or WebP image
/// * `config`: Conversion configuration
///
/// # Returns
/// `Ok(ConversionResult)` on success, even if some regions failed
/// (check `result.stats.failed_regions`).
///
/// # Errors
/// Returns `Err(HandTexError)` only for fatal errors: missing file, failed
/// download, unsupported or undecodable image, or an expired deadline.
pub async fn convert(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionResult, HandTexError> {
    Converter::new(config.clone()).convert(input.as_ref()).await
}

/// Convert image bytes already in memory.
///
/// # Example
/// ```rust,no_run
/// use handtex::{convert_bytes, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("equation.png")?;
/// let result = convert_bytes(&bytes, "image/png", &ConversionConfig::default()).await?;
/// println!("{}", result.latex);
/// # Ok(())
/// # }
/// ```
pub async fn convert_bytes(
    bytes: &[u8],
    mime: &str,
    config: &ConversionConfig,
) -> Result<ConversionResult, HandTexError> {
    Converter::new(config.clone())
        .convert_bytes(bytes.to_vec(), mime)
        .await
}

/// Convert an image and write the formatted LaTeX to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, HandTexError> {
    let result = convert(input, config).await?;
    let text = result.formatted(&config.output);
    write_atomic(output_path.as_ref(), &text).await?;
    Ok(result.stats)
}

/// Write `contents` to a temp file beside `path` and rename it into place.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), HandTexError> {
    let path = path.to_path_buf();
    let contents = contents.to_string();
    tokio::task::spawn_blocking(move || {
        let write_failed = |e: std::io::Error| HandTexError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        };
        let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(write_failed)?;
                parent.to_path_buf()
            }
            None => std::path::PathBuf::from("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_failed)?;
        tmp.write_all(contents.as_bytes()).map_err(write_failed)?;
        tmp.persist(&path).map_err(|e| write_failed(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| HandTexError::Internal(format!("write task failed: {e}")))?
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionResult, HandTexError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| HandTexError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::geometry::BBox;
    use image::{GrayImage, Luma};

    struct FixedDetector(Vec<Region>);

    impl RegionDetector for FixedDetector {
        fn detect(&self, _image: &Image, _config: &DetectorConfig) -> Vec<Region> {
            self.0.clone()
        }
    }

    struct SlowRecognizer(Duration);

    impl SymbolRecognizer for SlowRecognizer {
        fn recognize(
            &self,
            _image: &Image,
            _region: &Region,
            _config: &crate::config::RecognizerConfig,
            _budget: &Budget,
        ) -> Result<Vec<Glyph>, RegionError> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    fn blank() -> Image {
        Image::from_luma(GrayImage::from_pixel(32, 32, Luma([255])))
    }

    #[tokio::test]
    async fn blank_image_yields_empty_document() {
        let config = ConversionConfig::default();
        let result = Converter::new(config.clone())
            .convert_image(blank(), &config)
            .await
            .unwrap();
        assert_eq!(result.latex, "");
        assert!(result.tree.roots.is_empty());
        assert_eq!(result.stats.total_regions, 0);
    }

    #[tokio::test]
    async fn region_without_glyphs_is_empty_formula() {
        let config = ConversionConfig::default();
        let region = Region::new(BBox::new(0.0, 0.0, 16.0, 16.0), 0.9);
        let result = Converter::new(config.clone())
            .with_detector(FixedDetector(vec![region]))
            .convert_image(blank(), &config)
            .await
            .unwrap();
        assert_eq!(result.formulas, vec![String::new()]);
        assert!(result.tree.roots[0].is_empty_sequence());
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn slow_region_degrades_to_unresolved() {
        let config = ConversionConfig::builder()
            .region_timeout_ms(20)
            .build()
            .unwrap();
        let region = Region::new(BBox::new(0.0, 0.0, 16.0, 16.0), 0.9);
        let result = Converter::new(config.clone())
            .with_detector(FixedDetector(vec![region]))
            .with_recognizer(SlowRecognizer(Duration::from_millis(300)))
            .convert_image(blank(), &config)
            .await
            .unwrap();
        assert_eq!(result.latex, "\\text{[unresolved]}");
        assert!(matches!(
            result.regions[0].error,
            Some(RegionError::RecognitionTimeout { region: 0, budget_ms: 20 })
        ));
        assert_eq!(result.stats.failed_regions, 1);
    }

    #[tokio::test]
    async fn expired_request_deadline_is_timeout() {
        let config = ConversionConfig::builder()
            .request_timeout_ms(20)
            .region_timeout_ms(5_000)
            .build()
            .unwrap();
        let region = Region::new(BBox::new(0.0, 0.0, 16.0, 16.0), 0.9);
        let err = Converter::new(config.clone())
            .with_detector(FixedDetector(vec![region]))
            .with_recognizer(SlowRecognizer(Duration::from_millis(300)))
            .convert_image(blank(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, HandTexError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn atomic_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/eq.tex");
        write_atomic(&path, "x^{2}").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x^{2}");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
