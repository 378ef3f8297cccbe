//! End-to-end integration tests for handtex.
//!
//! Images are drawn from the built-in glyph art at integer scale, so every
//! test is deterministic and needs neither fixtures nor network access.

mod common;

use common::{a_over_b, bar, blank, draw_glyph, png_bytes, two_formulas};
use handtex::{
    convert, convert_bytes, convert_sync, convert_to_file, ConversionConfig,
    ConversionProgressCallback, CorrectionEdit, CorrectionSession, EditKind, ExpressionNode,
    HandTexError, MathMode, NodeKind, Symbol,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn leaf(name: &str) -> ExpressionNode {
    ExpressionNode::leaf(Symbol::from_name(name).unwrap(), 1.0)
}

fn png_file(dir: &tempfile::TempDir, name: &str, img: &image::GrayImage) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, png_bytes(img)).unwrap();
    path.to_string_lossy().into_owned()
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn a_over_b_becomes_a_fraction() {
    let result = convert_bytes(&png_bytes(&a_over_b()), "image/png", &ConversionConfig::default())
        .await
        .unwrap();

    assert_eq!(result.latex, "\\frac{a}{b}");
    assert_eq!(result.tree.roots.len(), 1);
    assert!(result.tree.roots[0].is_isomorphic(&ExpressionNode::fraction(leaf("a"), leaf("b"))));
    assert_eq!(result.stats.total_regions, 1);
    assert_eq!(result.stats.total_glyphs, 3);
    assert!(result.is_complete());
}

#[tokio::test]
async fn blank_page_is_empty_not_an_error() {
    let result = convert_bytes(&png_bytes(&blank(64, 48)), "image/png", &ConversionConfig::default())
        .await
        .unwrap();
    assert_eq!(result.latex, "");
    assert!(result.regions.is_empty());
}

#[tokio::test]
async fn separate_formulas_come_out_in_reading_order() {
    let result = convert_bytes(
        &png_bytes(&two_formulas()),
        "image/png",
        &ConversionConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(result.formulas, vec!["x".to_string(), "2".to_string()]);
    assert_eq!(result.latex, "x\n2");
    assert!(result.regions[0].region.y() < result.regions[1].region.y());
    assert_eq!(result.regions[1].region.index, 1);
}

#[tokio::test]
async fn max_regions_keeps_the_most_confident() {
    let config = ConversionConfig::builder().max_regions(1).build().unwrap();
    let result = convert_bytes(&png_bytes(&two_formulas()), "image/png", &config)
        .await
        .unwrap();
    // `2` carries more ink than `x`, so its region scores higher.
    assert_eq!(result.formulas, vec!["2".to_string()]);
}

#[tokio::test]
async fn node_ids_are_unique_across_regions() {
    let result = convert_bytes(
        &png_bytes(&two_formulas()),
        "image/png",
        &ConversionConfig::default(),
    )
    .await
    .unwrap();
    let ids: Vec<_> = result.confidence.keys().copied().collect();
    assert_eq!(ids.len(), result.tree.node_count());
    assert_eq!(result.regions[0].root, result.tree.roots[0].id);
    assert_eq!(result.regions[1].root, result.tree.roots[1].id);
}

#[tokio::test]
async fn conversion_is_deterministic() {
    let bytes = png_bytes(&a_over_b());
    let config = ConversionConfig::default();
    let first = convert_bytes(&bytes, "image/png", &config).await.unwrap();
    let second = convert_bytes(&bytes, "image/png", &config).await.unwrap();
    assert_eq!(first.latex, second.latex);
    assert_eq!(*first.tree, *second.tree);
    assert_eq!(first.confidence, second.confidence);
}

#[tokio::test]
async fn minus_stays_a_minus_without_content_below() {
    let mut img = blank(70, 40);
    draw_glyph(&mut img, "x", 5, 10, 3);
    bar(&mut img, 26, 16, 15, 3);
    draw_glyph(&mut img, "y", 48, 10, 3);
    let result = convert_bytes(&png_bytes(&img), "image/png", &ConversionConfig::default())
        .await
        .unwrap();
    assert_eq!(result.latex, "x-y");
}

// ── Input handling ───────────────────────────────────────────────────────────

#[tokio::test]
async fn converts_local_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = png_file(&dir, "fraction.png", &a_over_b());
    let result = convert(&path, &ConversionConfig::default()).await.unwrap();
    assert_eq!(result.latex, "\\frac{a}{b}");
}

#[tokio::test]
async fn missing_file_is_input_not_found() {
    let err = convert("/no/such/dir/eq.png", &ConversionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HandTexError::InputNotFound { .. }));
}

#[tokio::test]
async fn unsupported_declared_type_is_rejected() {
    let err = convert_bytes(b"GIF89a....", "image/gif", &ConversionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HandTexError::UnsupportedFormat { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn undecodable_bytes_are_a_decode_error() {
    let err = convert_bytes(b"not an image at all", "image/png", &ConversionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HandTexError::DecodeError { .. }));
}

#[tokio::test]
async fn oversized_input_is_rejected() {
    let config = ConversionConfig::builder().max_bytes(64).build().unwrap();
    let err = convert_bytes(&png_bytes(&a_over_b()), "image/png", &config)
        .await
        .unwrap_err();
    assert!(matches!(err, HandTexError::ImageTooLarge { unit: "bytes", .. }));

    let config = ConversionConfig::builder().max_dimension(32).build().unwrap();
    let err = convert_bytes(&png_bytes(&a_over_b()), "image/png", &config)
        .await
        .unwrap_err();
    assert!(matches!(err, HandTexError::ImageTooLarge { .. }));
}

#[tokio::test]
async fn mislabelled_container_still_decodes() {
    let result = convert_bytes(&png_bytes(&a_over_b()), "image/jpeg", &ConversionConfig::default())
        .await
        .unwrap();
    assert_eq!(result.latex, "\\frac{a}{b}");
}

// ── Output ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_to_file_writes_a_standalone_document() {
    let dir = tempfile::tempdir().unwrap();
    let input = png_file(&dir, "eq.png", &a_over_b());
    let output = dir.path().join("out").join("eq.tex");
    let config = ConversionConfig::builder()
        .math_mode(MathMode::Display)
        .standalone(true)
        .packages(["amsmath", "mathtools"])
        .build()
        .unwrap();

    let stats = convert_to_file(&input, &output, &config).await.unwrap();
    assert_eq!(stats.total_regions, 1);

    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(
        written,
        "\\documentclass{article}\n\\usepackage{amsmath}\n\\usepackage{mathtools}\n\
         \\begin{document}\n$$\\frac{a}{b}$$\n\\end{document}\n"
    );
}

#[test]
fn convert_sync_runs_without_a_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = png_file(&dir, "eq.png", &a_over_b());
    let result = convert_sync(&path, &ConversionConfig::default()).unwrap();
    assert_eq!(result.latex, "\\frac{a}{b}");
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    finished_with: AtomicUsize,
}

impl ConversionProgressCallback for Counting {
    fn on_conversion_start(&self, total_regions: usize) {
        self.started.store(total_regions, Ordering::SeqCst);
    }

    fn on_region_complete(&self, _region: usize, _total: usize, _glyphs: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_conversion_complete(&self, _total: usize, success_count: usize) {
        self.finished_with.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_region() {
    let counter = Arc::new(Counting::default());
    let config = ConversionConfig::builder()
        .progress_callback(counter.clone())
        .build()
        .unwrap();
    convert_bytes(&png_bytes(&two_formulas()), "image/png", &config)
        .await
        .unwrap();
    assert_eq!(counter.started.load(Ordering::SeqCst), 2);
    assert_eq!(counter.completed.load(Ordering::SeqCst), 2);
    assert_eq!(counter.finished_with.load(Ordering::SeqCst), 2);
}

// ── Correction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn correct_and_commit_a_conversion() {
    let result = convert_bytes(&png_bytes(&a_over_b()), "image/png", &ConversionConfig::default())
        .await
        .unwrap();

    let mut numerator = None;
    result.tree.roots[0].visit(&mut |n| {
        if let NodeKind::Leaf { symbol, .. } = &n.kind {
            if symbol.name() == "a" {
                numerator = Some(n.id);
            }
        }
    });
    let numerator = numerator.unwrap();

    let mut session = CorrectionSession::new(&result);
    let snapshot = session
        .apply(vec![CorrectionEdit::new(
            numerator,
            EditKind::ReplaceSymbol {
                symbol: "\\alpha".to_string(),
            },
        )])
        .unwrap();
    assert_eq!(snapshot.latex, "\\frac{\\alpha}{b}");
    assert_eq!(result.latex, "\\frac{a}{b}");

    assert_eq!(session.commit().unwrap(), "\\frac{\\alpha}{b}");
    let err = session
        .apply(vec![CorrectionEdit::new(numerator, EditKind::Confirm)])
        .unwrap_err();
    assert!(matches!(err, HandTexError::SessionClosed));
}
