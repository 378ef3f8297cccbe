//! # handtex
//!
//! Convert photos and scans of handwritten mathematics to LaTeX, then
//! correct the result interactively.
//!
//! ## Why this crate?
//!
//! Recognising a formula is only half the job: the layout is what makes
//! `x^2` differ from `x_2` and `\frac{a}{b}` differ from `a - b`. This crate
//! keeps the two concerns apart. Pluggable recognisers turn ink into symbol
//! hypotheses, and a deterministic layout pass turns symbols into an
//! expression tree. The tree (not a string) is then what people correct, so
//! an edit can never produce unbalanced braces.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Image bytes
//!  │
//!  ├─ 1. Ingest     validate size/format, decode, EXIF orientation, 8-bit luma
//!  ├─ 2. Detect     ink components → formula regions (IoU merge, reading order)
//!  ├─ 3. Recognise  per-region glyph hypotheses (concurrent, time-budgeted)
//!  ├─ 4. Compose    matrices, fractions, radicals, big operators, scripts
//!  ├─ 5. Synthesise canonical LaTeX, one formula per region
//!  └─ 6. Correct    CorrectionSession: replace, move, delete, confirm, undo
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use handtex::{convert, ConversionConfig, CorrectionEdit, CorrectionSession, EditKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let result = convert("whiteboard.jpg", &config).await?;
//!     println!("{}", result.latex);
//!
//!     let mut session = CorrectionSession::new(&result);
//!     if let Some(&id) = result.low_confidence(0.5).first() {
//!         session.apply(vec![CorrectionEdit::new(id, EditKind::Confirm)])?;
//!     }
//!     println!("{}", session.commit()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `handtex` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `server` | on      | Enables [`server`] and the `handtex-server` binary (axum + tower-http) |
//!
//! Disable both when using only the library:
//! ```toml
//! handtex = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod geometry;
pub mod latex;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod store;
pub mod stream;
pub mod symbols;
pub mod tree;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ComposerConfig, ConversionConfig, ConversionConfigBuilder, DetectorConfig, IngestConfig,
    MathMode, OutputOptions, RecognizerConfig,
};
pub use convert::{convert, convert_bytes, convert_sync, convert_to_file, Converter};
pub use error::{HandTexError, RegionError};
pub use output::{ConversionResult, ConversionStats, RegionResult};
pub use pipeline::detect::{InkRegionDetector, Region, RegionDetector};
pub use pipeline::ingest::Image;
pub use pipeline::recognize::{Budget, Glyph, SymbolHypothesis, SymbolRecognizer, TemplateRecognizer};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{
    AppliedBatch, CorrectionEdit, CorrectionSession, EditKind, SessionState, SessionView, Snapshot,
};
pub use stream::{convert_stream, ResultStream};
pub use symbols::{BigOperatorKind, Symbol};
pub use tree::{ExpressionNode, ExpressionTree, MatrixDelimiter, NodeId, NodeKind};
