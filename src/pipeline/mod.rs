//! Pipeline stages for image-to-LaTeX conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a trained recogniser instead of templates)
//! without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ingest ──▶ detect ──▶ recognize ──▶ compose ──▶ latex ──▶ postprocess
//! (URL/path) (decode)  (regions)   (glyphs)      (tree)     (string)  (presentation)
//! ```
//!
//! 1. [`input`] : read the user-supplied path or download the URL
//! 2. [`ingest`]: validate size and container, decode, apply EXIF
//!    orientation, normalise to 8-bit luma
//! 3. [`detect`]: propose formula regions; the shared post-processing
//!    (confidence filter, IoU merge, cap, reading order) applies to every
//!    detector
//! 4. [`recognize`]: per-region glyph hypotheses under a time budget; the
//!    only stage that may be slow, run on blocking threads
//! 5. [`compose`]: layout heuristics turn glyphs into an expression tree
//! 6. [`postprocess`]: math-mode wrapping and standalone documents
//!
//! [`components`] and [`templates`] are the shared building blocks of the
//! default detector and recogniser.

pub mod components;
pub mod compose;
pub mod detect;
pub mod ingest;
pub mod input;
pub mod postprocess;
pub mod recognize;
pub mod templates;
