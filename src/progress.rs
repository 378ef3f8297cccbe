//! Per-region progress events.
//!
//! Set a [`ProgressCallback`] with
//! [`crate::config::ConversionConfigBuilder::progress_callback`]. Region
//! events arrive from the blocking threads that run recognition, in
//! completion order rather than reading order.
//!
//! ```rust
//! use handtex::{ConversionConfig, ConversionProgressCallback};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Glyphs(AtomicUsize);
//!
//! impl ConversionProgressCallback for Glyphs {
//!     fn on_region_complete(&self, _region: usize, _total: usize, glyphs: usize) {
//!         self.0.fetch_add(glyphs, Ordering::Relaxed);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(Glyphs::default()))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Observer of one conversion. Every method defaults to doing nothing.
///
/// Region numbers are 0-based positions in reading order; `total` is the
/// region count announced by `on_conversion_start`.
pub trait ConversionProgressCallback: Send + Sync {
    /// Detection finished with `total` regions to recognise.
    fn on_conversion_start(&self, total: usize) {
        let _ = total;
    }

    fn on_region_start(&self, region: usize, total: usize) {
        let _ = (region, total);
    }

    /// `glyphs` is the number of glyph positions found in the region.
    fn on_region_complete(&self, region: usize, total: usize, glyphs: usize) {
        let _ = (region, total, glyphs);
    }

    /// The region became an unresolved placeholder because of `error`.
    fn on_region_error(&self, region: usize, total: usize, error: &str) {
        let _ = (region, total, error);
    }

    /// All regions attempted; `recognized` of them without error.
    fn on_conversion_complete(&self, total: usize, recognized: usize) {
        let _ = (total, recognized);
    }
}

pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Shared callback as stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
