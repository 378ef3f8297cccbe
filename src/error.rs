//! Error types for the handtex library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`HandTexError`]: **Fatal**: the request cannot produce a result at all
//!   (unsupported or undecodable image, request deadline exceeded, an edit
//!   against a closed session). Returned as `Err(HandTexError)` from the
//!   top-level `convert*` functions and from [`crate::session::CorrectionSession`].
//!
//! * [`RegionError`]: **Non-fatal**: recognition of one region failed or ran
//!   out of budget, but every other region is fine. Stored on
//!   [`crate::output::RegionResult`] while the region itself degrades to an
//!   `Unresolved` node, so one smudge never costs the whole page.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the handtex library.
///
/// Region-level failures use [`RegionError`] and are stored on
/// [`crate::output::RegionResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum HandTexError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Declared MIME type is not one of JPEG, PNG, HEIC/HEIF or WebP.
    #[error("Unsupported image format '{mime}'\nSupported: image/jpeg, image/png, image/heic, image/webp.")]
    UnsupportedFormat { mime: String },

    /// Input exceeds the configured byte or pixel limit.
    #[error("Image too large: {actual} {unit} exceeds the limit of {limit} {unit}")]
    ImageTooLarge {
        actual: u64,
        limit: u64,
        unit: &'static str,
    },

    /// Bytes could not be decoded as an image.
    #[error("Could not decode image: {detail}")]
    DecodeError { detail: String },

    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The whole-request deadline expired before composition began.
    #[error("Conversion timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The expression tree broke a structural rule the synthesiser relies on.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ── Session errors ────────────────────────────────────────────────────
    /// An edit could not be applied; the session snapshot is unchanged.
    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    /// The session was committed; no further edits or undo are accepted.
    #[error("Session is closed: it has already been committed")]
    SessionClosed,

    /// Unknown or expired conversion/session id.
    #[error("{kind} '{id}' not found (unknown or expired)")]
    NotFound { kind: &'static str, id: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output LaTeX file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandTexError {
    /// Whether repeating the same request could succeed.
    ///
    /// Only the whole-request deadline and network failures are transient;
    /// input, edit and invariant errors fail identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HandTexError::Timeout { .. } | HandTexError::DownloadFailed { .. }
        )
    }
}

/// A non-fatal error for a single region.
///
/// The region is rendered as an `Unresolved` placeholder; the rest of the
/// document still converts.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionError {
    /// Recognition exceeded the per-region budget.
    #[error("Region {region}: recognition timed out after {budget_ms}ms")]
    RecognitionTimeout { region: usize, budget_ms: u64 },

    /// The recogniser reported a failure.
    #[error("Region {region}: recognition failed: {detail}")]
    RecognitionFailed { region: usize, detail: String },
}

impl RegionError {
    /// A timed-out region may well succeed with a larger budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegionError::RecognitionTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_display() {
        let e = HandTexError::ImageTooLarge {
            actual: 30_000_000,
            limit: 20_971_520,
            unit: "bytes",
        };
        let msg = e.to_string();
        assert!(msg.contains("30000000 bytes"), "got: {msg}");
        assert!(msg.contains("20971520"), "got: {msg}");
    }

    #[test]
    fn not_found_display() {
        let e = HandTexError::NotFound {
            kind: "session",
            id: "abc".into(),
        };
        assert_eq!(e.to_string(), "session 'abc' not found (unknown or expired)");
    }

    #[test]
    fn retry_policy() {
        assert!(HandTexError::Timeout { elapsed_ms: 10 }.is_retryable());
        assert!(!HandTexError::SessionClosed.is_retryable());
        assert!(!HandTexError::DecodeError { detail: "x".into() }.is_retryable());
        assert!(!HandTexError::InvalidEdit("bad".into()).is_retryable());
        assert!(RegionError::RecognitionTimeout {
            region: 0,
            budget_ms: 5
        }
        .is_retryable());
        assert!(!RegionError::RecognitionFailed {
            region: 0,
            detail: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn region_error_serialises_with_kind() {
        let e = RegionError::RecognitionTimeout {
            region: 2,
            budget_ms: 100,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "recognition_timeout");
        assert_eq!(json["region"], 2);
    }
}
