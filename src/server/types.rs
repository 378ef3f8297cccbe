//! HTTP request and response bodies.

use crate::session::CorrectionEdit;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `POST /conversions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Image bytes, standard base64.
    pub image_base64: String,
    /// Declared type, e.g. `image/png`.
    pub mime_type: String,
    #[serde(default)]
    pub config: Option<RequestConfig>,
}

/// Per-request overrides of the server's detector settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default)]
    pub max_regions: Option<usize>,
    /// Minimum region detection confidence.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
}

/// `POST /sessions/{id}/edits`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditsRequest {
    pub edits: Vec<CorrectionEdit>,
}

/// `POST /sessions/{id}/commit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub session_id: Uuid,
    pub latex: String,
}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable kind, e.g. `invalid_edit`.
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
