//! HTTP request handlers.

use super::types::{
    CommitResponse, ConversionRequest, EditsRequest, ErrorResponse, HealthResponse,
};
use super::{body_limit, AppState};
use crate::error::HandTexError;
use crate::output::ConversionResult;
use crate::session::{CorrectionSession, SessionView};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A library error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub HandTexError);

impl From<HandTexError> for ApiError {
    fn from(e: HandTexError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            HandTexError::UnsupportedFormat { .. } => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
            }
            HandTexError::ImageTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "image_too_large"),
            HandTexError::DecodeError { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "decode_error"),
            HandTexError::InputNotFound { .. } | HandTexError::InvalidInput { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_input")
            }
            HandTexError::DownloadFailed { .. } => (StatusCode::BAD_GATEWAY, "download_failed"),
            HandTexError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            HandTexError::InvalidEdit(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_edit"),
            HandTexError::SessionClosed => (StatusCode::CONFLICT, "session_closed"),
            HandTexError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            HandTexError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "invalid_config"),
            HandTexError::InvariantViolation(_)
            | HandTexError::OutputWriteFailed { .. }
            | HandTexError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
            "internal error".to_string()
        } else {
            warn!("Request rejected: {}", self.0);
            self.0.to_string()
        };
        let body = ErrorResponse {
            error: kind.to_string(),
            message,
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Turn a body that failed to arrive as JSON into a library error.
/// Oversized bodies become `ImageTooLarge`; anything else goes to `malformed`.
fn rejected_body(
    rejection: JsonRejection,
    headers: &HeaderMap,
    limit: usize,
    malformed: impl FnOnce(String) -> HandTexError,
) -> HandTexError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let limit = limit as u64;
        // Chunked uploads carry no length; all we know is that they overflowed.
        let actual = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(limit + 1);
        return HandTexError::ImageTooLarge {
            actual,
            limit,
            unit: "bytes",
        };
    }
    malformed(rejection.body_text())
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Convert an uploaded image and store the result.
pub async fn create_conversion(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ConversionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload.map_err(|rejection| {
        rejected_body(rejection, &headers, body_limit(state.converter.config()), |detail| {
            HandTexError::DecodeError {
                detail: format!("request body: {detail}"),
            }
        })
    })?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(request.image_base64.trim())
        .map_err(|e| HandTexError::DecodeError {
            detail: format!("image_base64 is not valid base64: {e}"),
        })?;

    let mut builder = state.converter.config().to_builder();
    if let Some(overrides) = &request.config {
        if let Some(n) = overrides.max_regions {
            builder = builder.max_regions(n);
        }
        if let Some(c) = overrides.confidence_threshold {
            builder = builder.min_confidence(c);
        }
    }
    let config = builder.build()?;

    let result = state
        .converter
        .convert_bytes_with(bytes, &request.mime_type, &config)
        .await?;
    info!(
        conversion = %result.id,
        regions = result.stats.total_regions,
        "Conversion stored"
    );

    let result = Arc::new(result);
    state.results.insert(result.id, Arc::clone(&result)).await;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn get_conversion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Arc<ConversionResult>>> {
    Ok(Json(state.results.get(id).await?))
}

/// Open a correction session over a stored conversion.
pub async fn create_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let result = state.results.get(id).await?;
    let session = CorrectionSession::new(&result);
    let view = session.view();
    state
        .sessions
        .insert(session.id(), Arc::new(Mutex::new(session)))
        .await;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    let session = state.sessions.get(id).await?;
    let view = session.lock().await.view();
    Ok(Json(view))
}

/// Apply one batch of edits, all or nothing.
pub async fn apply_edits(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<EditsRequest>, JsonRejection>,
) -> ApiResult<Json<SessionView>> {
    let Json(request) = payload.map_err(|rejection| {
        rejected_body(rejection, &headers, body_limit(state.converter.config()), |detail| {
            HandTexError::InvalidEdit(format!("malformed edit payload: {detail}"))
        })
    })?;
    let session = state.sessions.get(id).await?;
    let mut session = session.lock().await;
    session.apply(request.edits)?;
    Ok(Json(session.view()))
}

pub async fn undo_edits(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    let session = state.sessions.get(id).await?;
    let mut session = session.lock().await;
    session.undo()?;
    Ok(Json(session.view()))
}

pub async fn commit_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CommitResponse>> {
    let session = state.sessions.get(id).await?;
    let latex = session.lock().await.commit()?;
    Ok(Json(CommitResponse {
        session_id: id,
        latex,
    }))
}
