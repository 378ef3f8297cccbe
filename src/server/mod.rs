//! HTTP service: conversions and correction sessions over JSON.
//!
//! | Method | Path | |
//! |--------|------|---|
//! | `POST` | `/conversions` | convert a base64 image, store the result |
//! | `GET`  | `/conversions/{id}` | fetch a stored result |
//! | `POST` | `/conversions/{id}/sessions` | open a correction session |
//! | `GET`  | `/sessions/{id}` | snapshot, LaTeX and state |
//! | `POST` | `/sessions/{id}/edits` | apply a batch of edits |
//! | `POST` | `/sessions/{id}/undo` | revert the last batch |
//! | `POST` | `/sessions/{id}/commit` | finalise |
//! | `GET`  | `/health` | liveness |
//!
//! Results and sessions live in [`TtlStore`]s; both answer `404` once expired.
//! Each session sits behind its own mutex, so edits to one session are
//! serialised while different sessions proceed independently.

mod handlers;
mod types;

pub use handlers::*;
pub use types::*;

use crate::config::ConversionConfig;
use crate::convert::Converter;
use crate::error::HandTexError;
use crate::output::ConversionResult;
use crate::session::CorrectionSession;
use crate::store::{parse_ttl, TtlStore};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Default retention of stored conversions.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default lifetime of an open correction session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub converter: Arc<Converter>,
    pub results: TtlStore<Arc<ConversionResult>>,
    pub sessions: TtlStore<Arc<Mutex<CorrectionSession>>>,
}

impl AppState {
    pub fn new(
        config: ConversionConfig,
        result_ttl: Option<Duration>,
        session_ttl: Option<Duration>,
    ) -> Self {
        Self {
            converter: Arc::new(Converter::new(config)),
            results: TtlStore::new("conversion", result_ttl),
            sessions: TtlStore::new("session", session_ttl),
        }
    }
}

/// Listener address and retention, usually read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub addr: String,
    pub result_ttl: Option<Duration>,
    pub session_ttl: Option<Duration>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            result_ttl: Some(DEFAULT_RESULT_TTL),
            session_ttl: Some(DEFAULT_SESSION_TTL),
        }
    }
}

impl ServerSettings {
    /// Read `HANDTEX_ADDR`, `HANDTEX_RESULT_TTL_SECS` and
    /// `HANDTEX_SESSION_TTL_SECS`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, HandTexError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HandTexError> {
        let mut settings = Self::default();
        if let Some(addr) = lookup("HANDTEX_ADDR") {
            settings.addr = addr;
        }
        if let Some(ttl) = lookup("HANDTEX_RESULT_TTL_SECS") {
            settings.result_ttl = parse_ttl(&ttl)?;
        }
        if let Some(ttl) = lookup("HANDTEX_SESSION_TTL_SECS") {
            settings.session_ttl = parse_ttl(&ttl)?;
        }
        Ok(settings)
    }
}

/// Largest request body accepted for `config`.
pub(crate) fn body_limit(config: &ConversionConfig) -> usize {
    // Base64 inflates uploads by a third; leave headroom for the JSON around it.
    (config.ingest.max_bytes as usize).saturating_mul(4) / 3 + 64 * 1024
}

/// Build the router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    let body_limit = body_limit(state.converter.config());

    Router::new()
        .route("/health", get(health_check))
        .route("/conversions", post(create_conversion))
        .route("/conversions/{id}", get(get_conversion))
        .route("/conversions/{id}/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/edits", post(apply_edits))
        .route("/sessions/{id}/undo", post(undo_edits))
        .route("/sessions/{id}/commit", post(commit_session))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already-bound listener, purging expired entries in the
/// background.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> std::io::Result<()> {
    let purge_every = Duration::from_secs(60);
    let purgers = [
        state.results.spawn_purger(purge_every),
        state.sessions.spawn_purger(purge_every),
    ];

    let app = build_router(state);
    let served = axum::serve(listener, app).await;
    for handle in purgers.into_iter().flatten() {
        handle.abort();
    }
    served
}

/// Bind `addr` and serve.
pub async fn start_server(addr: &str, state: AppState) -> std::io::Result<()> {
    tracing::info!("Starting handtex server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn settings_default_when_unset() {
        let settings = ServerSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, ServerSettings::default());
    }

    #[test]
    fn settings_from_environment() {
        let settings = ServerSettings::from_lookup(lookup(&[
            ("HANDTEX_ADDR", "127.0.0.1:9000"),
            ("HANDTEX_RESULT_TTL_SECS", "never"),
            ("HANDTEX_SESSION_TTL_SECS", "120"),
        ]))
        .unwrap();
        assert_eq!(settings.addr, "127.0.0.1:9000");
        assert_eq!(settings.result_ttl, None);
        assert_eq!(settings.session_ttl, Some(Duration::from_secs(120)));

        assert!(ServerSettings::from_lookup(lookup(&[("HANDTEX_SESSION_TTL_SECS", "soon")])).is_err());
    }

    #[tokio::test]
    async fn state_starts_empty() {
        let state = AppState::new(ConversionConfig::default(), None, None);
        assert!(state.results.is_empty().await);
        assert!(state.sessions.is_empty().await);
    }
}
