//! HTTP server binary for handtex.

use anyhow::{Context, Result};
use handtex::server::{start_server, AppState, ServerSettings};
use handtex::ConversionConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "handtex=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ServerSettings::from_env().context("Invalid server settings")?;
    tracing::info!(
        result_ttl = ?settings.result_ttl,
        session_ttl = ?settings.session_ttl,
        "Starting handtex server"
    );

    let state = AppState::new(
        ConversionConfig::default(),
        settings.result_ttl,
        settings.session_ttl,
    );
    start_server(&settings.addr, state)
        .await
        .with_context(|| format!("Server on {} failed", settings.addr))?;

    Ok(())
}
