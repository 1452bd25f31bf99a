//! HTTP front end for porter model applications.

use anyhow::Result;
use porter::{ModelApp, PorterConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
pub mod contracts;
mod state;

pub use api::build_router;
pub use contracts::attach_contracts;
pub use state::AppState;

/// Header carrying the client supplied request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Install the fmt subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Calling it again is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Bind `config.bind` and serve `app` until the process stops.
pub async fn serve(app: ModelApp, config: &PorterConfig) -> Result<()> {
    let router = build_router(Arc::new(app), config.support_response_gzip)?;

    tracing::info!("Starting server on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
