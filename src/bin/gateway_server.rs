//! BatVault Gateway HTTP server.
//!
//! ```bash
//! MEMORY_API_BASE=http://localhost:8000 cargo run --bin gateway_server
//!
//! curl -N -X POST http://localhost:8081/v3/query \
//!   -H "Content-Type: application/json" \
//!   -H "Accept: application/x-ndjson" \
//!   -d '{"anchor": "panasonic#exit-plasma-2012"}'
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batvault_gateway::api::create_router;
use batvault_gateway::config::Settings;
use batvault_gateway::state::AppState;
use batvault_gateway::watcher::{spawn_snapshot_watcher, DEFAULT_POLL_INTERVAL};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batvault_gateway=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    let bind = settings.gateway_bind;
    tracing::info!(
        version = %settings.gateway_version,
        memory = %settings.memory_api_base,
        "starting BatVault gateway"
    );

    let state = AppState::build(settings)?;
    spawn_snapshot_watcher(
        state.memory.clone(),
        state.cache.clone(),
        DEFAULT_POLL_INTERVAL,
    );

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}
