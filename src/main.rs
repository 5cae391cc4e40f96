use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use ohmage_auth::providers::{self, ProviderRegistry};
use ohmage_auth::store::PgStore;
use ohmage_auth::{api, AppState, Config, SharedState, TokenService};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ohmage_auth=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("ohmage-auth v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.bind_addr());

    let mut registry = ProviderRegistry::new();
    providers::register_defaults(&mut registry, &config)?;
    info!("Registered {} identity providers", registry.count());

    let store = PgStore::new(config.require_database_url()?).await?;
    store.migrate().await?;
    info!("Database connected and migrated ✓");

    let tokens = TokenService::with_store(Arc::new(store), registry, &config)?;

    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        tokens,
    });

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
