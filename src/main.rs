use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use goletter::api::{self, AppState};
use goletter::config::Config;
use goletter::network::{GeoLocator, Ip2RegionLocator};
use goletter::snowflake::SnowflakeGenerator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize geolocation
    let geo_locator: Option<Arc<dyn GeoLocator>> = match config.geo.ip2region_db_path.as_deref() {
        Some(path) => {
            let locator = Ip2RegionLocator::open(path)
                .with_context(|| format!("Failed to open ip2region database at {}", path))?;
            info!("🌏 Region lookups enabled: {}", path);
            Some(Arc::new(locator))
        }
        None => {
            info!("🌏 IP2REGION_DB_PATH not set - region lookups are disabled");
            None
        }
    };

    // Initialize ID generator
    let snowflake = SnowflakeGenerator::new(config.snowflake)
        .context("Invalid snowflake configuration")?;
    info!(
        "❄️  Snowflake generator ready (data center {}, worker {})",
        config.snowflake.data_center_id, config.snowflake.worker_id
    );

    let state = Arc::new(AppState {
        geo_locator,
        snowflake: Arc::new(snowflake),
    });
    let router = api::create_api_router(state);

    // Start API server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 API server listening on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
