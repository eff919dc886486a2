use std::sync::Arc;

use llmtrader::api::router::create_router;
use llmtrader::config::AppConfig;
use llmtrader::db::{self, MemoryPositionStore, PgPositionStore, PositionStore};
use llmtrader::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);

    let addr = format!("{}:{}", config.host, config.port);

    let store: Arc<dyn PositionStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            tracing::info!("Database connected, migrations applied");
            Arc::new(PgPositionStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, positions are kept in memory only");
            Arc::new(MemoryPositionStore::new())
        }
    };

    let metrics_handle = llmtrader::metrics::init_metrics();

    tracing::info!(
        btc_eth_max_leverage = config.btc_eth_max_leverage,
        altcoin_max_leverage = config.altcoin_max_leverage,
        min_risk_reward = config.min_risk_reward,
        "Decision limits loaded"
    );

    let state = AppState::new(store, config, metrics_handle);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
