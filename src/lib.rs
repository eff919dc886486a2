pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod ingestion;
pub mod metrics;
pub mod models;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::PositionStore;
use crate::execution::reconciler::PositionReconciler;
use crate::execution::validator::ValidationContext;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PositionStore>,
    pub reconciler: PositionReconciler,
    pub config: AppConfig,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PositionStore>,
        config: AppConfig,
        metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    ) -> Self {
        Self {
            reconciler: PositionReconciler::new(store.clone()),
            store,
            config,
            metrics_handle,
        }
    }

    /// Validation limits for one request, with the configured leverage ceilings
    /// unless the caller supplies its own.
    pub fn validation_context(
        &self,
        account_equity: f64,
        btc_eth_leverage: Option<i64>,
        altcoin_leverage: Option<i64>,
    ) -> ValidationContext {
        ValidationContext::new(
            account_equity,
            btc_eth_leverage.unwrap_or(self.config.btc_eth_max_leverage),
            altcoin_leverage.unwrap_or(self.config.altcoin_max_leverage),
        )
        .with_min_risk_reward(self.config.min_risk_reward)
    }
}
