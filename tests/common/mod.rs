use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use serde_json::Value;

use llmtrader::api::router::create_router;
use llmtrader::config::AppConfig;
use llmtrader::db::{MemoryPositionStore, PositionStore};
use llmtrader::AppState;

/// Build the router over a fresh in-memory ledger.
#[allow(dead_code)]
pub fn build_test_app() -> (axum::Router, Arc<MemoryPositionStore>) {
    build_test_app_with(AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        btc_eth_max_leverage: 10,
        altcoin_max_leverage: 5,
        ..AppConfig::default()
    })
}

#[allow(dead_code)]
pub fn build_test_app_with(config: AppConfig) -> (axum::Router, Arc<MemoryPositionStore>) {
    let store = Arc::new(MemoryPositionStore::new());
    let metrics_handle = llmtrader::metrics::init_metrics();

    let state = AppState::new(store.clone() as Arc<dyn PositionStore>, config, metrics_handle);
    (create_router(state), store)
}

#[allow(dead_code)]
pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[allow(dead_code)]
pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[allow(dead_code)]
pub async fn read_json(resp: Response<Body>) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// A fill payload in the shape the exchange layer posts.
#[allow(dead_code)]
pub fn fill_json(action: &str, side: &str, quantity: &str, price: &str, realized_pnl: &str) -> Value {
    serde_json::json!({
        "trader_id": "trader-7",
        "exchange_id": "binance-main",
        "exchange_type": "binance",
        "symbol": "ETHUSDT",
        "side": side,
        "action": action,
        "quantity": quantity,
        "price": price,
        "fee": "0.25",
        "realized_pnl": realized_pnl,
        "trade_time": chrono::Utc::now(),
        "order_id": uuid::Uuid::new_v4().to_string(),
    })
}
