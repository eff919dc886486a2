use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{PositionRecord, TradeFill};
use crate::AppState;

use super::ApiResponse;

#[derive(Serialize)]
pub struct FillResult {
    pub outcome: &'static str,
    pub over_close: bool,
    pub position: Option<PositionRecord>,
}

/// POST /api/fills: fold an executed order into the position ledger
pub async fn record(
    State(state): State<AppState>,
    Json(fill): Json<TradeFill>,
) -> Result<Json<ApiResponse<FillResult>>, AppError> {
    tracing::debug!(%fill, "Fill received");

    let outcome = state.reconciler.process_trade(&fill).await?;
    let over_close = matches!(
        outcome,
        crate::execution::reconciler::ReconcileOutcome::Closed { over_close: true, .. }
    );

    Ok(Json(ApiResponse::ok(FillResult {
        outcome: outcome.as_str(),
        over_close,
        position: outcome.position().cloned(),
    })))
}
