use axum::extract::{Query, State};
use axum::Json;

use crate::errors::AppError;
use crate::models::{PositionFilter, PositionRecord};
use crate::AppState;

use super::ApiResponse;

/// GET /api/positions: ledger records, newest first
pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<PositionFilter>,
) -> Result<Json<ApiResponse<Vec<PositionRecord>>>, AppError> {
    let positions = state.store.list_positions(&filter).await?;
    Ok(Json(ApiResponse::ok(positions)))
}
