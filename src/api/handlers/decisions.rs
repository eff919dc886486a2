use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::ingestion::pipeline::parse_full_decision;
use crate::models::FullDecision;
use crate::AppState;

use super::ApiResponse;

#[derive(Deserialize)]
pub struct ParseDecisionRequest {
    pub raw_response: String,
    pub account_equity: f64,
    pub btc_eth_leverage: Option<i64>,
    pub altcoin_leverage: Option<i64>,
}

/// POST /api/decisions: parse and validate one raw model response.
///
/// A rejected response still carries the recovered chain of thought and
/// decisions so the caller can keep them for audit.
pub async fn parse(
    State(state): State<AppState>,
    Json(body): Json<ParseDecisionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<FullDecision>>), AppError> {
    if !body.account_equity.is_finite() || body.account_equity <= 0.0 {
        return Err(AppError::BadRequest(format!(
            "account_equity must be positive, got {}",
            body.account_equity
        )));
    }

    for (name, ceiling) in [
        ("btc_eth_leverage", body.btc_eth_leverage),
        ("altcoin_leverage", body.altcoin_leverage),
    ] {
        if let Some(c) = ceiling.filter(|&c| c < 1) {
            return Err(AppError::BadRequest(format!("{name} must be at least 1, got {c}")));
        }
    }

    let ctx = state.validation_context(
        body.account_equity,
        body.btc_eth_leverage,
        body.altcoin_leverage,
    );

    match parse_full_decision(&body.raw_response, &ctx) {
        Ok(full) => Ok((StatusCode::OK, Json(ApiResponse::ok(full)))),
        Err(failure) => {
            tracing::warn!(
                error = %failure.error,
                decisions = failure.partial.decisions.len(),
                "Model response rejected"
            );
            let failure = *failure;
            Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiResponse {
                    success: false,
                    data: Some(failure.partial),
                    error: Some(failure.error.to_string()),
                }),
            ))
        }
    }
}
