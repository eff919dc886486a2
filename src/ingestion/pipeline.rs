use chrono::Utc;
use metrics::{counter, histogram};
use std::time::Instant;
use thiserror::Error;

use crate::execution::validator::{validate_decisions, ValidationContext, ValidationError};
use crate::models::FullDecision;

use super::extractor::{extract_chain_of_thought, extract_decisions, ExtractError};
use super::sanitizer::sanitize;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("failed to extract decisions: {0}")]
    Extract(#[from] ExtractError),

    #[error("decision validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// A rejected response together with whatever was recoverable from it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DecisionFailure {
    pub partial: FullDecision,
    pub error: DecisionError,
}

/// Turn one raw model response into validated decisions:
/// 1. Sanitize invisible characters and full-width punctuation
/// 2. Split off the chain of thought
/// 3. Extract the decision payload (or fall back to a single wait)
/// 4. Validate each decision, clamping leverage, stopping at the first failure
///
/// On failure the partial result (chain of thought plus any decisions parsed)
/// is returned alongside the error so the caller can log it for audit.
pub fn parse_full_decision(
    raw_response: &str,
    ctx: &ValidationContext,
) -> Result<FullDecision, Box<DecisionFailure>> {
    let start = Instant::now();
    let sanitized = sanitize(raw_response);
    let cot_trace = extract_chain_of_thought(&sanitized);

    let mut full = FullDecision {
        cot_trace,
        decisions: Vec::new(),
        raw_response: raw_response.to_string(),
        timestamp: Utc::now(),
    };

    let extraction = match extract_decisions(&sanitized, raw_response) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(
                error = %e,
                snippet = e.snippet(),
                "Model response payload malformed"
            );
            return Err(Box::new(DecisionFailure {
                partial: full,
                error: e.into(),
            }));
        }
    };

    full.decisions = extraction.decisions;

    if let Err(e) = validate_decisions(&mut full.decisions, ctx) {
        return Err(Box::new(DecisionFailure {
            partial: full,
            error: e.into(),
        }));
    }

    counter!("decisions_parsed_total").increment(full.decisions.len() as u64);
    histogram!("decision_parse_seconds").record(start.elapsed().as_secs_f64());

    tracing::info!(
        strategy = extraction.strategy,
        decisions = full.decisions.len(),
        cot_len = full.cot_trace.len(),
        "Model response parsed"
    );

    Ok(full)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
