//! Recovery of the structured decision list from sanitized model text.
//!
//! Extraction is an ordered list of named strategies, each returning an
//! optional slice of the input, composed with [`first_success`]. When no
//! strategy finds an array of objects the extractor emits a single safe
//! `wait` decision instead of failing, so a prose-only answer defers the
//! trading loop rather than stalling it.

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::models::Decision;

use super::sanitizer::normalize_punctuation;

/// Maximum length (in characters) of the fallback decision's reasoning.
pub const FALLBACK_SUMMARY_MAX_CHARS: usize = 240;

/// Maximum length of payload snippets carried in errors.
const SNIPPET_MAX_CHARS: usize = 512;

static REASONING_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<reasoning>(.*?)</reasoning>").expect("Invalid reasoning tag regex")
});

static DECISION_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<decision>(.*?)</decision>").expect("Invalid decision tag regex")
});

/// A ```json fence whose body is an array of objects.
static JSON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```json\s*(\[\s*\{.*?\}\s*\])\s*```").expect("Invalid JSON fence regex")
});

static ARRAY_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*\{").expect("Invalid array start regex"));

/// Shortest `[{ ... }]` span; used only when bracket matching finds no close.
static LAZY_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[\s*\{.*?\}\s*\]").expect("Invalid lazy array regex"));

static ARRAY_OPEN_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\s+\{").expect("Invalid array open regex"));

static THOUSANDS_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9],[0-9]{3}").expect("Invalid thousands separator regex"));

/// Hard parse failure. Every variant carries the offending payload snippet and
/// the complete raw response for diagnosis.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("decision payload must start with [{{ (got: {snippet})")]
    NotAnArray { snippet: String, raw_response: String },

    #[error("decision payload is an array without objects (got: {snippet})")]
    MissingObjectArray { snippet: String, raw_response: String },

    #[error("decision payload contains a range symbol '~'; prices must be single values (payload: {snippet})")]
    RangeSymbol { snippet: String, raw_response: String },

    #[error("decision payload contains a thousands separator near '{found}' (payload: {snippet})")]
    ThousandsSeparator {
        found: String,
        snippet: String,
        raw_response: String,
    },

    #[error("decision payload is not valid JSON: {source} (payload: {snippet})")]
    Json {
        #[source]
        source: serde_json::Error,
        snippet: String,
        raw_response: String,
    },
}

impl ExtractError {
    pub fn snippet(&self) -> &str {
        match self {
            ExtractError::NotAnArray { snippet, .. }
            | ExtractError::MissingObjectArray { snippet, .. }
            | ExtractError::RangeSymbol { snippet, .. }
            | ExtractError::ThousandsSeparator { snippet, .. }
            | ExtractError::Json { snippet, .. } => snippet,
        }
    }

    pub fn raw_response(&self) -> &str {
        match self {
            ExtractError::NotAnArray { raw_response, .. }
            | ExtractError::MissingObjectArray { raw_response, .. }
            | ExtractError::RangeSymbol { raw_response, .. }
            | ExtractError::ThousandsSeparator { raw_response, .. }
            | ExtractError::Json { raw_response, .. } => raw_response,
        }
    }
}

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub decisions: Vec<Decision>,
    /// Name of the strategy that located the payload, `"fallback"` if none did.
    pub strategy: &'static str,
}

impl Extraction {
    pub fn is_fallback(&self) -> bool {
        self.strategy == FALLBACK_STRATEGY
    }
}

/// A named strategy returning a slice of its input.
pub type Strategy = for<'a> fn(&'a str) -> Option<&'a str>;

pub const FALLBACK_STRATEGY: &str = "fallback";

/// Payload strategies, tried in order within the decision region.
pub const PAYLOAD_STRATEGIES: [(&str, Strategy); 2] = [
    ("fenced_json_block", fenced_json_block),
    ("bracket_scan", bracket_scan),
];

/// Run `strategies` in order and return the first hit with its name.
pub fn first_success<'a>(
    text: &'a str,
    strategies: &[(&'static str, Strategy)],
) -> Option<(&'static str, &'a str)> {
    strategies
        .iter()
        .find_map(|(name, strategy)| strategy(text).map(|hit| (*name, hit)))
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Trimmed contents of `<reasoning>...</reasoning>`.
pub fn reasoning_tag(text: &str) -> Option<&str> {
    REASONING_TAG
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Trimmed contents of `<decision>...</decision>`.
pub fn decision_tag(text: &str) -> Option<&str> {
    DECISION_TAG
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Array of objects inside a ```json fenced block.
pub fn fenced_json_block(text: &str) -> Option<&str> {
    JSON_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// First `[{` anywhere in the text, up to its matching `]`.
pub fn bracket_scan(text: &str) -> Option<&str> {
    let start = ARRAY_START.find(text)?.start();
    match find_matching_bracket(text, start) {
        Some(end) => Some(&text[start..=end]),
        None => LAZY_ARRAY.find(&text[start..]).map(|m| m.as_str()),
    }
}

/// Index of the `]` closing the `[` at `start`, tracking nesting depth.
///
/// Brackets inside JSON string literals are ignored. Returns `None` when
/// `start` is not a `[` or the array is never closed.
pub fn find_matching_bracket(s: &str, start: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.get(start) != Some(&b'[') {
        return None;
    }

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Chain-of-thought portion of a response.
///
/// Precedence: the `<reasoning>` tag, then everything before `<decision>`,
/// then everything before the first `[`, then the whole text.
pub fn extract_chain_of_thought(text: &str) -> String {
    if let Some(reasoning) = reasoning_tag(text) {
        return reasoning.to_string();
    }
    if let Some(idx) = text.find("<decision>").filter(|&i| i > 0) {
        return text[..idx].trim().to_string();
    }
    if let Some(idx) = text.find('[').filter(|&i| i > 0) {
        return text[..idx].trim().to_string();
    }
    text.trim().to_string()
}

/// Locate, check and deserialize the decision payload.
///
/// `raw_response` is the unprocessed model output, carried into errors.
pub fn extract_decisions(sanitized: &str, raw_response: &str) -> Result<Extraction, ExtractError> {
    let region = decision_tag(sanitized).unwrap_or_else(|| sanitized.trim());

    let Some((strategy, payload)) = first_success(region, &PAYLOAD_STRATEGIES) else {
        let cot = extract_chain_of_thought(sanitized);
        let summary = summarize(&cot, FALLBACK_SUMMARY_MAX_CHARS);
        tracing::info!(
            summary_len = summary.chars().count(),
            "No structured decision in model response, deferring with wait"
        );
        counter!("decision_fallbacks_total").increment(1);
        return Ok(Extraction {
            decisions: vec![Decision::wait_all(summary)],
            strategy: FALLBACK_STRATEGY,
        });
    };

    tracing::debug!(strategy, payload_len = payload.len(), "Decision payload located");

    let payload = normalize_payload(payload);
    validate_payload_format(&payload, raw_response)?;

    let decisions: Vec<Decision> =
        serde_json::from_str(&payload).map_err(|source| ExtractError::Json {
            source,
            snippet: snippet(&payload),
            raw_response: raw_response.to_string(),
        })?;

    Ok(Extraction {
        decisions,
        strategy,
    })
}

/// Collapse a leading `[ {` to `[{` and fold any punctuation the model
/// reintroduced inside the span.
fn normalize_payload(payload: &str) -> String {
    let trimmed = payload.trim();
    let compact = ARRAY_OPEN_SPACE.replace(trimmed, "[{");
    normalize_punctuation(&compact)
}

/// Coarse well-formedness checks run before deserialization.
pub fn validate_payload_format(payload: &str, raw_response: &str) -> Result<(), ExtractError> {
    let trimmed = payload.trim_start();

    if !trimmed.starts_with("[{") {
        let head: String = trimmed.chars().take(20).collect();
        if trimmed.starts_with('[') && !head.contains('{') {
            return Err(ExtractError::MissingObjectArray {
                snippet: trimmed.chars().take(50).collect(),
                raw_response: raw_response.to_string(),
            });
        }
        return Err(ExtractError::NotAnArray {
            snippet: head,
            raw_response: raw_response.to_string(),
        });
    }

    if payload.contains('~') {
        return Err(ExtractError::RangeSymbol {
            snippet: snippet(payload),
            raw_response: raw_response.to_string(),
        });
    }

    if let Some(m) = THOUSANDS_SEPARATOR.find(payload) {
        let found: String = payload[m.start()..].chars().take(10).collect();
        return Err(ExtractError::ThousandsSeparator {
            found,
            snippet: snippet(payload),
            raw_response: raw_response.to_string(),
        });
    }

    Ok(())
}

/// Truncate to at most `max_chars` characters, marking the cut with `...`.
pub fn summarize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn snippet(payload: &str) -> String {
    summarize(payload, SNIPPET_MAX_CHARS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
