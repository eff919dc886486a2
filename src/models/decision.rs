use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::PositionSide;

/// Trading action requested by the model.
///
/// Any string outside the known set is kept as `Unknown` so that parsing never
/// fails on it; the validator rejects it with the decision's index instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Hold,
    Wait,
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::OpenLong => "open_long",
            Action::OpenShort => "open_short",
            Action::CloseLong => "close_long",
            Action::CloseShort => "close_short",
            Action::Hold => "hold",
            Action::Wait => "wait",
            Action::Unknown(s) => s.as_str(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Action::OpenLong | Action::OpenShort)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Action::CloseLong | Action::CloseShort)
    }

    /// Side affected by an open/close action; `None` for hold, wait and unknown.
    pub fn side(&self) -> Option<PositionSide> {
        match self {
            Action::OpenLong | Action::CloseLong => Some(PositionSide::Long),
            Action::OpenShort | Action::CloseShort => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "open_long" => Action::OpenLong,
            "open_short" => Action::OpenShort,
            "close_long" => Action::CloseLong,
            "close_short" => Action::CloseShort,
            "hold" => Action::Hold,
            "wait" => Action::Wait,
            _ => Action::Unknown(s),
        }
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        a.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instruction for one symbol, as emitted by the model.
///
/// Numeric fields default to zero when the model omits them; the validator
/// treats zero as missing for open actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub action: Action,
    #[serde(default, deserialize_with = "null_as_default")]
    pub leverage: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub position_size_usd: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stop_loss: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub take_profit: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub risk_usd: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning: String,
}

impl Decision {
    /// Safe "do nothing" decision covering every symbol.
    pub fn wait_all(reasoning: impl Into<String>) -> Self {
        Self {
            symbol: "ALL".into(),
            action: Action::Wait,
            leverage: 0,
            position_size_usd: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            confidence: 0,
            risk_usd: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

/// Models write `null` for fields that do not apply to an action.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Everything recovered from one model response, kept for audit logging even
/// when extraction or validation fails.
#[derive(Debug, Clone, Serialize)]
pub struct FullDecision {
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
    pub raw_response: String,
    pub timestamp: DateTime<Utc>,
}
