pub mod decision;
pub mod fill;
pub mod position;

pub use decision::{Action, Decision, FullDecision};
pub use fill::{FillAction, TradeFill};
pub use position::{PositionFilter, PositionKey, PositionRecord, PositionStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PositionSide
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LONG" | "BUY" => Some(PositionSide::Long),
            "SHORT" | "SELL" => Some(PositionSide::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
