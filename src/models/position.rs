use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::PositionSide;

/// Identity of a position slot. At most one OPEN record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub trader_id: String,
    pub symbol: String,
    pub side: PositionSide,
}

impl PositionKey {
    pub fn new(trader_id: &str, symbol: &str, side: PositionSide) -> Self {
        Self {
            trader_id: trader_id.to_string(),
            symbol: symbol.to_string(),
            side,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.trader_id, self.symbol, self.side)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    #[serde(alias = "open", alias = "Open")]
    Open,
    #[serde(alias = "closed", alias = "Closed")]
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "OPEN" => Some(PositionStatus::Open),
            "CLOSED" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One open or historical position for a (trader, symbol, side) identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: Uuid,
    pub trader_id: String,
    pub exchange_id: String,
    pub exchange_type: String,
    pub symbol: String,
    pub side: PositionSide,
    /// Quantity still held (or, once closed, the quantity that was closed).
    pub quantity: Decimal,
    /// Total quantity ever opened into this record.
    pub entry_quantity: Decimal,
    /// Quantity-weighted average entry price.
    pub entry_price: Decimal,
    pub leverage: i32,
    pub status: PositionStatus,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub entry_order_id: String,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<Decimal>,
    pub exit_order_id: Option<String>,
    pub exit_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PositionRecord {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(&self.trader_id, &self.symbol, self.side)
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Listing filter for the position store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionFilter {
    pub trader_id: Option<String>,
    pub symbol: Option<String>,
    pub status: Option<PositionStatus>,
}

impl PositionFilter {
    pub fn matches(&self, pos: &PositionRecord) -> bool {
        self.trader_id.as_deref().map_or(true, |t| t == pos.trader_id)
            && self.symbol.as_deref().map_or(true, |s| s == pos.symbol)
            && self.status.map_or(true, |s| s == pos.status)
    }
}
