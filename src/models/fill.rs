use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{PositionKey, PositionSide};

/// Action carried by an executed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl FillAction {
    pub fn is_open(&self) -> bool {
        matches!(self, FillAction::OpenLong | FillAction::OpenShort)
    }

    pub fn side(&self) -> PositionSide {
        match self {
            FillAction::OpenLong | FillAction::CloseLong => PositionSide::Long,
            FillAction::OpenShort | FillAction::CloseShort => PositionSide::Short,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FillAction::OpenLong => "open_long",
            FillAction::OpenShort => "open_short",
            FillAction::CloseLong => "close_long",
            FillAction::CloseShort => "close_short",
        }
    }
}

impl fmt::Display for FillAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executed order reported by the exchange layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub trader_id: String,
    pub exchange_id: String,
    pub exchange_type: String,
    pub symbol: String,
    pub side: PositionSide,
    pub action: FillAction,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub realized_pnl: Decimal,
    pub trade_time: DateTime<Utc>,
    pub order_id: String,
}

impl TradeFill {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(&self.trader_id, &self.symbol, self.side)
    }
}

impl fmt::Display for TradeFill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fill: trader={} symbol={} side={} action={} qty={} price={} order={}",
            self.trader_id,
            self.symbol,
            self.side,
            self.action,
            self.quantity,
            self.price,
            self.order_id,
        )
    }
}
