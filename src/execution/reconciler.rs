use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::PositionStore;
use crate::models::{PositionKey, PositionRecord, PositionStatus, TradeFill};

/// Close quantities within this distance of the stored quantity count as a full close.
pub const QUANTITY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 4); // 0.0001

// ---------------------------------------------------------------------------
// Outcome / error types
// ---------------------------------------------------------------------------

/// What a single fill did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Opened(PositionRecord),
    Averaged(PositionRecord),
    Reduced(PositionRecord),
    Closed {
        position: PositionRecord,
        over_close: bool,
    },
    /// Close fill with no matching open position.
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Opened(_) => "opened",
            ReconcileOutcome::Averaged(_) => "averaged",
            ReconcileOutcome::Reduced(_) => "reduced",
            ReconcileOutcome::Closed { .. } => "closed",
            ReconcileOutcome::Ignored => "ignored",
        }
    }

    pub fn position(&self) -> Option<&PositionRecord> {
        match self {
            ReconcileOutcome::Opened(p)
            | ReconcileOutcome::Averaged(p)
            | ReconcileOutcome::Reduced(p) => Some(p),
            ReconcileOutcome::Closed { position, .. } => Some(position),
            ReconcileOutcome::Ignored => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid fill for {key}: {reason}")]
    InvalidFill { key: PositionKey, reason: String },

    #[error("fill action {action} does not match side {side} for {trader_id}/{symbol}")]
    SideMismatch {
        trader_id: String,
        symbol: String,
        action: String,
        side: String,
    },

    #[error("position store error: {0}")]
    Store(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Folds executed fills into the position ledger.
///
/// Each fill is processed under a lock keyed by (trader, symbol, side), so the
/// read-modify-write against the store never interleaves for one identity.
/// Fills for different identities run concurrently.
#[derive(Clone)]
pub struct PositionReconciler {
    store: Arc<dyn PositionStore>,
    locks: Arc<Mutex<HashMap<PositionKey, Arc<Mutex<()>>>>>,
}

impl PositionReconciler {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    async fn lock_for(&self, key: &PositionKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the table entry once no other task holds or waits on it.
    async fn release(&self, key: &PositionKey, slot: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the table, one in `slot`.
        if Arc::strong_count(&slot) == 2 {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Apply one fill to the ledger.
    pub async fn process_trade(
        &self,
        fill: &TradeFill,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        check_fill(fill)?;

        let key = fill.key();
        let slot = self.lock_for(&key).await;
        let result = {
            let _guard = slot.lock().await;
            self.apply(fill, &key).await
        };
        self.release(&key, slot).await;
        let outcome = result?;

        counter!("fills_reconciled_total", "outcome" => outcome.as_str()).increment(1);
        if matches!(
            outcome,
            ReconcileOutcome::Opened(_) | ReconcileOutcome::Closed { .. }
        ) {
            match self.store.count_open_positions().await {
                Ok(n) => gauge!("open_positions").set(n as f64),
                Err(e) => tracing::debug!(error = %e, "Failed to refresh open_positions gauge"),
            }
        }

        Ok(outcome)
    }

    /// Read-modify-write for one identity. Caller holds the identity lock.
    async fn apply(
        &self,
        fill: &TradeFill,
        key: &PositionKey,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let existing = self.store.get_open_position(key).await?;

        let outcome = if fill.action.is_open() {
            match existing {
                None => {
                    let position = new_position(fill);
                    self.store.insert_position(&position).await?;
                    tracing::info!(
                        key = %key,
                        quantity = %position.quantity,
                        entry_price = %position.entry_price,
                        order_id = %fill.order_id,
                        "Position opened"
                    );
                    ReconcileOutcome::Opened(position)
                }
                Some(mut position) => {
                    average_into(&mut position, fill)?;
                    self.store.update_position(&position).await?;
                    tracing::info!(
                        key = %key,
                        quantity = %position.quantity,
                        entry_price = %position.entry_price,
                        order_id = %fill.order_id,
                        "Position averaged"
                    );
                    ReconcileOutcome::Averaged(position)
                }
            }
        } else {
            match existing {
                None => {
                    tracing::warn!(
                        key = %key,
                        quantity = %fill.quantity,
                        order_id = %fill.order_id,
                        "Close fill without an open position, ignoring"
                    );
                    ReconcileOutcome::Ignored
                }
                Some(mut position) => {
                    if fill.quantity < position.quantity - QUANTITY_EPSILON {
                        reduce(&mut position, fill)?;
                        self.store.update_position(&position).await?;
                        tracing::info!(
                            key = %key,
                            closed = %fill.quantity,
                            remaining = %position.quantity,
                            order_id = %fill.order_id,
                            "Position partially closed"
                        );
                        ReconcileOutcome::Reduced(position)
                    } else {
                        let over_close = fill.quantity > position.quantity;
                        if over_close {
                            tracing::warn!(
                                key = %key,
                                requested = %fill.quantity,
                                held = %position.quantity,
                                order_id = %fill.order_id,
                                "Over-close: clamping closed quantity to held quantity"
                            );
                        }
                        close(&mut position, fill)?;
                        self.store.update_position(&position).await?;
                        tracing::info!(
                            key = %key,
                            quantity = %position.quantity,
                            exit_price = %fill.price,
                            realized_pnl = %position.realized_pnl,
                            order_id = %fill.order_id,
                            "Position closed"
                        );
                        ReconcileOutcome::Closed {
                            position,
                            over_close,
                        }
                    }
                }
            }
        };

        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

fn check_fill(fill: &TradeFill) -> Result<(), ReconcileError> {
    if fill.action.side() != fill.side {
        return Err(ReconcileError::SideMismatch {
            trader_id: fill.trader_id.clone(),
            symbol: fill.symbol.clone(),
            action: fill.action.to_string(),
            side: fill.side.to_string(),
        });
    }
    if fill.quantity <= Decimal::ZERO {
        return Err(ReconcileError::InvalidFill {
            key: fill.key(),
            reason: format!("quantity must be positive, got {}", fill.quantity),
        });
    }
    if fill.price <= Decimal::ZERO {
        return Err(ReconcileError::InvalidFill {
            key: fill.key(),
            reason: format!("price must be positive, got {}", fill.price),
        });
    }
    Ok(())
}

fn new_position(fill: &TradeFill) -> PositionRecord {
    PositionRecord {
        id: Uuid::new_v4(),
        trader_id: fill.trader_id.clone(),
        exchange_id: fill.exchange_id.clone(),
        exchange_type: fill.exchange_type.clone(),
        symbol: fill.symbol.clone(),
        side: fill.side,
        quantity: fill.quantity,
        entry_quantity: fill.quantity,
        entry_price: fill.price,
        leverage: 1,
        status: PositionStatus::Open,
        fee: fill.fee,
        realized_pnl: Decimal::ZERO,
        entry_order_id: fill.order_id.clone(),
        entry_time: fill.trade_time,
        exit_price: None,
        exit_order_id: None,
        exit_time: None,
        updated_at: Utc::now(),
    }
}

/// Arithmetic result that does not fit a `Decimal`.
fn overflow(fill: &TradeFill, what: &str) -> ReconcileError {
    ReconcileError::InvalidFill {
        key: fill.key(),
        reason: format!("{what} overflows for quantity {} at price {}", fill.quantity, fill.price),
    }
}

/// Weighted-average entry: (q0*p0 + q1*p1) / (q0 + q1).
///
/// The record is only modified once every step has succeeded.
fn average_into(position: &mut PositionRecord, fill: &TradeFill) -> Result<(), ReconcileError> {
    let total = position
        .quantity
        .checked_add(fill.quantity)
        .ok_or_else(|| overflow(fill, "quantity"))?;
    let entry_price = position
        .quantity
        .checked_mul(position.entry_price)
        .zip(fill.quantity.checked_mul(fill.price))
        .and_then(|(held, incoming)| held.checked_add(incoming))
        .and_then(|notional| notional.checked_div(total))
        .ok_or_else(|| overflow(fill, "entry notional"))?;
    let entry_quantity = position
        .entry_quantity
        .checked_add(fill.quantity)
        .ok_or_else(|| overflow(fill, "entry quantity"))?;
    let fee = position
        .fee
        .checked_add(fill.fee)
        .ok_or_else(|| overflow(fill, "fee"))?;

    position.entry_price = entry_price;
    position.quantity = total;
    position.entry_quantity = entry_quantity;
    position.fee = fee;
    position.updated_at = Utc::now();
    Ok(())
}

/// Accumulated fee and realized PnL after one more closing fill.
fn closing_totals(
    position: &PositionRecord,
    fill: &TradeFill,
) -> Result<(Decimal, Decimal), ReconcileError> {
    let fee = position
        .fee
        .checked_add(fill.fee)
        .ok_or_else(|| overflow(fill, "fee"))?;
    let realized_pnl = position
        .realized_pnl
        .checked_add(fill.realized_pnl)
        .ok_or_else(|| overflow(fill, "realized pnl"))?;
    Ok((fee, realized_pnl))
}

fn reduce(position: &mut PositionRecord, fill: &TradeFill) -> Result<(), ReconcileError> {
    let (fee, realized_pnl) = closing_totals(position, fill)?;
    position.quantity -= fill.quantity;
    position.fee = fee;
    position.realized_pnl = realized_pnl;
    position.updated_at = Utc::now();
    Ok(())
}

/// Terminal transition. `quantity` keeps the held amount, which caps any over-close.
fn close(position: &mut PositionRecord, fill: &TradeFill) -> Result<(), ReconcileError> {
    let (fee, realized_pnl) = closing_totals(position, fill)?;
    position.status = PositionStatus::Closed;
    position.fee = fee;
    position.realized_pnl = realized_pnl;
    position.exit_price = Some(fill.price);
    position.exit_order_id = Some(fill.order_id.clone());
    position.exit_time = Some(fill.trade_time);
    position.updated_at = Utc::now();
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryPositionStore;
    use crate::models::{FillAction, PositionFilter, PositionSide};

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn fill(action: FillAction, qty: Decimal, price: Decimal) -> TradeFill {
        TradeFill {
            trader_id: "trader-1".into(),
            exchange_id: "binance-main".into(),
            exchange_type: "binance".into(),
            symbol: "BTCUSDT".into(),
            side: action.side(),
            action,
            quantity: qty,
            price,
            fee: d("0.5"),
            realized_pnl: Decimal::ZERO,
            trade_time: Utc::now(),
            order_id: Uuid::new_v4().to_string(),
        }
    }

    fn reconciler() -> PositionReconciler {
        PositionReconciler::new(Arc::new(MemoryPositionStore::new()))
    }

    #[tokio::test]
    async fn test_open_creates_position() {
        let r = reconciler();
        let outcome = r
            .process_trade(&fill(FillAction::OpenLong, d("1.0"), d("100")))
            .await
            .unwrap();

        let ReconcileOutcome::Opened(p) = outcome else {
            panic!("expected Opened, got {outcome:?}");
        };
        assert_eq!(p.quantity, d("1.0"));
        assert_eq!(p.entry_quantity, d("1.0"));
        assert_eq!(p.entry_price, d("100"));
        assert_eq!(p.leverage, 1);
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.fee, d("0.5"));
    }

    #[tokio::test]
    async fn test_second_open_weighted_average() {
        let r = reconciler();
        r.process_trade(&fill(FillAction::OpenLong, d("1.0"), d("100")))
            .await
            .unwrap();
        let outcome = r
            .process_trade(&fill(FillAction::OpenLong, d("3.0"), d("120")))
            .await
            .unwrap();

        let ReconcileOutcome::Averaged(p) = outcome else {
            panic!("expected Averaged, got {outcome:?}");
        };
        // (1*100 + 3*120) / 4 = 115
        assert_eq!(p.entry_price, d("115"));
        assert_eq!(p.quantity, d("4.0"));
        assert_eq!(p.entry_quantity, d("4.0"));
        assert_eq!(p.fee, d("1.0"));
    }

    #[tokio::test]
    async fn test_close_within_tolerance_is_full_close() {
        let r = reconciler();
        r.process_trade(&fill(FillAction::OpenShort, d("2.0"), d("50")))
            .await
            .unwrap();

        let mut close_fill = fill(FillAction::CloseShort, d("1.99995"), d("45"));
        close_fill.realized_pnl = d("10");
        let outcome = r.process_trade(&close_fill).await.unwrap();

        let ReconcileOutcome::Closed { position, over_close } = outcome else {
            panic!("expected Closed, got {outcome:?}");
        };
        assert!(!over_close);
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_price, Some(d("45")));
        assert_eq!(position.exit_order_id.as_deref(), Some(close_fill.order_id.as_str()));
        assert_eq!(position.realized_pnl, d("10"));
        assert_eq!(position.fee, d("1.0"));

        let key = PositionKey::new("trader-1", "BTCUSDT", PositionSide::Short);
        assert!(r.store().get_open_position(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_over_close_clamps_and_closes() {
        let r = reconciler();
        r.process_trade(&fill(FillAction::OpenLong, d("1.0"), d("100")))
            .await
            .unwrap();
        let outcome = r
            .process_trade(&fill(FillAction::CloseLong, d("1.5"), d("110")))
            .await
            .unwrap();

        let ReconcileOutcome::Closed { position, over_close } = outcome else {
            panic!("expected Closed, got {outcome:?}");
        };
        assert!(over_close);
        assert_eq!(position.quantity, d("1.0"));
        assert_eq!(position.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn test_partial_close_keeps_open_and_accumulates() {
        let r = reconciler();
        r.process_trade(&fill(FillAction::OpenLong, d("2.0"), d("100")))
            .await
            .unwrap();

        let mut partial = fill(FillAction::CloseLong, d("0.5"), d("110"));
        partial.realized_pnl = d("5");
        let outcome = r.process_trade(&partial).await.unwrap();
        let ReconcileOutcome::Reduced(p) = outcome else {
            panic!("expected Reduced, got {outcome:?}");
        };
        assert_eq!(p.quantity, d("1.5"));
        assert_eq!(p.entry_quantity, d("2.0"));
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.realized_pnl, d("5"));

        let mut rest = fill(FillAction::CloseLong, d("1.5"), d("120"));
        rest.realized_pnl = d("30");
        let outcome = r.process_trade(&rest).await.unwrap();
        let ReconcileOutcome::Closed { position, .. } = outcome else {
            panic!("expected Closed, got {outcome:?}");
        };
        assert_eq!(position.realized_pnl, d("35"));
        assert_eq!(position.fee, d("1.5"));
        assert_eq!(position.quantity, d("1.5"));
    }

    #[tokio::test]
    async fn test_close_without_position_is_ignored() {
        let r = reconciler();
        let outcome = r
            .process_trade(&fill(FillAction::CloseLong, d("1.0"), d("100")))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);

        let all = r.store().list_positions(&PositionFilter::default()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_open_after_close_starts_fresh_record() {
        let r = reconciler();
        let first = r
            .process_trade(&fill(FillAction::OpenLong, d("1.0"), d("100")))
            .await
            .unwrap();
        r.process_trade(&fill(FillAction::CloseLong, d("1.0"), d("105")))
            .await
            .unwrap();
        let reopened = r
            .process_trade(&fill(FillAction::OpenLong, d("2.0"), d("90")))
            .await
            .unwrap();

        let first_id = first.position().unwrap().id;
        let ReconcileOutcome::Opened(p) = reopened else {
            panic!("expected Opened, got {reopened:?}");
        };
        assert_ne!(p.id, first_id);
        assert_eq!(p.entry_price, d("90"));

        let all = r.store().list_positions(&PositionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_side_mismatch_and_bad_quantity() {
        let r = reconciler();

        let mut mismatched = fill(FillAction::OpenLong, d("1.0"), d("100"));
        mismatched.side = PositionSide::Short;
        assert!(matches!(
            r.process_trade(&mismatched).await,
            Err(ReconcileError::SideMismatch { .. })
        ));

        let zero = fill(FillAction::OpenLong, Decimal::ZERO, d("100"));
        assert!(matches!(
            r.process_trade(&zero).await,
            Err(ReconcileError::InvalidFill { .. })
        ));

        let free = fill(FillAction::OpenLong, d("1.0"), Decimal::ZERO);
        assert!(matches!(
            r.process_trade(&free).await,
            Err(ReconcileError::InvalidFill { .. })
        ));
    }

    #[tokio::test]
    async fn test_sides_are_independent() {
        let r = reconciler();
        r.process_trade(&fill(FillAction::OpenLong, d("1.0"), d("100")))
            .await
            .unwrap();
        let outcome = r
            .process_trade(&fill(FillAction::OpenShort, d("1.0"), d("101")))
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Opened(_)));
        assert_eq!(r.store().count_open_positions().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_do_not_lose_updates() {
        let r = reconciler();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let r = r.clone();
            handles.push(tokio::spawn(async move {
                r.process_trade(&fill(FillAction::OpenLong, d("1"), d("100")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let key = PositionKey::new("trader-1", "BTCUSDT", PositionSide::Long);
        let p = r.store().get_open_position(&key).await.unwrap().unwrap();
        assert_eq!(p.quantity, d("20"));
        assert_eq!(p.entry_price, d("100"));
        assert_eq!(p.fee, d("10.0"));
        assert_eq!(r.store().count_open_positions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_overflowing_average_is_rejected_without_writing() {
        let r = reconciler();
        r.process_trade(&fill(FillAction::OpenLong, d("1000000000000000"), d("100000000000000")))
            .await
            .unwrap();

        let err = r
            .process_trade(&fill(FillAction::OpenLong, d("1"), d("1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidFill { .. }), "{err}");

        let key = PositionKey::new("trader-1", "BTCUSDT", PositionSide::Long);
        let p = r.store().get_open_position(&key).await.unwrap().unwrap();
        assert_eq!(p.quantity, d("1000000000000000"));
        assert_eq!(p.entry_price, d("100000000000000"));
        assert_eq!(p.fee, d("0.5"));
    }

    #[tokio::test]
    async fn test_lock_table_is_pruned_after_each_fill() {
        let r = reconciler();
        r.process_trade(&fill(FillAction::OpenLong, d("1"), d("100")))
            .await
            .unwrap();
        r.process_trade(&fill(FillAction::CloseLong, d("1"), d("110")))
            .await
            .unwrap();
        r.process_trade(&fill(FillAction::CloseShort, d("1"), d("110")))
            .await
            .unwrap();
        assert_eq!(r.tracked_keys().await, 0);
    }
}
