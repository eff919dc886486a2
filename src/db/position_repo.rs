use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{
    PositionFilter, PositionKey, PositionRecord, PositionSide, PositionStatus,
};

use super::PositionStore;

/// Database row for the positions table.
#[derive(Debug, Clone, FromRow)]
struct PositionRow {
    id: Uuid,
    trader_id: String,
    exchange_id: String,
    exchange_type: String,
    symbol: String,
    side: String,
    quantity: Decimal,
    entry_quantity: Decimal,
    entry_price: Decimal,
    leverage: i32,
    status: String,
    fee: Decimal,
    realized_pnl: Decimal,
    entry_order_id: String,
    entry_time: DateTime<Utc>,
    exit_price: Option<Decimal>,
    exit_order_id: Option<String>,
    exit_time: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PositionRow> for PositionRecord {
    type Error = anyhow::Error;

    fn try_from(row: PositionRow) -> anyhow::Result<Self> {
        let side = PositionSide::from_api_str(&row.side)
            .ok_or_else(|| anyhow::anyhow!("position {} has unknown side '{}'", row.id, row.side))?;
        let status = PositionStatus::from_db_str(&row.status).ok_or_else(|| {
            anyhow::anyhow!("position {} has unknown status '{}'", row.id, row.status)
        })?;

        Ok(PositionRecord {
            id: row.id,
            trader_id: row.trader_id,
            exchange_id: row.exchange_id,
            exchange_type: row.exchange_type,
            symbol: row.symbol,
            side,
            quantity: row.quantity,
            entry_quantity: row.entry_quantity,
            entry_price: row.entry_price,
            leverage: row.leverage,
            status,
            fee: row.fee,
            realized_pnl: row.realized_pnl,
            entry_order_id: row.entry_order_id,
            entry_time: row.entry_time,
            exit_price: row.exit_price,
            exit_order_id: row.exit_order_id,
            exit_time: row.exit_time,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed position ledger.
#[derive(Clone)]
pub struct PgPositionStore {
    pool: PgPool,
}

impl PgPositionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PositionStore for PgPositionStore {
    async fn get_open_position(&self, key: &PositionKey) -> anyhow::Result<Option<PositionRecord>> {
        let row = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT * FROM positions
            WHERE trader_id = $1 AND symbol = $2 AND side = $3 AND status = 'OPEN'
            LIMIT 1
            "#,
        )
        .bind(&key.trader_id)
        .bind(&key.symbol)
        .bind(key.side.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PositionRecord::try_from).transpose()
    }

    async fn insert_position(&self, p: &PositionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, trader_id, exchange_id, exchange_type, symbol, side,
                quantity, entry_quantity, entry_price, leverage, status, fee, realized_pnl,
                entry_order_id, entry_time, exit_price, exit_order_id, exit_time, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(p.id)
        .bind(&p.trader_id)
        .bind(&p.exchange_id)
        .bind(&p.exchange_type)
        .bind(&p.symbol)
        .bind(p.side.as_str())
        .bind(p.quantity)
        .bind(p.entry_quantity)
        .bind(p.entry_price)
        .bind(p.leverage)
        .bind(p.status.as_str())
        .bind(p.fee)
        .bind(p.realized_pnl)
        .bind(&p.entry_order_id)
        .bind(p.entry_time)
        .bind(p.exit_price)
        .bind(&p.exit_order_id)
        .bind(p.exit_time)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_position(&self, p: &PositionRecord) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET quantity = $2, entry_quantity = $3, entry_price = $4, leverage = $5,
                status = $6, fee = $7, realized_pnl = $8,
                exit_price = $9, exit_order_id = $10, exit_time = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(p.id)
        .bind(p.quantity)
        .bind(p.entry_quantity)
        .bind(p.entry_price)
        .bind(p.leverage)
        .bind(p.status.as_str())
        .bind(p.fee)
        .bind(p.realized_pnl)
        .bind(p.exit_price)
        .bind(&p.exit_order_id)
        .bind(p.exit_time)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("position {} not found", p.id);
        }
        Ok(())
    }

    async fn list_positions(&self, filter: &PositionFilter) -> anyhow::Result<Vec<PositionRecord>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT * FROM positions
            WHERE ($1::TEXT IS NULL OR trader_id = $1)
              AND ($2::TEXT IS NULL OR symbol = $2)
              AND ($3::TEXT IS NULL OR status = $3)
            ORDER BY entry_time DESC
            "#,
        )
        .bind(filter.trader_id.as_deref())
        .bind(filter.symbol.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PositionRecord::try_from).collect()
    }

    async fn count_open_positions(&self) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM positions WHERE status = 'OPEN'")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
