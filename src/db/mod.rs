pub mod memory_repo;
pub mod position_repo;

pub use memory_repo::MemoryPositionStore;
pub use position_repo::PgPositionStore;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::models::{PositionFilter, PositionKey, PositionRecord};

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Persistence boundary for the position ledger.
///
/// Implementations only store and load records; every state transition is
/// decided by the reconciler, which also serializes access per identity.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// The OPEN record for an identity, if any.
    async fn get_open_position(&self, key: &PositionKey) -> anyhow::Result<Option<PositionRecord>>;

    async fn insert_position(&self, position: &PositionRecord) -> anyhow::Result<()>;

    /// Overwrite the record with the same id.
    async fn update_position(&self, position: &PositionRecord) -> anyhow::Result<()>;

    /// Records matching `filter`, most recently opened first.
    async fn list_positions(&self, filter: &PositionFilter) -> anyhow::Result<Vec<PositionRecord>>;

    async fn count_open_positions(&self) -> anyhow::Result<i64>;

    /// Connectivity probe for health checks.
    async fn ping(&self) -> anyhow::Result<()>;
}
