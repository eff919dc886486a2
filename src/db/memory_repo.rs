use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{PositionFilter, PositionKey, PositionRecord};

use super::PositionStore;

/// In-process position ledger, used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryPositionStore {
    inner: Arc<RwLock<HashMap<Uuid, PositionRecord>>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn get_open_position(&self, key: &PositionKey) -> anyhow::Result<Option<PositionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .values()
            .find(|p| p.is_open() && p.key() == *key)
            .cloned())
    }

    async fn insert_position(&self, position: &PositionRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(&position.id) {
            anyhow::bail!("position {} already exists", position.id);
        }
        if position.is_open()
            && inner
                .values()
                .any(|p| p.is_open() && p.key() == position.key())
        {
            anyhow::bail!("an open position already exists for {}", position.key());
        }
        inner.insert(position.id, position.clone());
        Ok(())
    }

    async fn update_position(&self, position: &PositionRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        match inner.get_mut(&position.id) {
            Some(existing) => {
                *existing = position.clone();
                Ok(())
            }
            None => anyhow::bail!("position {} not found", position.id),
        }
    }

    async fn list_positions(&self, filter: &PositionFilter) -> anyhow::Result<Vec<PositionRecord>> {
        let inner = self.inner.read().await;
        let mut positions: Vec<PositionRecord> =
            inner.values().filter(|p| filter.matches(p)).cloned().collect();
        positions.sort_by(|a, b| b.entry_time.cmp(&a.entry_time));
        Ok(positions)
    }

    async fn count_open_positions(&self) -> anyhow::Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner.values().filter(|p| p.is_open()).count() as i64)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
