use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::row::{describe_args, RuntimeRow, RuntimeWrite};
use super::RuntimeStore;
use crate::domain::{RuntimeConfig, RuntimeId};
use crate::error::{KeeperError, Result};

#[derive(Default)]
struct Table {
    rows: BTreeMap<RuntimeId, RuntimeRow>,
    next_id: RuntimeId,
}

/// Runtime store kept in process memory. Rows go through the same mapping
/// as the Postgres backend.
#[derive(Default)]
pub struct InMemoryRuntimeStore {
    table: RwLock<Table>,
}

impl InMemoryRuntimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored row, for inspecting what was persisted
    pub async fn row(&self, id: RuntimeId) -> Option<RuntimeRow> {
        self.table.read().await.rows.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RuntimeStore for InMemoryRuntimeStore {
    async fn list(&self, account_id: &str) -> Result<Vec<RuntimeConfig>> {
        let table = self.table.read().await;
        table
            .rows
            .values()
            .filter(|row| row.account_id == account_id)
            .cloned()
            .map(RuntimeRow::into_config)
            .collect()
    }

    async fn get_by_id(&self, id: RuntimeId) -> Result<Option<RuntimeConfig>> {
        let row = self.table.read().await.rows.get(&id).cloned();
        row.map(RuntimeRow::into_config).transpose()
    }

    async fn save(&self, config: &RuntimeConfig) -> Result<RuntimeId> {
        let write = RuntimeWrite::prepare(config)?;
        let now = Utc::now();
        let mut table = self.table.write().await;

        let (id, created_at) = match config.id {
            Some(id) => {
                let existing = table
                    .rows
                    .get(&id)
                    .ok_or_else(|| KeeperError::runtime_not_found(id))?;
                (id, existing.created_at)
            }
            None => {
                table.next_id += 1;
                (table.next_id, now)
            }
        };

        debug!(
            "Saving runtime {} ({}) args: [{}]",
            id,
            write.name,
            describe_args(&write.decoded_args())
        );

        table.rows.insert(
            id,
            RuntimeRow {
                id,
                account_id: write.account_id,
                name: write.name,
                prefix: write.prefix,
                strategy: write.strategy,
                strategy_id: write.strategy_id,
                strategy_type: write.strategy_type,
                strategy_path: write.strategy_path,
                runtime_type: write.runtime_type,
                args: write.args,
                created_at,
                updated_at: now,
            },
        );

        Ok(id)
    }

    async fn remove(&self, id: RuntimeId) -> Result<()> {
        let mut table = self.table.write().await;
        table
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| KeeperError::runtime_not_found(id))
    }
}
