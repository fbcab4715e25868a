use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::row::{describe_args, RuntimeRow, RuntimeWrite};
use super::RuntimeStore;
use crate::domain::{RuntimeConfig, RuntimeId};
use crate::error::{KeeperError, Result};

/// Connect a pool shared by the runtime store and the marker cache
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Apply pending migrations from `./migrations`
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// PostgreSQL-backed runtime store
#[derive(Clone)]
pub struct PgRuntimeStore {
    pool: PgPool,
}

fn read_row(r: &PgRow) -> RuntimeRow {
    RuntimeRow {
        id: r.get("id"),
        account_id: r.get("account_id"),
        name: r.get("name"),
        prefix: r.get("prefix"),
        strategy: r.get("strategy"),
        strategy_id: r.get("strategy_id"),
        strategy_type: r.get("strategy_type"),
        strategy_path: r.get("strategy_path"),
        runtime_type: r.get("runtime_type"),
        args: r.get("args"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

impl PgRuntimeStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RuntimeStore for PgRuntimeStore {
    #[instrument(skip(self))]
    async fn list(&self, account_id: &str) -> Result<Vec<RuntimeConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, name, prefix, strategy, strategy_id, strategy_type,
                   strategy_path, runtime_type, args, created_at, updated_at
            FROM runtimes
            WHERE account_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| read_row(r).into_config())
            .collect()
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: RuntimeId) -> Result<Option<RuntimeConfig>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, name, prefix, strategy, strategy_id, strategy_type,
                   strategy_path, runtime_type, args, created_at, updated_at
            FROM runtimes WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| read_row(&r).into_config()).transpose()
    }

    #[instrument(skip(self, config), fields(id = ?config.id, name = %config.name))]
    async fn save(&self, config: &RuntimeConfig) -> Result<RuntimeId> {
        let write = RuntimeWrite::prepare(config)?;
        debug!("Runtime args: [{}]", describe_args(&write.decoded_args()));

        let row = match config.id {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO runtimes (
                        account_id, name, prefix, strategy, strategy_id, strategy_type,
                        strategy_path, runtime_type, args
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    RETURNING id
                    "#,
                )
                .bind(&write.account_id)
                .bind(&write.name)
                .bind(&write.prefix)
                .bind(&write.strategy)
                .bind(&write.strategy_id)
                .bind(&write.strategy_type)
                .bind(&write.strategy_path)
                .bind(&write.runtime_type)
                .bind(&write.args)
                .fetch_one(&self.pool)
                .await?
            }
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE runtimes SET
                        account_id = $2,
                        name = $3,
                        prefix = $4,
                        strategy = $5,
                        strategy_id = $6,
                        strategy_type = $7,
                        strategy_path = $8,
                        runtime_type = $9,
                        args = $10,
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING id
                    "#,
                )
                .bind(id)
                .bind(&write.account_id)
                .bind(&write.name)
                .bind(&write.prefix)
                .bind(&write.strategy)
                .bind(&write.strategy_id)
                .bind(&write.strategy_type)
                .bind(&write.strategy_path)
                .bind(&write.runtime_type)
                .bind(&write.args)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| KeeperError::runtime_not_found(id))?
            }
        };

        Ok(row.get("id"))
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: RuntimeId) -> Result<()> {
        let result = sqlx::query("DELETE FROM runtimes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(KeeperError::runtime_not_found(id));
        }

        info!("Removed runtime {}", id);
        Ok(())
    }
}
