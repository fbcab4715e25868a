use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::KeyValueCache;
use crate::error::Result;

/// Cache persisted in the `cache_entries` table, so entries outlive the process
#[derive(Clone)]
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueCache for PgCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        // left() instead of LIKE: prefixes contain `_`
        let rows = sqlx::query(
            r#"
            SELECT key FROM cache_entries
            WHERE left(key, char_length($1)) = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("key")).collect())
    }
}
