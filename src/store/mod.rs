//! Persisted runtime configuration
//!
//! - `RuntimeStore` trait implemented by every backend
//! - Postgres backend for production
//! - In-memory backend for dry runs and tests

pub mod memory;
pub mod postgres;
pub mod row;

use async_trait::async_trait;

use crate::domain::{RuntimeConfig, RuntimeId};
use crate::error::Result;

pub use memory::InMemoryRuntimeStore;
pub use postgres::PgRuntimeStore;
pub use row::{generate_prefix, normalize_args, RuntimeRow, RuntimeWrite, PREFIX_LEN};

/// CRUD over runtime configurations.
///
/// Liveness is never stored here; callers ask the process supervisor.
#[async_trait]
pub trait RuntimeStore: Send + Sync {
    /// All configurations owned by the account
    async fn list(&self, account_id: &str) -> Result<Vec<RuntimeConfig>>;

    /// `None` when no configuration has this id
    async fn get_by_id(&self, id: RuntimeId) -> Result<Option<RuntimeConfig>>;

    /// Insert when `config.id` is absent, update otherwise. Returns the id.
    async fn save(&self, config: &RuntimeConfig) -> Result<RuntimeId>;

    /// Hard delete. Stopping a live process first is the caller's job.
    async fn remove(&self, id: RuntimeId) -> Result<()>;
}
