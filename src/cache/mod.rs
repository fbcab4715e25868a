//! Key/value sentinel cache
//!
//! Only `set`, `delete` and prefix scans are needed; entries never expire.
//! Scans return keys in first-insertion order.

pub mod markers;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;

pub use markers::{RunningMarkers, RUNNING_MARKER_PREFIX};
pub use memory::InMemoryCache;
pub use postgres::PgCache;

#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Insert or overwrite. Overwriting keeps the key's scan position.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// No-op for a missing key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every key starting with `prefix`
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
