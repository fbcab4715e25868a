use std::sync::Arc;
use tracing::{debug, warn};

use super::KeyValueCache;
use crate::domain::RuntimeId;
use crate::error::Result;

/// Fixed key prefix of running markers
pub const RUNNING_MARKER_PREFIX: &str = "ENABLED_RUNTIME_PREFIX";

const SEPARATOR: &str = "::";
const SENTINEL: &str = "1";

/// Records which runtimes should be running, for restart after a shutdown.
///
/// Only consulted by recovery. A process that dies on its own leaves its
/// marker behind until the next recovery pass.
#[derive(Clone)]
pub struct RunningMarkers {
    cache: Arc<dyn KeyValueCache>,
    prefix: String,
}

impl RunningMarkers {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self::with_prefix(cache, RUNNING_MARKER_PREFIX)
    }

    pub fn with_prefix(cache: Arc<dyn KeyValueCache>, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
        }
    }

    /// `"<prefix>::<id>"`
    pub fn key(&self, id: RuntimeId) -> String {
        format!("{}{}{}", self.prefix, SEPARATOR, id)
    }

    pub async fn mark(&self, id: RuntimeId) -> Result<()> {
        debug!("Marking runtime {} as running", id);
        self.cache.set(&self.key(id), SENTINEL).await
    }

    pub async fn unmark(&self, id: RuntimeId) -> Result<()> {
        debug!("Clearing running marker of runtime {}", id);
        self.cache.delete(&self.key(id)).await
    }

    pub async fn is_marked(&self, id: RuntimeId) -> Result<bool> {
        let key = self.key(id);
        Ok(self.ids_from(&key).await?.contains(&id))
    }

    /// Marked ids in marker order. Keys with a non-numeric suffix are skipped.
    pub async fn ids(&self) -> Result<Vec<RuntimeId>> {
        let scan = format!("{}{}", self.prefix, SEPARATOR);
        self.ids_from(&scan).await
    }

    async fn ids_from(&self, scan: &str) -> Result<Vec<RuntimeId>> {
        let keys = self.cache.keys(scan).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let suffix = key.rsplit(SEPARATOR).next().unwrap_or_default();
                match suffix.parse::<RuntimeId>() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!("Ignoring running marker with unexpected key: {}", key);
                        None
                    }
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[tokio::test]
    async fn test_mark_and_unmark() {
        let markers = RunningMarkers::new(Arc::new(InMemoryCache::new()));
        assert_eq!(markers.key(4), "ENABLED_RUNTIME_PREFIX::4");

        markers.mark(4).await.unwrap();
        markers.mark(40).await.unwrap();
        assert!(markers.is_marked(4).await.unwrap());
        assert_eq!(markers.ids().await.unwrap(), vec![4, 40]);

        markers.unmark(4).await.unwrap();
        assert!(!markers.is_marked(4).await.unwrap());
        assert!(markers.is_marked(40).await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_keys_are_skipped() {
        let cache = Arc::new(InMemoryCache::new());
        cache.set("ENABLED_RUNTIME_PREFIX::abc", "1").await.unwrap();
        cache.set("ENABLED_RUNTIME_PREFIX::7", "1").await.unwrap();
        cache.set("SOMETHING_ELSE::8", "1").await.unwrap();

        let markers = RunningMarkers::new(cache);
        assert_eq!(markers.ids().await.unwrap(), vec![7]);
    }
}
