use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::KeyValueCache;
use crate::error::Result;

#[derive(Default)]
struct Entries {
    /// key -> (insertion sequence, value)
    map: HashMap<String, (u64, String)>,
    next_seq: u64,
}

/// Cache held in process memory; does not survive a restart
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<Entries>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .map
            .get(key)
            .map(|(_, value)| value.clone())
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let seq = match entries.map.get(key) {
            Some((seq, _)) => *seq,
            None => {
                entries.next_seq += 1;
                entries.next_seq
            }
        };
        entries.map.insert(key.to_string(), (seq, value.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.map.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut matched: Vec<(u64, &String)> = entries
            .map
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (seq, _))| (*seq, key))
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);
        Ok(matched.into_iter().map(|(_, key)| key.clone()).collect())
    }
}
