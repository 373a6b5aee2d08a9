//! Short-TTL key-value store for sync tokens. Mirrors `ivcu-store`'s
//! DB/in-memory duality: a real deployment points this at Redis, tests and
//! single-process use get the in-memory fallback, grounded on
//! `projection_engine.py::ConsistencyManager`'s Redis-or-local-cache split.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::ProjectionError;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ProjectionError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ProjectionError>;
}

pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ProjectionError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ProjectionError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entry_reads_back_as_absent() {
        let store = InMemoryKvStore::new();
        store.set("k", "v", Duration::from_millis(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
