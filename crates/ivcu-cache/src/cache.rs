//! LRU + TTL cache with a cosine-similarity near-miss path, for skipping
//! generation entirely when a semantically-close intent was already solved.
//!
//! The background sweep runs on a plain OS thread rather than a tokio task —
//! this is genuinely blocking periodic housekeeping, not async work, the
//! same choice the Python prototype made with a `threading.Thread`.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

/// Minimum cosine similarity between embeddings for a near-miss hit.
pub const SIMILARITY_THRESHOLD: f32 = 0.92;

/// How often the background sweep evicts expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub embedding: Vec<f32>,
    pub value: Value,
    pub created_at: Instant,
    pub last_access: Instant,
}

struct Inner {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    ttl: Duration,
}

/// Thread-safe semantic cache. Clone is cheap (shares the inner map via
/// `Arc`); the background sweep is owned by whichever clone started it.
#[derive(Clone)]
pub struct SemanticCache {
    inner: Arc<Inner>,
}

impl SemanticCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                capacity,
                ttl,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Exact key lookup (the literal cache key, usually a hash of the raw
    /// intent + contracts).
    pub fn get_exact(&self, key: &str) -> Option<Value> {
        let mut entry = self.inner.entries.get_mut(key)?;
        if entry.created_at.elapsed() > self.inner.ttl {
            drop(entry);
            self.inner.entries.remove(key);
            return None;
        }
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    /// Near-miss lookup: returns the closest entry whose cosine similarity
    /// to `embedding` clears [`SIMILARITY_THRESHOLD`], if any.
    pub fn get_semantic(&self, embedding: &[f32]) -> Option<(String, Value, f32)> {
        let now = Instant::now();
        let mut best: Option<(String, Value, f32)> = None;
        for mut entry in self.inner.entries.iter_mut() {
            if now.duration_since(entry.created_at) > self.inner.ttl {
                continue;
            }
            let similarity = cosine_similarity(embedding, &entry.embedding);
            if similarity >= SIMILARITY_THRESHOLD
                && best.as_ref().map(|(_, _, s)| similarity > *s).unwrap_or(true)
            {
                entry.last_access = now;
                best = Some((entry.key.clone(), entry.value.clone(), similarity));
            }
        }
        best
    }

    pub fn put(&self, key: String, embedding: Vec<f32>, value: Value) {
        if self.inner.entries.len() >= self.inner.capacity && !self.inner.entries.contains_key(&key)
        {
            self.evict_lru();
        }
        let now = Instant::now();
        self.inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                embedding,
                value,
                created_at: now,
                last_access: now,
            },
        );
    }

    fn evict_lru(&self) {
        let oldest = self
            .inner
            .entries
            .iter()
            .min_by_key(|e| e.last_access)
            .map(|e| e.key.clone());
        if let Some(key) = oldest {
            self.inner.entries.remove(&key);
        }
    }

    fn sweep_once(&self) -> usize {
        let ttl = self.inner.ttl;
        let expired: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.created_at.elapsed() > ttl)
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            self.inner.entries.remove(key);
        }
        expired.len()
    }

    /// Spawns the background sweep thread. The returned handle stops the
    /// thread (and joins it) when dropped.
    pub fn start_sweep(&self, interval: Duration) -> SweepHandle {
        let cache = self.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            info!("semantic cache sweep thread started");
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let evicted = cache.sweep_once();
                        if evicted > 0 {
                            debug!(evicted, "semantic cache sweep evicted expired entries");
                        }
                    }
                }
            }
            info!("semantic cache sweep thread stopped");
        });
        SweepHandle {
            shutdown_tx,
            handle: Some(handle),
        }
    }
}

/// RAII handle for the background sweep thread.
pub struct SweepHandle {
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_hit_then_ttl_expiry() {
        let cache = SemanticCache::new(10, Duration::from_millis(20));
        cache.put("k1".to_string(), vec![1.0, 0.0], Value::from("v1"));
        assert_eq!(cache.get_exact("k1"), Some(Value::from("v1")));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get_exact("k1"), None);
    }

    #[test]
    fn semantic_hit_above_threshold() {
        let cache = SemanticCache::new(10, Duration::from_secs(60));
        cache.put("k1".to_string(), vec![1.0, 0.0, 0.0], Value::from("sorted"));
        let near = cosine_similarity(&[0.99, 0.05, 0.0], &[1.0, 0.0, 0.0]);
        assert!(near >= SIMILARITY_THRESHOLD);
        let hit = cache.get_semantic(&[0.99, 0.05, 0.0]);
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().1, Value::from("sorted"));
    }

    #[test]
    fn semantic_miss_below_threshold() {
        let cache = SemanticCache::new(10, Duration::from_secs(60));
        cache.put("k1".to_string(), vec![1.0, 0.0, 0.0], Value::from("sorted"));
        let hit = cache.get_semantic(&[0.0, 1.0, 0.0]);
        assert!(hit.is_none());
    }

    #[test]
    fn eviction_drops_lru_when_at_capacity() {
        let cache = SemanticCache::new(1, Duration::from_secs(60));
        cache.put("k1".to_string(), vec![1.0], Value::from("first"));
        cache.put("k2".to_string(), vec![1.0], Value::from("second"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get_exact("k1").is_none());
        assert_eq!(cache.get_exact("k2"), Some(Value::from("second")));
    }
}
