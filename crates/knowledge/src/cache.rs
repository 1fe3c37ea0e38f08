//! LRU embedding cache
//!
//! Query texts repeat heavily in decision flows; caching the embedding
//! avoids recomputing it. Soft-capped, per-process, invalidated only by
//! eviction (embeddings are referentially transparent).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::embeddings::{Embedder, EmbeddingMode};
use crate::KnowledgeError;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct CacheInner {
    map: HashMap<String, Vec<f32>>,
    /// Access order, oldest first. Touched keys move to the back.
    order: Vec<String>,
}

/// Bounded LRU map from query text to embedding.
pub struct EmbeddingCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: Vec::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock();
        if let Some(embedding) = inner.map.get(text).cloned() {
            if let Some(position) = inner.order.iter().position(|k| k == text) {
                let key = inner.order.remove(position);
                inner.order.push(key);
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(embedding)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, text: &str, embedding: Vec<f32>) {
        let mut inner = self.inner.lock();
        if inner.map.insert(text.to_string(), embedding).is_none() {
            inner.order.push(text.to_string());
        }
        while inner.map.len() > self.capacity {
            let oldest = inner.order.remove(0);
            inner.map.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.inner.lock().map.len(),
        }
    }
}

/// An [`Embedder`] wrapper that consults the cache first.
pub struct CachedEmbedder {
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(embedder: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            embedder,
            cache: EmbeddingCache::new(capacity),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Embedder for CachedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        if let Some(embedding) = self.cache.get(text) {
            metrics::counter!("sentinel_knowledge_embedding_cache_hits_total").increment(1);
            return Ok(embedding);
        }
        let embedding = self.embedder.embed(text)?;
        self.cache.put(text, embedding.clone());
        Ok(embedding)
    }

    fn dim(&self) -> usize {
        self.embedder.dim()
    }

    fn mode(&self) -> EmbeddingMode {
        self.embedder.mode()
    }
}
