//! Content-addressed, persistently memoized embedding cache (§4.2).
//!
//! Given a text, the cache returns its embedding, hitting the persistent
//! store if the content's SHA-256 hex digest is present and the stored
//! dimension matches the wrapped provider's dimension — a dimension
//! mismatch is treated as a miss, never a false hit, per the engine's
//! "`Inconsistent` becomes a cache miss" propagation policy.
//!
//! Writes are asynchronous and best-effort: on a runtime, the upsert is
//! launched as a detached task bounded by a 5-second deadline and its
//! result is only logged, never propagated to the caller; outside a
//! runtime (e.g. plain unit tests) the write happens inline so tests don't
//! need to race a background task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::error::EngineError;
use crate::vector::{bytes_to_f32, f32_to_bytes};

/// SHA-256 hex digest of a text's UTF-8 bytes — the cache's lookup key.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Wraps an [`EmbeddingProvider`] with a content-hashed, persisted cache.
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    db: Arc<Mutex<Connection>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, db: Arc<Mutex<Connection>>) -> Self {
        Self {
            provider,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Look up a cached embedding by content hash. Returns `None` on a
    /// miss or on a dimension mismatch against the wrapped provider.
    ///
    /// The underlying `rusqlite::Error` is classified through
    /// [`EngineError`] to decide the degrade-vs-surface boundary: a
    /// `NotFound` (no row) collapses to a plain cache miss, while anything
    /// else (lock contention, a corrupt backend) is surfaced as an error
    /// instead of silently masquerading as a miss.
    fn lookup(&self, hash: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.db.lock().map_err(|_| anyhow::anyhow!("embedding cache db lock poisoned"))?;
        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT embedding, dimension FROM content_embedding_cache WHERE content_hash = ?1",
                params![hash],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match EngineError::from(e) {
                EngineError::NotFound(_) => Ok(None),
                other => Err(anyhow::anyhow!(other)),
            })?;

        match row {
            None => Ok(None),
            Some((bytes, dim)) if dim as usize == self.provider.dimension() => {
                Ok(Some(bytes_to_f32(&bytes)))
            }
            Some(_) => Ok(None),
        }
    }

    /// Embed `text`, consulting and updating the cache.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let hash = content_hash(text);

        if let Some(vector) = self.lookup(&hash)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.touch(hash);
            return Ok(vector);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = self.provider.embed(text)?;
        self.write_back(hash, vector.clone());
        Ok(vector)
    }

    /// Embed a batch of texts. Splits into cached/uncached subsets, calls
    /// the provider once for the uncached tail, and reassembles results in
    /// the original order.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut uncached_idx = Vec::new();
        let mut uncached_texts = Vec::new();
        let mut hashes = HashMap::new();

        for (i, &text) in texts.iter().enumerate() {
            let hash = content_hash(text);
            match self.lookup(&hash)? {
                Some(v) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    self.touch(hash);
                    results.push(Some(v));
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    uncached_idx.push(i);
                    uncached_texts.push(text);
                    hashes.insert(i, hash);
                    results.push(None);
                }
            }
        }

        if !uncached_texts.is_empty() {
            let embedded = self.provider.embed_batch(&uncached_texts)?;
            for (slot, vector) in uncached_idx.into_iter().zip(embedded.into_iter()) {
                let hash = hashes.remove(&slot).expect("hash recorded for uncached slot");
                self.write_back(hash, vector.clone());
                results[slot] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.expect("every slot filled")).collect())
    }

    /// Remove cache entries not used within `days` days.
    pub fn evict_stale(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let conn = self.db.lock().map_err(|_| anyhow::anyhow!("embedding cache db lock poisoned"))?;
        let removed = conn.execute(
            "DELETE FROM content_embedding_cache WHERE last_used_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    fn touch(&self, hash: String) {
        let db = self.db.clone();
        run_detached(move || {
            let now = Utc::now().to_rfc3339();
            let conn = match db.lock() {
                Ok(c) => c,
                Err(_) => return,
            };
            if let Err(e) = conn.execute(
                "UPDATE content_embedding_cache SET last_used_at = ?1, use_count = use_count + 1 WHERE content_hash = ?2",
                params![now, hash],
            ) {
                tracing::warn!(error = %e, "embedding cache touch failed");
            }
        });
    }

    fn write_back(&self, hash: String, vector: Vec<f32>) {
        let db = self.db.clone();
        let dim = vector.len() as i64;
        let model_id = self.provider.model_name().to_string();
        run_detached(move || {
            let now = Utc::now().to_rfc3339();
            let conn = match db.lock() {
                Ok(c) => c,
                Err(_) => return,
            };
            if let Err(e) = conn.execute(
                "INSERT INTO content_embedding_cache (content_hash, embedding, dimension, model_id, created_at, last_used_at, use_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)
                 ON CONFLICT(content_hash) DO UPDATE SET last_used_at = excluded.last_used_at, use_count = use_count + 1",
                params![hash, f32_to_bytes(&vector), dim, model_id, now],
            ) {
                tracing::warn!(error = %e, "embedding cache write-back failed");
            }
        });
    }
}

/// Run `f` as a detached, 5-second-bounded task if a tokio runtime is
/// available; otherwise run it inline. Errors are only logged by `f`
/// itself, never surfaced to the caller.
fn run_detached(f: impl FnOnce() + Send + 'static) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            let _ = tokio::time::timeout(Duration::from_secs(5), async {
                let _ = tokio::task::spawn_blocking(f).await;
            })
            .await;
        });
    } else {
        f();
    }
}
