//! The write path: embed, persist, index, and schedule a neighborhood
//! recompute for a new memory.
//!
//! Mirrors the shape of a transaction-scoped upsert: dedup is not checked
//! here (deduplication is a caller concern driven by the embedding cache
//! and [`crate::config::DEDUPLICATION_THRESHOLD`]); this function's job is
//! purely to persist a variant-tagged row plus its index/neighborhood
//! bookkeeping atomically.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::types::MemoryVariant;
use crate::index;
use crate::vector::f32_to_bytes;

/// Store a strategic memory and return its id.
pub fn store_strategic(
    conn: &mut Connection,
    content: &str,
    embedding: &[f32],
    confidence: f64,
    bucket_dims: usize,
) -> Result<String> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO strategic_memory (id, content, embedding, confidence, success_count, failure_count, last_applied_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 0, NULL, ?5, ?5)",
        params![id, content, f32_to_bytes(embedding), confidence.clamp(0.0, 1.0), now],
    )?;

    index::insert_into_bucket(&tx, &id, MemoryVariant::Strategic, embedding, bucket_dims)?;
    mark_neighborhood_stale(&tx, &id, MemoryVariant::Strategic)?;

    tx.commit()?;
    Ok(id)
}

/// Store an episodic, procedural, or semantic memory and return its id.
pub fn store_generic(
    conn: &mut Connection,
    variant: MemoryVariant,
    content: &str,
    embedding: &[f32],
    metadata: Option<&serde_json::Value>,
    bucket_dims: usize,
) -> Result<String> {
    anyhow::ensure!(
        matches!(
            variant,
            MemoryVariant::Episodic | MemoryVariant::Procedural | MemoryVariant::Semantic
        ),
        "store_generic only accepts episodic, procedural, or semantic variants"
    );

    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO memories (id, variant, content, embedding, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            id,
            variant.as_str(),
            content,
            f32_to_bytes(embedding),
            metadata.map(|m| m.to_string()),
            now
        ],
    )?;

    index::insert_into_bucket(&tx, &id, variant, embedding, bucket_dims)?;
    mark_neighborhood_stale(&tx, &id, variant)?;

    tx.commit()?;
    Ok(id)
}

/// Store a memcube and return its id.
pub fn store_cube(
    conn: &mut Connection,
    content: &str,
    embedding: &[f32],
    parent_id: Option<&str>,
    scope: Option<&str>,
    bucket_dims: usize,
) -> Result<String> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO memcubes (id, content, embedding, version, parent_id, scope, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?6)",
        params![id, content, f32_to_bytes(embedding), parent_id, scope, now],
    )?;

    index::insert_into_bucket(&tx, &id, MemoryVariant::Cube, embedding, bucket_dims)?;
    mark_neighborhood_stale(&tx, &id, MemoryVariant::Cube)?;

    tx.commit()?;
    Ok(id)
}

/// A freshly written memory has no neighborhood yet; insert a stale
/// placeholder row so `RefreshStaleNeighborhoods` will pick it up.
fn mark_neighborhood_stale(conn: &Connection, memory_id: &str, variant: MemoryVariant) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO memory_neighborhoods (memory_id, memory_type, neighbors, neighbor_count, computed_at, is_stale, embedding_hash)
         VALUES (?1, ?2, '{}', 0, ?3, 1, NULL)",
        params![memory_id, variant.as_str(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn embedding(seed: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 16];
        v[seed % 16] = 1.0;
        v
    }

    #[test]
    fn store_strategic_persists_row_and_bucket() {
        let mut conn = db::open_memory_database().unwrap();
        let id = store_strategic(&mut conn, "ship fast", &embedding(0), 0.8, 8).unwrap();

        let content: String = conn
            .query_row(
                "SELECT content FROM strategic_memory WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(content, "ship fast");

        let bucket_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM embedding_buckets WHERE memory_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(bucket_count, 1);
    }

    #[test]
    fn store_generic_rejects_strategic_and_cube() {
        let mut conn = db::open_memory_database().unwrap();
        let result = store_generic(
            &mut conn,
            MemoryVariant::Strategic,
            "oops",
            &embedding(1),
            None,
            8,
        );
        assert!(result.is_err());
    }

    #[test]
    fn store_generic_persists_semantic_memory() {
        let mut conn = db::open_memory_database().unwrap();
        let id = store_generic(
            &mut conn,
            MemoryVariant::Semantic,
            "rust uses ownership",
            &embedding(2),
            Some(&serde_json::json!({"source": "doc"})),
            8,
        )
        .unwrap();

        let (variant, content): (String, String) = conn
            .query_row(
                "SELECT variant, content FROM memories WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(variant, "semantic");
        assert_eq!(content, "rust uses ownership");
    }

    #[test]
    fn store_cube_defaults_to_version_one() {
        let mut conn = db::open_memory_database().unwrap();
        let id = store_cube(&mut conn, "artifact", &embedding(3), None, Some("global"), 8).unwrap();

        let version: u64 = conn
            .query_row(
                "SELECT version FROM memcubes WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn new_memory_starts_with_stale_neighborhood() {
        let mut conn = db::open_memory_database().unwrap();
        let id = store_strategic(&mut conn, "new", &embedding(4), 1.0, 8).unwrap();

        let is_stale: bool = conn
            .query_row(
                "SELECT is_stale FROM memory_neighborhoods WHERE memory_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert!(is_stale);
    }
}
