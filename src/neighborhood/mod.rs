//! Per-memory top-K neighbor cache with staleness tracking (§4.4).

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::json;

use sha2::{Digest, Sha256};

use crate::index;
use crate::memory::types::MemoryVariant;
use crate::vector::{cosine_similarity, f32_to_bytes, top_k_heap, ScoredItem};

/// Hex digest of an embedding's byte encoding — used to detect, on refresh,
/// whether the embedding a neighborhood was computed against has changed.
fn embedding_hash(embedding: &[f32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(f32_to_bytes(embedding));
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// A materialized neighbor of some memory.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborResult {
    pub id: String,
    pub similarity: f64,
}

/// A memory embedding candidate loaded from the relational store.
pub struct Candidate {
    pub id: String,
    pub variant: MemoryVariant,
    pub embedding: Vec<f32>,
}

/// Fetch candidate memories with non-null embeddings: strategic memories
/// always, episodic memories when `include_episodic` is set — per the
/// open question on inclusion-set configurability, this is a tunable
/// rather than a hard-coded join.
pub fn fetch_candidates(conn: &Connection, include_episodic: bool) -> Result<Vec<Candidate>> {
    let mut out = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT id, embedding FROM strategic_memory WHERE embedding IS NOT NULL",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (id, bytes) = row?;
        out.push(Candidate {
            id,
            variant: MemoryVariant::Strategic,
            embedding: crate::vector::bytes_to_f32(&bytes),
        });
    }

    if include_episodic {
        let mut stmt = conn.prepare(
            "SELECT id, embedding FROM memories WHERE variant = 'episodic' AND embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
        })?;
        for row in rows {
            let (id, bytes) = row?;
            out.push(Candidate {
                id,
                variant: MemoryVariant::Episodic,
                embedding: crate::vector::bytes_to_f32(&bytes),
            });
        }
    }

    Ok(out)
}

/// Compute and persist a memory's neighborhood against the current
/// candidate pool, keeping neighbors with similarity `>= threshold`, sorted
/// descending, truncated to `limit`.
pub fn compute_neighborhood(
    conn: &Connection,
    memory_id: &str,
    variant: MemoryVariant,
    embedding: &[f32],
    limit: usize,
    threshold: f64,
    include_episodic: bool,
) -> Result<()> {
    let candidates = fetch_candidates(conn, include_episodic)?;

    let scored: Vec<ScoredItem<String>> = candidates
        .into_iter()
        .filter(|c| c.id != memory_id)
        .filter_map(|c| {
            let sim = cosine_similarity(embedding, &c.embedding);
            (sim >= threshold).then_some(ScoredItem { score: sim, item: c.id })
        })
        .collect();

    let top = top_k_heap(scored, limit);

    let mut neighbors = serde_json::Map::new();
    for s in &top {
        neighbors.insert(s.item.clone(), json!(s.score));
    }

    let hash = embedding_hash(embedding);
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO memory_neighborhoods (memory_id, memory_type, neighbors, neighbor_count, computed_at, is_stale, embedding_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
         ON CONFLICT(memory_id) DO UPDATE SET
            memory_type = excluded.memory_type,
            neighbors = excluded.neighbors,
            neighbor_count = excluded.neighbor_count,
            computed_at = excluded.computed_at,
            is_stale = 0,
            embedding_hash = excluded.embedding_hash",
        params![
            memory_id,
            variant.as_str(),
            serde_json::Value::Object(neighbors).to_string(),
            top.len() as i64,
            now,
            hash,
        ],
    )?;

    Ok(())
}

/// Return the materialized neighbors of a memory. Stale or missing
/// entries return an empty vector.
pub fn get_neighbors(conn: &Connection, memory_id: &str) -> Result<Vec<NeighborResult>> {
    let row: Option<(String, bool)> = conn
        .query_row(
            "SELECT neighbors, is_stale FROM memory_neighborhoods WHERE memory_id = ?1",
            params![memory_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let Some((neighbors_json, is_stale)) = row else {
        return Ok(Vec::new());
    };
    if is_stale {
        return Ok(Vec::new());
    }

    let map: HashMap<String, f64> = serde_json::from_str(&neighbors_json).unwrap_or_default();
    let mut out: Vec<NeighborResult> = map
        .into_iter()
        .map(|(id, similarity)| NeighborResult { id, similarity })
        .collect();
    out.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
    Ok(out)
}

/// Invalidate a single memory's neighborhood.
pub fn mark_stale(conn: &Connection, memory_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE memory_neighborhoods SET is_stale = 1 WHERE memory_id = ?1",
        params![memory_id],
    )?;
    Ok(())
}

/// Invalidate every neighborhood.
pub fn mark_all_stale(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE memory_neighborhoods SET is_stale = 1", [])?;
    Ok(())
}

/// Re-embed and recompute up to `batch_size` stale neighborhoods.
/// `fetch_embedding` resolves a memory id (with its stored variant) to its
/// current embedding; entries it cannot resolve, or whose recompute fails,
/// are skipped rather than aborting the batch.
pub fn refresh_stale_neighborhoods(
    conn: &Connection,
    batch_size: usize,
    limit: usize,
    threshold: f64,
    include_episodic: bool,
    fetch_embedding: impl Fn(&str, MemoryVariant) -> Option<Vec<f32>>,
) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT memory_id, memory_type FROM memory_neighborhoods WHERE is_stale = 1 LIMIT ?1",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map(params![batch_size as i64], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut refreshed = 0;
    for (id, variant_str) in rows {
        let Ok(variant) = variant_str.parse::<MemoryVariant>() else {
            continue;
        };
        let Some(embedding) = fetch_embedding(&id, variant) else {
            continue;
        };
        if compute_neighborhood(conn, &id, variant, &embedding, limit, threshold, include_episodic)
            .is_ok()
        {
            refreshed += 1;
        }
    }

    Ok(refreshed)
}

/// Bucket-index search, augmented by the neighbors of the top-1 hit when
/// fewer than `k` results come back from the index alone.
pub fn search_with_neighbor_fallback(
    conn: &Connection,
    query_embedding: &[f32],
    bucket_dims: usize,
    similarity_threshold: f64,
    k: usize,
    fetch_embedding: impl Fn(&str) -> Option<Vec<f32>>,
) -> Result<Vec<ScoredItem<String>>> {
    let mut results = index::search(
        conn,
        query_embedding,
        bucket_dims,
        similarity_threshold,
        k,
        &fetch_embedding,
    )?;

    if results.len() < k {
        if let Some(top) = results.first().cloned() {
            let mut seen: std::collections::HashSet<String> =
                results.iter().map(|r| r.item.clone()).collect();
            seen.insert(top.item.clone());

            for neighbor in get_neighbors(conn, &top.item)? {
                if results.len() >= k {
                    break;
                }
                if seen.insert(neighbor.id.clone()) {
                    results.push(ScoredItem {
                        score: neighbor.similarity,
                        item: neighbor.id,
                    });
                }
            }
        }
    }

    Ok(results)
}
