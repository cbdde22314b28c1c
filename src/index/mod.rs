//! LSH-style bucket index (§4.3 of the design).
//!
//! Each memory is assigned a single bucket via a fixed-width bit signature.
//! The signature partitions the embedding into `bucket_dims` equal windows;
//! bit *i* is set if the mean of window *i* is strictly positive. Search
//! probes the query's primary bucket plus every bucket at Hamming distance
//! 1, then reduces candidates to the top-K via [`crate::vector::top_k_heap`].
//!
//! This is a deliberately approximate scheme (recall is not guaranteed);
//! callers needing guaranteed recall should go through the neighborhood
//! fallback or a linear scan instead.

use rusqlite::{params, Connection};

use crate::memory::types::MemoryVariant;
use crate::vector::{cosine_similarity, top_k_heap, ScoredItem};

/// Compute the bit signature for an embedding, partitioned into `bucket_dims`
/// equal windows. Bit *i* is set iff the mean of window *i* is strictly
/// positive. Returns 0 for an empty embedding.
pub fn signature(embedding: &[f32], bucket_dims: usize) -> u32 {
    if embedding.is_empty() || bucket_dims == 0 {
        return 0;
    }

    let window = embedding.len().div_ceil(bucket_dims).max(1);
    let mut sig: u32 = 0;

    for i in 0..bucket_dims {
        let start = i * window;
        if start >= embedding.len() {
            break;
        }
        let end = (start + window).min(embedding.len());
        let slice = &embedding[start..end];
        let mean: f64 = slice.iter().map(|&x| x as f64).sum::<f64>() / slice.len() as f64;
        if mean > 0.0 {
            sig |= 1 << i;
        }
    }

    sig
}

/// Render a signature as lowercase hex — the persisted bucket id.
pub fn bucket_id_hex(sig: u32) -> String {
    format!("{sig:x}")
}

/// All signatures at Hamming distance 1 from `sig`, considering only the
/// low `bucket_dims` bits.
pub fn hamming1_neighbors(sig: u32, bucket_dims: usize) -> Vec<u32> {
    (0..bucket_dims).map(|i| sig ^ (1 << i)).collect()
}

/// Insert or replace a memory's bucket assignment.
pub fn insert_into_bucket(
    conn: &Connection,
    memory_id: &str,
    variant: MemoryVariant,
    embedding: &[f32],
    bucket_dims: usize,
) -> rusqlite::Result<()> {
    let bucket = bucket_id_hex(signature(embedding, bucket_dims));
    conn.execute(
        "INSERT INTO embedding_buckets (bucket_id, memory_id, memory_type) VALUES (?1, ?2, ?3)
         ON CONFLICT(memory_id) DO UPDATE SET bucket_id = excluded.bucket_id, memory_type = excluded.memory_type",
        params![bucket, memory_id, variant.as_str()],
    )?;
    Ok(())
}

/// Memory ids assigned to the query's primary bucket and every Hamming-1
/// neighbor bucket.
pub fn candidate_ids(
    conn: &Connection,
    query_embedding: &[f32],
    bucket_dims: usize,
) -> rusqlite::Result<Vec<String>> {
    let sig = signature(query_embedding, bucket_dims);
    let mut buckets: Vec<u32> = vec![sig];
    buckets.extend(hamming1_neighbors(sig, bucket_dims));

    let mut ids = Vec::new();
    let mut stmt = conn.prepare("SELECT memory_id FROM embedding_buckets WHERE bucket_id = ?1")?;
    for b in buckets {
        let hex = bucket_id_hex(b);
        let rows = stmt.query_map(params![hex], |r| r.get::<_, String>(0))?;
        for row in rows {
            ids.push(row?);
        }
    }
    Ok(ids)
}

/// Search the bucket index. `fetch_embedding` resolves a candidate memory
/// id to its embedding (looking it up in whichever table it belongs to);
/// candidates it cannot resolve are skipped. Candidates below
/// `similarity_threshold` are discarded before top-K selection.
pub fn search(
    conn: &Connection,
    query_embedding: &[f32],
    bucket_dims: usize,
    similarity_threshold: f64,
    k: usize,
    fetch_embedding: impl Fn(&str) -> Option<Vec<f32>>,
) -> rusqlite::Result<Vec<ScoredItem<String>>> {
    let ids = candidate_ids(conn, query_embedding, bucket_dims)?;

    let scored: Vec<ScoredItem<String>> = ids
        .into_iter()
        .filter_map(|id| {
            let emb = fetch_embedding(&id)?;
            let sim = cosine_similarity(query_embedding, &emb);
            (sim >= similarity_threshold).then_some(ScoredItem { score: sim, item: id })
        })
        .collect();

    Ok(top_k_heap(scored, k))
}

/// Truncate the bucket table and re-insert every provided `(id, variant,
/// embedding)` triple. Entries with an empty embedding are skipped (an
/// absent embedding has no bucket).
pub fn rebuild_index(
    conn: &Connection,
    bucket_dims: usize,
    entries: impl IntoIterator<Item = (String, MemoryVariant, Vec<f32>)>,
) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM embedding_buckets", [])?;
    let mut count = 0;
    for (id, variant, embedding) in entries {
        if embedding.is_empty() {
            continue;
        }
        insert_into_bucket(conn, &id, variant, &embedding, bucket_dims)?;
        count += 1;
    }
    Ok(count)
}
