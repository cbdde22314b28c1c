//! Time/size-bounded episode windows (§4.7).
//!
//! An episode groups memories (usually episodic-variant) that happened
//! close together in time. A new episode starts when either the previous
//! one has grown past `max_members` or the gap since its last member
//! exceeds `gap_minutes`.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::memory::types::MemoryVariant;
use crate::vector::cosine_similarity;

/// Get the most recently active episode of `episode_type`, creating a new
/// one if there is none, the active one is full, or the gap since its last
/// addition exceeds `gap_minutes`.
pub fn get_or_create_episode(
    conn: &Connection,
    episode_type: &str,
    title: Option<&str>,
    gap_minutes: i64,
    max_members: usize,
) -> Result<String> {
    let active: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT id, started_at, memory_count FROM memory_episodes
             WHERE episode_type = ?1 AND is_active = 1
             ORDER BY started_at DESC LIMIT 1",
            params![episode_type],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    if let Some((id, started_at, member_count)) = active {
        let last_activity: Option<String> = conn
            .query_row(
                "SELECT added_at FROM episode_members WHERE episode_id = ?1 ORDER BY added_at DESC LIMIT 1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;

        let reference = last_activity.unwrap_or(started_at);
        let gap_ok = match crate::db::parse_timestamp(&reference) {
            Some(ts) => {
                let elapsed = Utc::now().signed_duration_since(ts);
                elapsed.num_minutes() < gap_minutes
            }
            None => false,
        };

        if gap_ok && (member_count as usize) < max_members {
            return Ok(id);
        }

        conn.execute(
            "UPDATE memory_episodes SET is_active = 0, ended_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
    }

    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO memory_episodes (id, episode_type, started_at, ended_at, title, summary, summary_embedding, memory_count, token_estimate, summary_tokens, compression_ratio, metadata, is_active)
         VALUES (?1, ?2, ?3, NULL, ?4, NULL, NULL, 0, 0, 0, NULL, NULL, 1)",
        params![id, episode_type, now, title],
    )?;

    Ok(id)
}

/// Add a memory to an episode, assigning it the next sequence number.
/// Idempotent: adding the same (episode, memory) pair twice is a no-op.
pub fn add_memory(
    conn: &Connection,
    episode_id: &str,
    memory_id: &str,
    variant: MemoryVariant,
    estimated_tokens: i64,
) -> Result<()> {
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence_num), 0) + 1 FROM episode_members WHERE episode_id = ?1",
        params![episode_id],
        |r| r.get(0),
    )?;

    let changed = conn.execute(
        "INSERT OR IGNORE INTO episode_members (episode_id, memory_id, memory_type, sequence_num, added_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![episode_id, memory_id, variant.as_str(), next_seq, Utc::now().to_rfc3339()],
    )?;

    if changed > 0 {
        conn.execute(
            "UPDATE memory_episodes SET memory_count = memory_count + 1, token_estimate = token_estimate + ?1 WHERE id = ?2",
            params![estimated_tokens, episode_id],
        )?;
    }

    Ok(())
}

/// Set an episode's summary. `embed` resolves the summary text to an
/// embedding best-effort; a `None` (embedding unavailable) just skips
/// persisting `summary_embedding` rather than failing the whole call.
pub fn set_summary(
    conn: &Connection,
    episode_id: &str,
    summary: &str,
    embed: impl FnOnce(&str) -> Option<Vec<f32>>,
) -> Result<()> {
    let summary_tokens = (summary.len() as f64 / 4.0).ceil() as i64;
    let embedding = embed(summary);

    let token_estimate: i64 = conn.query_row(
        "SELECT token_estimate FROM memory_episodes WHERE id = ?1",
        params![episode_id],
        |r| r.get(0),
    )?;
    let compression_ratio = if token_estimate > 0 {
        Some(summary_tokens as f64 / token_estimate as f64)
    } else {
        None
    };

    conn.execute(
        "UPDATE memory_episodes SET summary = ?1, summary_embedding = ?2, summary_tokens = ?3, compression_ratio = ?4 WHERE id = ?5",
        params![
            summary,
            embedding.as_ref().map(|e| crate::vector::f32_to_bytes(e)),
            summary_tokens,
            compression_ratio,
            episode_id,
        ],
    )?;

    Ok(())
}

/// An episode matched by similarity search, with its summary similarity.
pub struct SimilarEpisode {
    pub id: String,
    pub title: Option<String>,
    pub similarity: f64,
}

/// Find episodes whose summary embedding is at least `0.5` cosine similar
/// to `query_embedding`, by a linear scan over summarized episodes, sorted
/// descending and truncated to `k`.
pub fn search_similar_episodes(
    conn: &Connection,
    query_embedding: &[f32],
    k: usize,
) -> Result<Vec<SimilarEpisode>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, summary_embedding FROM memory_episodes WHERE summary_embedding IS NOT NULL",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?, r.get::<_, Vec<u8>>(2)?))
    })?;

    let mut scored = Vec::new();
    for row in rows {
        let (id, title, bytes) = row?;
        let embedding = crate::vector::bytes_to_f32(&bytes);
        let sim = cosine_similarity(query_embedding, &embedding);
        if sim >= 0.5 {
            scored.push(SimilarEpisode { id, title, similarity: sim });
        }
    }

    scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
    scored.truncate(k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn unit(dim: usize, len: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; len];
        v[dim % len] = 1.0;
        v
    }

    #[test]
    fn get_or_create_episode_reuses_active_episode() {
        let conn = db::open_memory_database().unwrap();
        let a = get_or_create_episode(&conn, "chat", Some("t1"), 30, 50).unwrap();
        let b = get_or_create_episode(&conn, "chat", Some("t1"), 30, 50).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn get_or_create_episode_starts_new_when_full() {
        let conn = db::open_memory_database().unwrap();
        let a = get_or_create_episode(&conn, "chat", None, 30, 2).unwrap();
        add_memory(&conn, &a, "m1", MemoryVariant::Episodic, 10).unwrap();
        add_memory(&conn, &a, "m2", MemoryVariant::Episodic, 10).unwrap();

        let b = get_or_create_episode(&conn, "chat", None, 30, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn add_memory_assigns_sequence_numbers() {
        let conn = db::open_memory_database().unwrap();
        let ep = get_or_create_episode(&conn, "chat", None, 30, 50).unwrap();
        add_memory(&conn, &ep, "m1", MemoryVariant::Episodic, 5).unwrap();
        add_memory(&conn, &ep, "m2", MemoryVariant::Episodic, 5).unwrap();

        let seqs: Vec<i64> = {
            let mut stmt = conn
                .prepare("SELECT sequence_num FROM episode_members WHERE episode_id = ?1 ORDER BY sequence_num")
                .unwrap();
            stmt.query_map(params![ep], |r| r.get(0))
                .unwrap()
                .collect::<rusqlite::Result<Vec<_>>>()
                .unwrap()
        };
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn add_memory_is_idempotent() {
        let conn = db::open_memory_database().unwrap();
        let ep = get_or_create_episode(&conn, "chat", None, 30, 50).unwrap();
        add_memory(&conn, &ep, "m1", MemoryVariant::Episodic, 5).unwrap();
        add_memory(&conn, &ep, "m1", MemoryVariant::Episodic, 5).unwrap();

        let count: i64 = conn
            .query_row("SELECT memory_count FROM memory_episodes WHERE id = ?1", params![ep], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn set_summary_computes_compression_ratio() {
        let conn = db::open_memory_database().unwrap();
        let ep = get_or_create_episode(&conn, "chat", None, 30, 50).unwrap();
        add_memory(&conn, &ep, "m1", MemoryVariant::Episodic, 100).unwrap();

        set_summary(&conn, &ep, "short summary", |_| Some(unit(0, 8))).unwrap();

        let (summary, ratio): (String, f64) = conn
            .query_row(
                "SELECT summary, compression_ratio FROM memory_episodes WHERE id = ?1",
                params![ep],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(summary, "short summary");
        assert!(ratio > 0.0 && ratio < 1.0);
    }

    #[test]
    fn search_similar_episodes_orders_by_similarity() {
        let conn = db::open_memory_database().unwrap();
        let close = get_or_create_episode(&conn, "chat", None, 30, 50).unwrap();
        set_summary(&conn, &close, "a", |_| Some(unit(0, 8))).unwrap();

        let results = search_similar_episodes(&conn, &unit(0, 8), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, close);
    }
}
