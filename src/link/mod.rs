//! Typed directed link graph between memories, plus routing edges (§4.6).
//!
//! Unlike the teacher's single (subject, predicate, object) entity triple,
//! links here are typed by a closed `rel_type` enum and carry a confidence
//! score; the same (source, target, rel_type) triple is upserted rather
//! than silently deduplicated with a reused id.

use std::collections::{HashSet, VecDeque};

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config;
use crate::embedding::EmbeddingProvider;
use crate::llm::{parse_relationship_classification, ClassifiedRelationship, LlmProvider};
use crate::memory::types::MemoryVariant;
use crate::vector::cosine_similarity;

/// The relationship types a link can carry — the closed set allowed by the
/// `memory_links.rel_type` CHECK constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelType {
    Contradicts,
    Supports,
    EvolvedFrom,
    RelatedTo,
    CausedBy,
    LeadsTo,
    RoutingDecision,
    CapabilityScore,
    ContextWindow,
    TaskAffinity,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Contradicts => "contradicts",
            RelType::Supports => "supports",
            RelType::EvolvedFrom => "evolved_from",
            RelType::RelatedTo => "related_to",
            RelType::CausedBy => "caused_by",
            RelType::LeadsTo => "leads_to",
            RelType::RoutingDecision => "routing_decision",
            RelType::CapabilityScore => "capability_score",
            RelType::ContextWindow => "context_window",
            RelType::TaskAffinity => "task_affinity",
        }
    }
}

/// A single edge loaded back from `memory_links`.
#[derive(Debug, Clone)]
pub struct Link {
    pub source_id: String,
    pub target_id: String,
    pub source_type: MemoryVariant,
    pub target_type: MemoryVariant,
    pub rel_type: String,
    pub confidence: f64,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
    pub created_by: String,
}

/// Create (or update, on a repeat triple) a typed link between two memories.
/// Manual link creation does not reject self-links — nothing about the
/// schema or this operation's contract implies (source != target); only
/// the auto-linker, which exists to avoid a memory linking to itself by
/// construction, enforces that.
pub fn create_link(
    conn: &Connection,
    source_id: &str,
    source_type: MemoryVariant,
    target_id: &str,
    target_type: MemoryVariant,
    rel_type: RelType,
    confidence: f64,
    metadata: Option<&serde_json::Value>,
    created_by: &str,
) -> Result<()> {
    if source_id.is_empty() || target_id.is_empty() {
        bail!("source_id and target_id must be non-empty");
    }

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO memory_links (source_id, target_id, source_type, target_type, rel_type, confidence, metadata, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(source_id, target_id, rel_type) DO UPDATE SET
            confidence = excluded.confidence,
            metadata = excluded.metadata,
            created_at = excluded.created_at,
            created_by = excluded.created_by",
        params![
            source_id,
            target_id,
            source_type.as_str(),
            target_type.as_str(),
            rel_type.as_str(),
            confidence.clamp(0.0, 1.0),
            metadata.map(|m| m.to_string()),
            now,
            created_by,
        ],
    )?;

    Ok(())
}

fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<Link> {
    let source_type: String = row.get(2)?;
    let target_type: String = row.get(3)?;
    let metadata: Option<String> = row.get(6)?;
    Ok(Link {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        source_type: source_type.parse().unwrap_or(MemoryVariant::Strategic),
        target_type: target_type.parse().unwrap_or(MemoryVariant::Strategic),
        rel_type: row.get(4)?,
        confidence: row.get(5)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(7)?,
        created_by: row.get(8)?,
    })
}

const LINK_COLUMNS: &str =
    "source_id, target_id, source_type, target_type, rel_type, confidence, metadata, created_at, created_by";

/// All links touching `memory_id` (as source or target), optionally
/// filtered to a subset of relationship types.
pub fn get_linked_memories(
    conn: &Connection,
    memory_id: &str,
    rel_types: Option<&[&str]>,
) -> Result<Vec<Link>> {
    let sql = format!(
        "SELECT {LINK_COLUMNS} FROM memory_links WHERE (source_id = ?1 OR target_id = ?1)"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![memory_id], row_to_link)?;

    let mut out = Vec::new();
    for row in rows {
        let link = row?;
        let matches = match rel_types {
            Some(types) => types.contains(&link.rel_type.as_str()),
            None => true,
        };
        if matches {
            out.push(link);
        }
    }
    Ok(out)
}

/// Breadth-first traversal of the link graph from `start`, up to
/// `max_depth` hops (values `<= 0` default to 3). Returns every memory id
/// reached, including `start`.
pub fn traverse_links(conn: &Connection, start: &str, max_depth: i64) -> Result<Vec<String>> {
    let max_depth = if max_depth <= 0 { 3 } else { max_depth };

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.to_string());
    let mut queue: VecDeque<(String, i64)> = VecDeque::new();
    queue.push_back((start.to_string(), 0));

    let mut order = vec![start.to_string()];

    while let Some((id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for link in get_linked_memories(conn, &id, None)? {
            let other = if link.source_id == id { link.target_id } else { link.source_id };
            if visited.insert(other.clone()) {
                order.push(other.clone());
                queue.push_back((other, depth + 1));
            }
        }
    }

    Ok(order)
}

/// A candidate memory considered for similarity-based linking.
pub struct SimilarMemory {
    pub id: String,
    pub variant: MemoryVariant,
    pub embedding: Vec<f32>,
}

/// Find memories similar to `embedding`, scanning at most 100 strategic
/// memories (ordered by confidence, then recency) and 100 most recent
/// episodic memories — a bounded linear scan used when the bucket index
/// and neighborhood cache can't answer (e.g. a brand new memory with no
/// neighborhood computed yet).
pub fn find_similar_memories(
    conn: &Connection,
    embedding: &[f32],
    threshold: f64,
    exclude_id: &str,
) -> Result<Vec<(String, MemoryVariant, f64)>> {
    let mut out = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT id, embedding FROM strategic_memory WHERE embedding IS NOT NULL AND id != ?1
         ORDER BY confidence DESC, updated_at DESC LIMIT 100",
    )?;
    let rows = stmt.query_map(params![exclude_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (id, bytes) = row?;
        let candidate = crate::vector::bytes_to_f32(&bytes);
        let sim = cosine_similarity(embedding, &candidate);
        if sim >= threshold {
            out.push((id, MemoryVariant::Strategic, sim));
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, embedding FROM memories WHERE variant = 'episodic' AND embedding IS NOT NULL AND id != ?1
         ORDER BY created_at DESC LIMIT 100",
    )?;
    let rows = stmt.query_map(params![exclude_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (id, bytes) = row?;
        let candidate = crate::vector::bytes_to_f32(&bytes);
        let sim = cosine_similarity(embedding, &candidate);
        if sim >= threshold {
            out.push((id, MemoryVariant::Episodic, sim));
        }
    }

    Ok(out)
}

/// Does a link already exist between these two ids, in either direction?
fn link_exists(conn: &Connection, a: &str, b: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM memory_links WHERE (source_id = ?1 AND target_id = ?2) OR (source_id = ?2 AND target_id = ?1) LIMIT 1",
            params![a, b],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Classify a candidate pair via the LLM when available, falling back to a
/// similarity-banded heuristic: `>= 0.85` -> evolved_from, `>= 0.7` ->
/// related_to, below [`config::MIN_CONFIDENCE_FOR_LINK`] -> no link.
fn classify_pair(
    llm: Option<&dyn LlmProvider>,
    source_content: &str,
    target_content: &str,
    similarity: f64,
) -> Option<(RelType, f64)> {
    if let Some(llm) = llm {
        let prompt = format!(
            "Classify the relationship from A to B as one of CONTRADICTS, SUPPORTS, EVOLVED_FROM, RELATED_TO, or NONE, followed by a confidence in [0,1].\nA: {source_content}\nB: {target_content}"
        );
        if let Ok(response) = llm.complete(&prompt) {
            if let Some((rel, confidence)) = parse_relationship_classification(&response) {
                let rel_type = match rel {
                    ClassifiedRelationship::Contradicts => RelType::Contradicts,
                    ClassifiedRelationship::Supports => RelType::Supports,
                    ClassifiedRelationship::EvolvedFrom => RelType::EvolvedFrom,
                    ClassifiedRelationship::RelatedTo => RelType::RelatedTo,
                };
                return (confidence >= config::MIN_CONFIDENCE_FOR_LINK).then_some((rel_type, confidence));
            }
            return None;
        }
    }

    if similarity >= 0.85 {
        Some((RelType::EvolvedFrom, similarity))
    } else if similarity >= 0.7 {
        Some((RelType::RelatedTo, similarity))
    } else {
        None
    }
}

/// Auto-link a freshly stored memory against the rest of the store:
/// embed (via the caller-supplied embedding, reusing it rather than
/// re-embedding), find similar memories, skip self and any pair that
/// already has an edge, classify each surviving pair, and persist links
/// clearing [`config::MIN_CONFIDENCE_FOR_LINK`].
pub fn auto_link_memory(
    conn: &Connection,
    memory_id: &str,
    variant: MemoryVariant,
    content: &str,
    embedding: &[f32],
    llm: Option<&dyn LlmProvider>,
    threshold: f64,
) -> Result<usize> {
    let mut linked = 0;

    for (other_id, other_variant, similarity) in find_similar_memories(conn, embedding, threshold, memory_id)? {
        if other_id == memory_id {
            continue;
        }
        if link_exists(conn, memory_id, &other_id)? {
            continue;
        }

        let other_content: Option<String> = match other_variant {
            MemoryVariant::Strategic => conn
                .query_row("SELECT content FROM strategic_memory WHERE id = ?1", params![other_id], |r| r.get(0))
                .optional()?,
            _ => conn
                .query_row("SELECT content FROM memories WHERE id = ?1", params![other_id], |r| r.get(0))
                .optional()?,
        };
        let Some(other_content) = other_content else { continue };

        if let Some((rel_type, confidence)) = classify_pair(llm, content, &other_content, similarity) {
            create_link(conn, memory_id, variant, &other_id, other_variant, rel_type, confidence, None, "system")?;
            linked += 1;
        }
    }

    Ok(linked)
}

/// Best-effort embedding for auto-linking: try [`EmbeddingProvider::embed_fast`],
/// falling back to skipping the auto-link step entirely on failure.
pub fn embed_for_auto_link(provider: &dyn EmbeddingProvider, content: &str) -> Option<Vec<f32>> {
    provider.embed_fast(content).ok()
}

/// A memory's links, partitioned by category, for context-aware retrieval.
pub struct ContextualLinks {
    pub contradictions: Vec<Link>,
    pub supports: Vec<Link>,
    pub related: Vec<Link>,
    pub has_updates: bool,
}

/// Load and partition a memory's links: contradictions, supports, and
/// "related" (merging `evolved_from`, `caused_by`, and `leads_to`).
/// `has_updates` is set iff any `evolved_from` edge exists.
pub fn retrieve_with_context(conn: &Connection, memory_id: &str) -> Result<ContextualLinks> {
    let links = get_linked_memories(conn, memory_id, None)?;

    let mut contradictions = Vec::new();
    let mut supports = Vec::new();
    let mut related = Vec::new();
    let mut has_updates = false;

    for link in links {
        match link.rel_type.as_str() {
            "contradicts" => contradictions.push(link),
            "supports" => supports.push(link),
            "evolved_from" => {
                has_updates = true;
                related.push(link);
            }
            "caused_by" | "leads_to" => related.push(link),
            _ => {}
        }
    }

    Ok(ContextualLinks { contradictions, supports, related, has_updates })
}

/// Upsert a routing-edge observation for a (provider, model, task_type).
pub fn update_routing_edge(
    conn: &Connection,
    provider: &str,
    model: &str,
    task_type: &str,
    success: bool,
    latency_ms: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO routing_edges (provider, model, task_type, success_count, failure_count, total_latency_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(provider, model, task_type) DO UPDATE SET
            success_count = success_count + excluded.success_count,
            failure_count = failure_count + excluded.failure_count,
            total_latency_ms = total_latency_ms + excluded.total_latency_ms",
        params![
            provider,
            model,
            task_type,
            if success { 1 } else { 0 },
            if success { 0 } else { 1 },
            latency_ms,
        ],
    )?;
    Ok(())
}

/// A routing edge's observed performance.
pub struct RoutingKnowledge {
    pub provider: String,
    pub model: String,
    pub task_type: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub total_latency_ms: i64,
}

/// All observed routing edges for a task type, ordered by success rate
/// descending.
pub fn get_routing_knowledge(conn: &Connection, task_type: &str) -> Result<Vec<RoutingKnowledge>> {
    let mut stmt = conn.prepare(
        "SELECT provider, model, task_type, success_count, failure_count, total_latency_ms
         FROM routing_edges WHERE task_type = ?1",
    )?;
    let rows = stmt.query_map(params![task_type], |r| {
        Ok(RoutingKnowledge {
            provider: r.get(0)?,
            model: r.get(1)?,
            task_type: r.get(2)?,
            success_count: r.get(3)?,
            failure_count: r.get(4)?,
            total_latency_ms: r.get(5)?,
        })
    })?;

    let mut out: Vec<RoutingKnowledge> = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    out.sort_by(|a, b| {
        let rate = |r: &RoutingKnowledge| {
            let total = r.success_count + r.failure_count;
            if total == 0 { 0.0 } else { r.success_count as f64 / total as f64 }
        };
        rate(b).partial_cmp(&rate(a)).unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store;

    fn unit(dim: usize, len: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; len];
        v[dim % len] = 1.0;
        v
    }

    #[test]
    fn create_link_upserts_on_repeat_triple() {
        let mut conn = db::open_memory_database().unwrap();
        let a = store::store_strategic(&mut conn, "a", &unit(0, 8), 1.0, 8).unwrap();
        let b = store::store_strategic(&mut conn, "b", &unit(1, 8), 1.0, 8).unwrap();

        create_link(&conn, &a, MemoryVariant::Strategic, &b, MemoryVariant::Strategic, RelType::Supports, 0.8, None, "test").unwrap();
        create_link(&conn, &a, MemoryVariant::Strategic, &b, MemoryVariant::Strategic, RelType::Supports, 0.95, None, "test").unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_links", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);

        let confidence: f64 = conn
            .query_row("SELECT confidence FROM memory_links WHERE source_id = ?1", params![a], |r| r.get(0))
            .unwrap();
        assert_eq!(confidence, 0.95);
    }

    #[test]
    fn get_linked_memories_filters_by_rel_type() {
        let mut conn = db::open_memory_database().unwrap();
        let a = store::store_strategic(&mut conn, "a", &unit(0, 8), 1.0, 8).unwrap();
        let b = store::store_strategic(&mut conn, "b", &unit(1, 8), 1.0, 8).unwrap();
        let c = store::store_strategic(&mut conn, "c", &unit(2, 8), 1.0, 8).unwrap();

        create_link(&conn, &a, MemoryVariant::Strategic, &b, MemoryVariant::Strategic, RelType::Supports, 0.8, None, "test").unwrap();
        create_link(&conn, &a, MemoryVariant::Strategic, &c, MemoryVariant::Strategic, RelType::Contradicts, 0.8, None, "test").unwrap();

        let supports_only = get_linked_memories(&conn, &a, Some(&["supports"])).unwrap();
        assert_eq!(supports_only.len(), 1);
        assert_eq!(supports_only[0].target_id, b);
    }

    #[test]
    fn traverse_links_follows_chain_and_handles_cycles() {
        let mut conn = db::open_memory_database().unwrap();
        let a = store::store_strategic(&mut conn, "a", &unit(0, 8), 1.0, 8).unwrap();
        let b = store::store_strategic(&mut conn, "b", &unit(1, 8), 1.0, 8).unwrap();
        let c = store::store_strategic(&mut conn, "c", &unit(2, 8), 1.0, 8).unwrap();

        create_link(&conn, &a, MemoryVariant::Strategic, &b, MemoryVariant::Strategic, RelType::LeadsTo, 0.8, None, "test").unwrap();
        create_link(&conn, &b, MemoryVariant::Strategic, &c, MemoryVariant::Strategic, RelType::LeadsTo, 0.8, None, "test").unwrap();
        create_link(&conn, &c, MemoryVariant::Strategic, &a, MemoryVariant::Strategic, RelType::LeadsTo, 0.8, None, "test").unwrap();

        let reached = traverse_links(&conn, &a, 5).unwrap();
        assert_eq!(reached.len(), 3);
        assert!(reached.contains(&a));
        assert!(reached.contains(&b));
        assert!(reached.contains(&c));
    }

    #[test]
    fn auto_link_skips_self_and_uses_heuristic_without_llm() {
        let mut conn = db::open_memory_database().unwrap();
        let a = store::store_strategic(&mut conn, "a", &unit(0, 8), 1.0, 8).unwrap();
        let b = store::store_strategic(&mut conn, "b", &unit(0, 8), 1.0, 8).unwrap();

        let linked = auto_link_memory(&conn, &a, MemoryVariant::Strategic, "a", &unit(0, 8), None, 0.5).unwrap();
        assert_eq!(linked, 1);

        let links = get_linked_memories(&conn, &a, None).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_id, b);
        assert_eq!(links[0].rel_type, "evolved_from");
    }

    #[test]
    fn auto_link_skips_pairs_below_min_confidence() {
        let mut conn = db::open_memory_database().unwrap();
        let a = store::store_strategic(&mut conn, "a", &unit(0, 8), 1.0, 8).unwrap();
        store::store_strategic(&mut conn, "b", &unit(4, 8), 1.0, 8).unwrap();

        let linked = auto_link_memory(&conn, &a, MemoryVariant::Strategic, "a", &unit(0, 8), None, 0.1).unwrap();
        assert_eq!(linked, 0);
    }

    #[test]
    fn retrieve_with_context_partitions_links_and_flags_updates() {
        let mut conn = db::open_memory_database().unwrap();
        let a = store::store_strategic(&mut conn, "a", &unit(0, 8), 1.0, 8).unwrap();
        let b = store::store_strategic(&mut conn, "b", &unit(1, 8), 1.0, 8).unwrap();
        let c = store::store_strategic(&mut conn, "c", &unit(2, 8), 1.0, 8).unwrap();

        create_link(&conn, &a, MemoryVariant::Strategic, &b, MemoryVariant::Strategic, RelType::Contradicts, 0.8, None, "test").unwrap();
        create_link(&conn, &a, MemoryVariant::Strategic, &c, MemoryVariant::Strategic, RelType::EvolvedFrom, 0.8, None, "test").unwrap();

        let context = retrieve_with_context(&conn, &a).unwrap();
        assert_eq!(context.contradictions.len(), 1);
        assert_eq!(context.related.len(), 1);
        assert!(context.has_updates);
    }

    #[test]
    fn routing_edge_upsert_accumulates_counts() {
        let conn = db::open_memory_database().unwrap();
        update_routing_edge(&conn, "anthropic", "opus", "coding", true, 500).unwrap();
        update_routing_edge(&conn, "anthropic", "opus", "coding", false, 800).unwrap();

        let knowledge = get_routing_knowledge(&conn, "coding").unwrap();
        assert_eq!(knowledge.len(), 1);
        assert_eq!(knowledge[0].success_count, 1);
        assert_eq!(knowledge[0].failure_count, 1);
        assert_eq!(knowledge[0].total_latency_ms, 1300);
    }
}
