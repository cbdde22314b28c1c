//! DBSCAN topic clustering over strategic memory embeddings (§4.5).
//!
//! Same shape as a classic DBSCAN pass — region query, seed expansion via a
//! work queue, cluster-label sentinels — but over cosine distance instead of
//! Euclidean, since embeddings here are compared by direction, not magnitude.

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::llm::{parse_topic_naming, LlmProvider};
use crate::vector::{centroid, cosine_distance, cosine_similarity, f32_to_bytes};

/// -2 = unvisited, -1 = noise, >= 0 = cluster id. Mirrors the sentinel
/// convention of a dense-feature DBSCAN pass.
const UNVISITED: isize = -2;
const NOISE: isize = -1;

/// A candidate point fed into the clustering pass.
#[derive(Debug, Clone)]
pub struct ClusterCandidate {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// Fetch strategic memories with embeddings created within the lookback
/// window. Clustering only ever runs over strategic memories — a narrower
/// inclusion set than neighborhood/link's strategic+episodic scan, since
/// topics are meant to summarize *principles*, not raw events.
pub fn fetch_candidates(conn: &Connection, lookback_days: i64) -> Result<Vec<ClusterCandidate>> {
    let cutoff = (Utc::now() - chrono::Duration::days(lookback_days)).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT id, embedding FROM strategic_memory WHERE embedding IS NOT NULL AND created_at >= ?1",
    )?;
    let rows = stmt.query_map(params![cutoff], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, bytes) = row?;
        out.push(ClusterCandidate {
            id,
            embedding: crate::vector::bytes_to_f32(&bytes),
        });
    }
    Ok(out)
}

/// Run one DBSCAN pass: label every point `-2` (unvisited) -> `-1` (noise)
/// or a cluster id `>= 0`.
fn dbscan(points: &[ClusterCandidate], epsilon: f64, min_points: usize) -> Vec<isize> {
    let n = points.len();
    let mut labels = vec![UNVISITED; n];
    let mut visited = vec![false; n];
    let mut next_cluster_id: isize = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let neighbors = region_query(points, i, epsilon);
        if neighbors.len() < min_points {
            labels[i] = NOISE;
            continue;
        }

        expand_cluster(points, i, neighbors, next_cluster_id, epsilon, min_points, &mut labels, &mut visited);
        next_cluster_id += 1;
    }

    labels
}

fn region_query(points: &[ClusterCandidate], i: usize, epsilon: f64) -> Vec<usize> {
    (0..points.len())
        .filter(|&j| j != i && cosine_distance(&points[i].embedding, &points[j].embedding) <= epsilon)
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn expand_cluster(
    points: &[ClusterCandidate],
    seed: usize,
    seed_neighbors: Vec<usize>,
    cluster_id: isize,
    epsilon: f64,
    min_points: usize,
    labels: &mut [isize],
    visited: &mut [bool],
) {
    labels[seed] = cluster_id;
    let mut queue = seed_neighbors;

    while let Some(p) = queue.pop() {
        if !visited[p] {
            visited[p] = true;
            let p_neighbors = region_query(points, p, epsilon);
            if p_neighbors.len() >= min_points {
                for n in p_neighbors {
                    if labels[n] == UNVISITED {
                        queue.push(n);
                    }
                }
            }
        }
        if labels[p] == UNVISITED || labels[p] == NOISE {
            labels[p] = cluster_id;
        }
    }
}

/// A formed cluster: its member ids and their cosine-similarity-to-centroid
/// scores.
pub struct FormedCluster {
    pub members: Vec<(String, f64)>,
    pub centroid: Vec<f32>,
}

fn build_clusters(points: &[ClusterCandidate], labels: &[isize]) -> Vec<FormedCluster> {
    let mut by_cluster: HashMap<isize, Vec<usize>> = HashMap::new();
    for (i, &label) in labels.iter().enumerate() {
        if label >= 0 {
            by_cluster.entry(label).or_default().push(i);
        }
    }

    let mut ids: Vec<isize> = by_cluster.keys().copied().collect();
    ids.sort();

    ids.into_iter()
        .map(|id| {
            let indices = &by_cluster[&id];
            let vectors: Vec<Vec<f32>> = indices.iter().map(|&i| points[i].embedding.clone()).collect();
            let centroid = centroid(&vectors);
            let members = indices
                .iter()
                .map(|&i| {
                    let sim = cosine_similarity(&centroid, &points[i].embedding);
                    (points[i].id.clone(), sim)
                })
                .collect();
            FormedCluster { members, centroid }
        })
        .collect()
}

/// Find an active topic whose centroid is within `threshold` similarity of
/// `centroid`, preferring the closest match.
fn find_similar_topic(
    conn: &Connection,
    centroid: &[f32],
    threshold: f64,
) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT id, centroid_embedding FROM memory_topics WHERE is_active = 1 AND centroid_embedding IS NOT NULL",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?))
    })?;

    let mut best: Option<(String, f64)> = None;
    for row in rows {
        let (id, bytes) = row?;
        let embedding = crate::vector::bytes_to_f32(&bytes);
        let sim = cosine_similarity(centroid, &embedding);
        let better = match &best {
            Some((_, b)) => sim > *b,
            None => true,
        };
        if sim >= threshold && better {
            best = Some((id, sim));
        }
    }

    Ok(best.map(|(id, _)| id))
}

/// Run a clustering pass: fetch candidates, DBSCAN, then for each
/// non-noise cluster either update a matching existing topic or create a
/// new one (named via `llm`, falling back to a dated placeholder name on
/// provider failure or absence).
pub fn run_clustering(
    conn: &Connection,
    llm: Option<&dyn LlmProvider>,
    epsilon: f64,
    min_points: usize,
    lookback_days: i64,
    topic_match_threshold: f64,
) -> Result<usize> {
    let candidates = fetch_candidates(conn, lookback_days)?;
    if candidates.len() < min_points {
        return Ok(0);
    }

    let labels = dbscan(&candidates, epsilon, min_points);
    let clusters = build_clusters(&candidates, &labels);

    let mut topics_touched = 0;
    for cluster in clusters {
        upsert_topic(conn, llm, &cluster, topic_match_threshold)?;
        topics_touched += 1;
    }

    Ok(topics_touched)
}

fn upsert_topic(
    conn: &Connection,
    llm: Option<&dyn LlmProvider>,
    cluster: &FormedCluster,
    topic_match_threshold: f64,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    let topic_id = match find_similar_topic(conn, &cluster.centroid, topic_match_threshold)? {
        Some(id) => id,
        None => {
            let (name, description, keywords) = name_topic(conn, llm, cluster)?;
            let id = uuid::Uuid::now_v7().to_string();
            conn.execute(
                "INSERT INTO memory_topics (id, name, description, keywords, centroid_embedding, member_count, last_active_at, created_at, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6, 1)",
                params![
                    id,
                    name,
                    description,
                    serde_json::to_string(&keywords).unwrap_or_else(|_| "[]".to_string()),
                    f32_to_bytes(&cluster.centroid),
                    now,
                ],
            )?;
            id
        }
    };

    conn.execute(
        "UPDATE memory_topics SET centroid_embedding = ?1, member_count = ?2, last_active_at = ?3, is_active = 1 WHERE id = ?4",
        params![f32_to_bytes(&cluster.centroid), cluster.members.len() as i64, now, topic_id],
    )?;

    // The member set always mirrors the cluster that produced this write:
    // drop whoever the previous run attached, then insert the current set.
    conn.execute("DELETE FROM memory_topic_members WHERE topic_id = ?1", params![topic_id])?;
    for (member_id, relevance) in &cluster.members {
        conn.execute(
            "INSERT INTO memory_topic_members (topic_id, memory_id, memory_type, added_at, relevance_score)
             VALUES (?1, ?2, 'strategic', ?3, ?4)",
            params![topic_id, member_id, now, relevance],
        )?;
    }

    Ok(())
}

/// Name a new topic via the LLM, sampling up to 5 members truncated to 200
/// chars each. Falls back to a dated placeholder on an absent provider, a
/// provider failure, or an unparseable response.
fn name_topic(
    conn: &Connection,
    llm: Option<&dyn LlmProvider>,
    cluster: &FormedCluster,
) -> Result<(String, Option<String>, Vec<String>)> {
    let fallback_name = format!("Topic {}", Utc::now().format("%Y-%m-%d"));

    let Some(llm) = llm else {
        return Ok((fallback_name, None, Vec::new()));
    };

    let mut samples = Vec::new();
    for (member_id, _) in cluster.members.iter().take(5) {
        if let Ok(content) = conn.query_row(
            "SELECT content FROM strategic_memory WHERE id = ?1",
            params![member_id],
            |r| r.get::<_, String>(0),
        ) {
            samples.push(truncate(&content, 200));
        }
    }

    if samples.is_empty() {
        return Ok((fallback_name, None, Vec::new()));
    }

    let prompt = format!(
        "Name this topic of related memories. Respond with NAME:, DESCRIPTION:, and KEYWORDS: lines.\n\n{}",
        samples.join("\n---\n")
    );

    match llm.complete(&prompt) {
        Ok(response) => {
            let parsed = parse_topic_naming(&response);
            let name = parsed.name.filter(|n| !n.is_empty()).unwrap_or(fallback_name);
            Ok((name, parsed.description, parsed.keywords))
        }
        Err(_) => Ok((fallback_name, None, Vec::new())),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}
