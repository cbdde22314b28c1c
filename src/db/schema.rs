//! SQL DDL for every table the engine owns.
//!
//! All DDL uses `IF NOT EXISTS` so `init_schema` is idempotent. Variant-
//! specific memory tables (`strategic_memory`, `memories`, `memcubes`) are
//! kept separate rather than one polymorphic table, mirroring the tagged
//! `Memory` sum type each row ultimately feeds: strategic memories carry
//! confidence/decay fields no other variant needs, and memcubes carry
//! versioning fields no other variant needs.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Strategic memories: principle-like, with confidence decay.
CREATE TABLE IF NOT EXISTS strategic_memory (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_applied_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_strategic_confidence ON strategic_memory(confidence);

-- Episodic / procedural / semantic memories.
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    variant TEXT NOT NULL CHECK(variant IN ('episodic','procedural','semantic')),
    content TEXT NOT NULL,
    embedding BLOB,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_variant ON memories(variant);

-- Memcube-typed artifacts: versioned, parented.
CREATE TABLE IF NOT EXISTS memcubes (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB,
    version INTEGER NOT NULL DEFAULT 1,
    parent_id TEXT,
    scope TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memcubes_parent ON memcubes(parent_id);

CREATE TABLE IF NOT EXISTS memcube_links (
    memcube_id TEXT NOT NULL,
    linked_memcube_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (memcube_id, linked_memcube_id)
);

-- Content-addressed embedding cache.
CREATE TABLE IF NOT EXISTS content_embedding_cache (
    content_hash TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimension INTEGER NOT NULL,
    model_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_used_at TEXT NOT NULL,
    use_count INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_cache_last_used ON content_embedding_cache(last_used_at);

-- LSH-style bucket index: each memory lives in exactly one bucket.
CREATE TABLE IF NOT EXISTS embedding_buckets (
    bucket_id TEXT NOT NULL,
    memory_id TEXT PRIMARY KEY,
    memory_type TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_buckets_bucket_id ON embedding_buckets(bucket_id);

-- Per-memory precomputed neighborhood.
CREATE TABLE IF NOT EXISTS memory_neighborhoods (
    memory_id TEXT PRIMARY KEY,
    memory_type TEXT NOT NULL,
    neighbors TEXT NOT NULL,
    neighbor_count INTEGER NOT NULL DEFAULT 0,
    computed_at TEXT NOT NULL,
    is_stale INTEGER NOT NULL DEFAULT 0,
    embedding_hash TEXT
);

-- Topics produced by clustering.
CREATE TABLE IF NOT EXISTS memory_topics (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    keywords TEXT NOT NULL DEFAULT '[]',
    centroid_embedding BLOB,
    member_count INTEGER NOT NULL DEFAULT 0,
    last_active_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_topics_active ON memory_topics(is_active);

CREATE TABLE IF NOT EXISTS memory_topic_members (
    topic_id TEXT NOT NULL REFERENCES memory_topics(id) ON DELETE CASCADE,
    memory_id TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    added_at TEXT NOT NULL,
    relevance_score REAL NOT NULL,
    PRIMARY KEY (topic_id, memory_id)
);

-- Typed link graph between memories.
CREATE TABLE IF NOT EXISTS memory_links (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    source_type TEXT NOT NULL,
    target_type TEXT NOT NULL,
    rel_type TEXT NOT NULL CHECK(rel_type IN (
        'contradicts','supports','evolved_from','related_to','caused_by',
        'leads_to','routing_decision','capability_score','context_window','task_affinity'
    )),
    confidence REAL NOT NULL DEFAULT 1.0,
    metadata TEXT,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL DEFAULT 'system',
    PRIMARY KEY (source_id, target_id, rel_type)
);
CREATE INDEX IF NOT EXISTS idx_links_source ON memory_links(source_id);
CREATE INDEX IF NOT EXISTS idx_links_target ON memory_links(target_id);

-- Observed routing performance per (provider, model, task_type).
CREATE TABLE IF NOT EXISTS routing_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    task_type TEXT NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    total_latency_ms INTEGER NOT NULL DEFAULT 0,
    UNIQUE(provider, model, task_type)
);

-- Time/size-bounded episode windows.
CREATE TABLE IF NOT EXISTS memory_episodes (
    id TEXT PRIMARY KEY,
    episode_type TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    title TEXT,
    summary TEXT,
    summary_embedding BLOB,
    memory_count INTEGER NOT NULL DEFAULT 0,
    token_estimate INTEGER NOT NULL DEFAULT 0,
    summary_tokens INTEGER NOT NULL DEFAULT 0,
    compression_ratio REAL,
    metadata TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_episodes_active ON memory_episodes(episode_type, is_active);

CREATE TABLE IF NOT EXISTS episode_members (
    episode_id TEXT NOT NULL REFERENCES memory_episodes(id) ON DELETE CASCADE,
    memory_id TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    sequence_num INTEGER NOT NULL,
    added_at TEXT NOT NULL,
    PRIMARY KEY (episode_id, memory_id)
);

-- Outcome attribution ledger.
CREATE TABLE IF NOT EXISTS memory_attributions (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL,
    query_id TEXT NOT NULL,
    query_text TEXT NOT NULL,
    outcome TEXT NOT NULL CHECK(outcome IN ('success','failure','partial')),
    contribution REAL NOT NULL,
    created_at TEXT NOT NULL,
    session_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_attributions_memory ON memory_attributions(memory_id);

-- Schema metadata.
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
