#![allow(dead_code)]

use memory_engine::db;
use memory_engine::memory::types::MemoryVariant;
use rusqlite::Connection;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Generate a deterministic embedding with a spike at position `seed`.
/// Each seed produces a distinct, orthogonal-ish vector.
pub fn test_embedding(seed: usize, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    v[seed % dim] = 1.0;
    v
}

/// Generate an embedding similar to `base` with small perturbation.
/// The result will have high cosine similarity to `base`.
pub fn similar_embedding(base: &[f32]) -> Vec<f32> {
    let mut v = base.to_vec();
    let len = v.len();
    for i in 0..5.min(len) {
        v[(i * 37) % len] += 0.05;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Insert a strategic memory directly via the store module. Returns the memory ID.
pub fn insert_strategic(conn: &mut Connection, content: &str, confidence: f64, embedding: &[f32]) -> String {
    memory_engine::memory::store::store_strategic(conn, content, embedding, confidence, 8).unwrap()
}

/// Insert an episodic/procedural/semantic memory directly via the store module.
pub fn insert_generic(conn: &mut Connection, variant: MemoryVariant, content: &str, embedding: &[f32]) -> String {
    memory_engine::memory::store::store_generic(conn, variant, content, embedding, None, 8).unwrap()
}
