//! Outcome attribution ledger (§4.8).
//!
//! Records which memories contributed to a query's outcome, splitting
//! credit evenly across the cited memories, then aggregates that ledger
//! back onto `strategic_memory`'s running success/failure counters.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

/// The observed outcome of a query that cited one or more memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Partial => "partial",
        }
    }
}

/// Record an equal-credit attribution row for every memory cited by a
/// query's outcome. `query_text` is truncated to 200 chars before storage.
pub fn record_attributions(
    conn: &Connection,
    query_id: &str,
    query_text: &str,
    memory_ids: &[&str],
    outcome: Outcome,
    session_id: Option<&str>,
) -> Result<()> {
    if memory_ids.is_empty() {
        return Ok(());
    }

    let contribution = 1.0 / memory_ids.len() as f64;
    let truncated: String = query_text.chars().take(200).collect();
    let now = Utc::now().to_rfc3339();

    for &memory_id in memory_ids {
        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO memory_attributions (id, memory_id, query_id, query_text, outcome, contribution, created_at, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![id, memory_id, query_id, truncated, outcome.as_str(), contribution, now, session_id],
        )?;
    }

    Ok(())
}

/// A memory's aggregated attribution impact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryImpact {
    pub attribution_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub partial_count: i64,
    pub total_contribution: f64,
    pub success_contribution: f64,
    pub failure_contribution: f64,
    pub average_contribution: f64,
}

/// Aggregate a memory's attribution rows into outcome counts and a total /
/// average contribution score.
pub fn calculate_memory_impact(conn: &Connection, memory_id: &str) -> Result<MemoryImpact> {
    let mut stmt = conn.prepare(
        "SELECT outcome, contribution FROM memory_attributions WHERE memory_id = ?1",
    )?;
    let rows = stmt.query_map(params![memory_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })?;

    let mut impact = MemoryImpact {
        attribution_count: 0,
        success_count: 0,
        failure_count: 0,
        partial_count: 0,
        total_contribution: 0.0,
        success_contribution: 0.0,
        failure_contribution: 0.0,
        average_contribution: 0.0,
    };

    for row in rows {
        let (outcome, contribution) = row?;
        impact.total_contribution += contribution;
        impact.attribution_count += 1;
        match outcome.as_str() {
            "success" => {
                impact.success_count += 1;
                impact.success_contribution += contribution;
            }
            "failure" => {
                impact.failure_count += 1;
                impact.failure_contribution += contribution;
            }
            "partial" => impact.partial_count += 1,
            _ => {}
        }
    }

    if impact.attribution_count > 0 {
        impact.average_contribution = impact.total_contribution / impact.attribution_count as f64;
    }

    Ok(impact)
}

/// Write a memory's aggregated attribution counts back onto its
/// `strategic_memory` row (success_count/failure_count), bumping
/// `updated_at`.
pub fn sync_from_attributions(conn: &Connection, memory_id: &str) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT outcome FROM memory_attributions WHERE memory_id = ?1",
    )?;
    let rows = stmt.query_map(params![memory_id], |r| r.get::<_, String>(0))?;

    let mut success_count = 0i64;
    let mut failure_count = 0i64;
    for row in rows {
        match row?.as_str() {
            "success" => success_count += 1,
            "failure" => failure_count += 1,
            _ => {}
        }
    }

    conn.execute(
        "UPDATE strategic_memory SET success_count = ?1, failure_count = ?2, updated_at = ?3 WHERE id = ?4",
        params![success_count, failure_count, Utc::now().to_rfc3339(), memory_id],
    )?;

    Ok(())
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
    fn record_attributions_splits_credit_evenly() {
        let conn = db::open_memory_database().unwrap();
        record_attributions(&conn, "q1", "why does this work", &["m1", "m2"], Outcome::Success, None).unwrap();

        let contributions: Vec<f64> = {
            let mut stmt = conn.prepare("SELECT contribution FROM memory_attributions ORDER BY memory_id").unwrap();
            stmt.query_map([], |r| r.get(0)).unwrap().collect::<rusqlite::Result<Vec<_>>>().unwrap()
        };
        assert_eq!(contributions, vec![0.5, 0.5]);
    }

    #[test]
    fn record_attributions_truncates_query_text() {
        let conn = db::open_memory_database().unwrap();
        let long = "x".repeat(500);
        record_attributions(&conn, "q1", &long, &["m1"], Outcome::Success, None).unwrap();

        let stored: String = conn
            .query_row("SELECT query_text FROM memory_attributions LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored.len(), 200);
    }

    #[test]
    fn record_attributions_empty_ids_is_noop() {
        let conn = db::open_memory_database().unwrap();
        record_attributions(&conn, "q1", "text", &[], Outcome::Success, None).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_attributions", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn calculate_memory_impact_aggregates_by_outcome() {
        let conn = db::open_memory_database().unwrap();
        record_attributions(&conn, "q1", "t", &["m1"], Outcome::Success, None).unwrap();
        record_attributions(&conn, "q2", "t", &["m1"], Outcome::Failure, None).unwrap();
        record_attributions(&conn, "q3", "t", &["m1"], Outcome::Partial, None).unwrap();

        let impact = calculate_memory_impact(&conn, "m1").unwrap();
        assert_eq!(impact.attribution_count, 3);
        assert_eq!(impact.success_count, 1);
        assert_eq!(impact.failure_count, 1);
        assert_eq!(impact.partial_count, 1);
        assert_eq!(impact.success_contribution, 1.0);
        assert_eq!(impact.failure_contribution, 1.0);
        assert!((impact.average_contribution - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sync_from_attributions_updates_strategic_memory_counts() {
        let mut conn = db::open_memory_database().unwrap();
        let id = store::store_strategic(&mut conn, "principle", &unit(0, 8), 1.0, 8).unwrap();

        record_attributions(&conn, "q1", "t", &[&id], Outcome::Success, None).unwrap();
        record_attributions(&conn, "q2", "t", &[&id], Outcome::Success, None).unwrap();
        record_attributions(&conn, "q3", "t", &[&id], Outcome::Failure, None).unwrap();

        sync_from_attributions(&conn, &id).unwrap();

        let (success, failure): (i64, i64) = conn
            .query_row(
                "SELECT success_count, failure_count FROM strategic_memory WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(success, 2);
        assert_eq!(failure, 1);
    }
}
