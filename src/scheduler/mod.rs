//! Background maintenance worker (§4.9 / §5 concurrency model).
//!
//! One long-lived task: an initial run on `start`, then one run per
//! `jobs.interval_secs` tick. Each cycle runs its job suite sequentially
//! under a 30-second deadline; a single job's failure is logged and
//! isolated rather than aborting the rest of the cycle. `Shutdown` is a
//! one-shot cooperative cancellation via `tokio_util`'s token, mirroring
//! the cancellation-token pattern used for long-running operations
//! elsewhere in the ecosystem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::llm::LlmProvider;
use crate::memory::types::MemoryVariant;
use crate::{cluster, index, link, neighborhood};

const CYCLE_DEADLINE: Duration = Duration::from_secs(30);

/// Per-job outcome from one maintenance cycle.
pub struct JobOutcome {
    pub job: &'static str,
    pub ok: bool,
    pub detail: String,
}

/// A full cycle's report, in job-run order.
pub struct CycleReport {
    pub outcomes: Vec<JobOutcome>,
}

/// The background maintenance worker.
pub struct Scheduler {
    db: Arc<Mutex<Connection>>,
    config: EngineConfig,
    llm: Option<Arc<dyn LlmProvider>>,
    cancel: CancellationToken,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(db: Arc<Mutex<Connection>>, config: EngineConfig, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            db,
            config,
            llm,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Start the background loop. Idempotent: a second call while already
    /// running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_now().await;

            let mut ticker = tokio::time::interval(Duration::from_secs(this.config.jobs.interval_secs));
            ticker.tick().await; // first tick fires immediately; already ran once above

            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        this.run_now().await;
                    }
                }
            }
        });

        *self.handle.lock().expect("scheduler handle lock poisoned") = Some(handle);
    }

    /// Request a one-shot shutdown and wait for the loop to exit.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let handle = self.handle.lock().expect("scheduler handle lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Run one maintenance cycle immediately, bounded by a 30-second
    /// deadline. Jobs past the deadline are skipped, not forcibly aborted.
    pub async fn run_now(&self) -> CycleReport {
        let db = Arc::clone(&self.db);
        let config = self.config.clone();
        let llm = self.llm.clone();

        let result = tokio::time::timeout(CYCLE_DEADLINE, async move {
            tokio::task::spawn_blocking(move || run_cycle(&db, &config, llm.as_deref()))
                .await
                .unwrap_or_else(|e| CycleReport {
                    outcomes: vec![JobOutcome { job: "cycle", ok: false, detail: format!("job task panicked: {e}") }],
                })
        })
        .await;

        match result {
            Ok(report) => report,
            Err(_) => {
                warn!("maintenance cycle exceeded {:?} deadline", CYCLE_DEADLINE);
                CycleReport {
                    outcomes: vec![JobOutcome { job: "cycle", ok: false, detail: "deadline exceeded".into() }],
                }
            }
        }
    }
}

fn run_cycle(db: &Mutex<Connection>, config: &EngineConfig, llm: Option<&dyn LlmProvider>) -> CycleReport {
    let mut outcomes = Vec::new();

    outcomes.push(isolated("clustering", || {
        let conn = db.lock().map_err(|_| anyhow::anyhow!("db lock poisoned"))?;
        let touched = cluster::run_clustering(
            &conn,
            llm,
            config.cluster.epsilon,
            config.cluster.min_points,
            config.cluster.lookback_days,
            crate::config::SIMILARITY_THRESHOLD,
        )?;
        Ok(format!("{touched} topics touched"))
    }));

    outcomes.push(isolated("confidence_decay", || {
        let conn = db.lock().map_err(|_| anyhow::anyhow!("db lock poisoned"))?;
        let now = chrono::Utc::now();

        let mut stmt = conn.prepare(
            "SELECT id, confidence, updated_at FROM strategic_memory WHERE confidence > 0.0",
        )?;
        let rows: Vec<(String, f64, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut affected = 0;
        for (id, confidence, updated_at) in rows {
            let days_elapsed = match crate::db::parse_timestamp(&updated_at) {
                Some(ts) => now.signed_duration_since(ts).num_seconds() as f64 / 86_400.0,
                None => 0.0,
            };
            let decayed = decay_confidence(confidence, days_elapsed, config.jobs.decay_rate);
            if decayed != confidence {
                conn.execute(
                    "UPDATE strategic_memory SET confidence = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![decayed, now.to_rfc3339(), id],
                )?;
                affected += 1;
            }
        }
        Ok(format!("{affected} memories decayed"))
    }));

    outcomes.push(isolated("stale_topic_cleanup", || {
        let conn = db.lock().map_err(|_| anyhow::anyhow!("db lock poisoned"))?;
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(config.jobs.stale_topic_days)).to_rfc3339();
        let affected = conn.execute(
            "UPDATE memory_topics SET is_active = 0 WHERE is_active = 1 AND last_active_at < ?1",
            rusqlite::params![cutoff],
        )?;
        Ok(format!("{affected} topics deactivated"))
    }));

    outcomes.push(isolated("auto_link_batch", || {
        let conn = db.lock().map_err(|_| anyhow::anyhow!("db lock poisoned"))?;
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding FROM strategic_memory WHERE embedding IS NOT NULL ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows: Vec<(String, String, Vec<u8>)> = stmt
            .query_map(rusqlite::params![config.jobs.auto_link_batch_size as i64], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut linked = 0;
        for (id, content, bytes) in rows {
            let embedding = crate::vector::bytes_to_f32(&bytes);
            linked += link::auto_link_memory(
                &conn,
                &id,
                MemoryVariant::Strategic,
                &content,
                &embedding,
                llm,
                crate::config::MIN_CONFIDENCE_FOR_LINK,
            )?;
        }
        Ok(format!("{linked} links created"))
    }));

    outcomes.push(isolated("neighborhood_refresh", || {
        let conn = db.lock().map_err(|_| anyhow::anyhow!("db lock poisoned"))?;
        let refreshed = neighborhood::refresh_stale_neighborhoods(
            &conn,
            config.jobs.neighborhood_batch_size,
            config.neighborhood.limit,
            config.neighborhood.similarity_threshold,
            true,
            |id, variant| {
                let table = match variant {
                    MemoryVariant::Strategic => "strategic_memory",
                    MemoryVariant::Cube => "memcubes",
                    _ => "memories",
                };
                conn.query_row(
                    &format!("SELECT embedding FROM {table} WHERE id = ?1"),
                    rusqlite::params![id],
                    |r| r.get::<_, Vec<u8>>(0),
                )
                .ok()
                .map(|bytes| crate::vector::bytes_to_f32(&bytes))
            },
        )?;
        Ok(format!("{refreshed} neighborhoods refreshed"))
    }));

    if config.jobs.rebuild_vector_index {
        outcomes.push(isolated("vector_index_rebuild", || {
            let conn = db.lock().map_err(|_| anyhow::anyhow!("db lock poisoned"))?;
            let mut entries = Vec::new();

            let mut stmt = conn.prepare("SELECT id, embedding FROM strategic_memory WHERE embedding IS NOT NULL")?;
            for row in stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?)))? {
                let (id, bytes) = row?;
                entries.push((id, MemoryVariant::Strategic, crate::vector::bytes_to_f32(&bytes)));
            }
            drop(stmt);

            let mut stmt = conn.prepare("SELECT id, variant, embedding FROM memories WHERE embedding IS NOT NULL")?;
            for row in stmt.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, Vec<u8>>(2)?))
            })? {
                let (id, variant_str, bytes) = row?;
                if let Ok(variant) = variant_str.parse::<MemoryVariant>() {
                    entries.push((id, variant, crate::vector::bytes_to_f32(&bytes)));
                }
            }
            drop(stmt);

            let count = index::rebuild_index(&conn, config.index.bucket_dims, entries)?;
            Ok(format!("{count} embeddings reindexed"))
        }));
    }

    info!(jobs = outcomes.len(), "maintenance cycle complete");
    CycleReport { outcomes }
}

/// Exponential confidence decay over `d` elapsed days at per-day rate `r`,
/// floored at 0.1. A non-positive `d` (clock skew, same-cycle re-run)
/// leaves the confidence untouched rather than applying a negative decay.
fn decay_confidence(c: f64, d: f64, r: f64) -> f64 {
    if d <= 0.0 {
        c
    } else {
        (c * r.powf(d)).max(0.1)
    }
}

fn isolated(job: &'static str, f: impl FnOnce() -> anyhow::Result<String>) -> JobOutcome {
    match f() {
        Ok(detail) => JobOutcome { job, ok: true, detail },
        Err(e) => {
            warn!(job, error = %e, "maintenance job failed");
            JobOutcome { job, ok: false, detail: e.to_string() }
        }
    }
}
