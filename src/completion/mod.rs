//! The coordinated completion-recording engine.
//!
//! Accepts a "mark this task done" request from a device and durably records
//! it exactly once, even under concurrent, duplicate, or retried submissions
//! for the same (task, person, period). One call is one atomic transaction:
//!
//! key derivation -> duplicate check -> fail-fast period lock -> kind policy
//! -> row insert -> liveness propagation -> commit
//!
//! Any step can abort with a typed [`CompletionError`]; an abort rolls back
//! every effect. The engine never retries on the caller's behalf.

pub mod idempotency;
pub mod strategy;

mod liveness;
mod lock;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::CompletionConfig;
use crate::error::{self, CompletionError};
use crate::model::{new_id, CompletionRow, PersonRow, TaskKind, TaskRow};
use crate::observability::LatencyTracker;
use crate::storage::Storage;

// ─── Request / outcome ───────────────────────────────────────────────────────

/// One device's intent to mark a task done.
#[derive(Debug, Clone)]
pub struct CompleteRequest {
    pub task_id: String,
    pub person_id: String,
    /// Numeric string 1..999; required for bounded-sum tasks, ignored
    /// otherwise.
    pub value: Option<String>,
    pub notes: Option<String>,
    /// Start of the current period for the task's reset rule. Supplied by
    /// the reset-period calculator; treated here as an opaque lower bound.
    pub reset_date: DateTime<Utc>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    /// Client-reported completion instant. Kiosks that batch offline
    /// submissions backfill this; defaults to server wall-clock.
    pub completed_at: Option<DateTime<Utc>>,
}

impl CompleteRequest {
    pub fn new(
        task_id: impl Into<String>,
        person_id: impl Into<String>,
        reset_date: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            person_id: person_id.into(),
            value: None,
            notes: None,
            reset_date,
            device_id: None,
            session_id: None,
            completed_at: None,
        }
    }
}

/// The recorded fact, plus whether this call created it or replayed a prior
/// submission with the same idempotency key.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub record: CompletionRow,
    pub was_replay: bool,
}

/// Result of the locked portion of a call.
enum Applied {
    Inserted(CompletionRow),
    /// The insert hit the idempotency uniqueness constraint: another process
    /// recorded the same key between our duplicate check and our insert.
    LostIdempotencyRace,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct CompletionEngine {
    storage: Storage,
    config: CompletionConfig,
}

impl CompletionEngine {
    pub fn new(storage: Storage, config: CompletionConfig) -> Self {
        Self { storage, config }
    }

    /// Record a completion exactly once.
    ///
    /// Returns the stored record and a replay flag. Errors are terminal for
    /// this call; `Contended` and `Transient` are safe to resubmit verbatim
    /// (the idempotency key collapses accidental duplicates).
    pub async fn complete_task(
        &self,
        req: CompleteRequest,
    ) -> Result<CompletionOutcome, CompletionError> {
        let tracker = LatencyTracker::start("completion.complete_task");
        let result = self.record(&req).await;
        tracker.finish();

        match &result {
            Ok(outcome) if outcome.was_replay => {
                debug!(
                    task_id = %req.task_id,
                    person_id = %req.person_id,
                    "completion replayed"
                );
            }
            Ok(outcome) => {
                info!(
                    task_id = %req.task_id,
                    person_id = %req.person_id,
                    sequence_number = outcome.record.sequence_number,
                    "completion recorded"
                );
            }
            Err(err) => {
                debug!(
                    task_id = %req.task_id,
                    person_id = %req.person_id,
                    error = %err,
                    "completion rejected"
                );
            }
        }
        result
    }

    async fn record(&self, req: &CompleteRequest) -> Result<CompletionOutcome, CompletionError> {
        let task = self
            .storage
            .get_task(&req.task_id)
            .await
            .map_err(|e| CompletionError::Transient(e.to_string()))?
            .ok_or_else(|| CompletionError::not_found("task", &req.task_id))?;
        let kind = task.task_kind().ok_or_else(|| {
            CompletionError::Transient(format!(
                "task {} has unrecognized kind {}",
                task.id, task.kind
            ))
        })?;
        let person = self
            .storage
            .get_person(&req.person_id)
            .await
            .map_err(|e| CompletionError::Transient(e.to_string()))?
            .ok_or_else(|| CompletionError::not_found("person", &req.person_id))?;

        // A client clock behind the period start cannot place a row outside
        // the locked window; stale instants clamp to the boundary.
        let completed_at = req
            .completed_at
            .unwrap_or_else(Utc::now)
            .timestamp()
            .max(req.reset_date.timestamp());
        let key = idempotency::derive_key(
            &req.task_id,
            &req.person_id,
            req.value.as_deref(),
            req.device_id.as_deref(),
            completed_at,
            self.config.idempotency_bucket_secs,
        );

        // Duplicate check: a key hit means this logical request was already
        // recorded once. Return the prior row, no new effects.
        if let Some(existing) = self
            .storage
            .completion_by_key(&key)
            .await
            .map_err(|e| CompletionError::Transient(e.to_string()))?
        {
            return Ok(CompletionOutcome {
                record: existing,
                was_replay: true,
            });
        }

        let pool = self.storage.pool();
        let mut conn = pool.acquire().await.map_err(CompletionError::from_sqlx)?;

        let budget = Duration::from_secs(self.config.transaction_timeout_secs.max(1));
        let locked_phase = run_locked(&mut conn, &task, kind, &person, req, &key, completed_at);
        let applied = match tokio::time::timeout(budget, locked_phase).await {
            Ok(result) => result?,
            Err(_) => {
                // The transaction future was dropped mid-flight; the
                // connection must not rejoin the pool with an open
                // transaction.
                lock::rollback(&mut conn).await;
                return Err(CompletionError::Transient(format!(
                    "completion transaction exceeded {}s",
                    budget.as_secs()
                )));
            }
        };

        match applied {
            Applied::Inserted(record) => Ok(CompletionOutcome {
                record,
                was_replay: false,
            }),
            Applied::LostIdempotencyRace => {
                let winner = self
                    .storage
                    .completion_by_key(&key)
                    .await
                    .map_err(|e| CompletionError::Transient(e.to_string()))?
                    .ok_or_else(|| {
                        CompletionError::Transient(
                            "idempotency conflict reported but winning row is missing".into(),
                        )
                    })?;
                Ok(CompletionOutcome {
                    record: winner,
                    was_replay: true,
                })
            }
        }
    }
}

// ─── Locked transaction body ─────────────────────────────────────────────────

async fn run_locked(
    conn: &mut SqliteConnection,
    task: &TaskRow,
    kind: TaskKind,
    person: &PersonRow,
    req: &CompleteRequest,
    key: &str,
    completed_at: i64,
) -> Result<Applied, CompletionError> {
    let scope = lock::PeriodScope {
        task_id: &task.id,
        person_id: &person.id,
        reset_epoch: req.reset_date.timestamp(),
    };
    let locked = lock::acquire(conn, &scope).await?;

    let plan = match strategy::plan(kind, &locked, req.value.as_deref()) {
        Ok(plan) => plan,
        Err(err) => {
            lock::rollback(conn).await;
            return Err(err);
        }
    };

    let record = match insert_record(conn, task, person, req, key, completed_at, &plan).await {
        Ok(record) => record,
        Err(err) if error::is_idempotency_conflict(&err) => {
            lock::rollback(conn).await;
            return Ok(Applied::LostIdempotencyRace);
        }
        Err(err) => {
            lock::rollback(conn).await;
            return Err(CompletionError::from_sqlx(err));
        }
    };

    if let Err(err) = liveness::touch(conn, &person.id, &person.workspace_id, record.created_at).await
    {
        lock::rollback(conn).await;
        return Err(CompletionError::from_sqlx(err));
    }

    match lock::commit(conn).await {
        Ok(()) => Ok(Applied::Inserted(record)),
        Err(err) => {
            lock::rollback(conn).await;
            Err(err)
        }
    }
}

async fn insert_record(
    conn: &mut SqliteConnection,
    task: &TaskRow,
    person: &PersonRow,
    req: &CompleteRequest,
    key: &str,
    completed_at: i64,
    plan: &strategy::InsertPlan,
) -> Result<CompletionRow, sqlx::Error> {
    let id = new_id();
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO completions \
         (id, task_id, person_id, value, notes, sequence_number, running_sum, \
          completed_at, idempotency_key, device_id, session_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&task.id)
    .bind(&person.id)
    .bind(plan.value.map(|v| v.to_string()))
    .bind(req.notes.as_deref())
    .bind(plan.sequence_number)
    .bind(plan.running_sum)
    .bind(completed_at)
    .bind(key)
    .bind(req.device_id.as_deref())
    .bind(req.session_id.as_deref())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as("SELECT * FROM completions WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *conn)
        .await
}
