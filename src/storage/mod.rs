//! SQLite storage layer.
//!
//! Owns the connection pool, the embedded schema migrations, the CRUD-side
//! accessors (workspaces, persons, tasks), and the read API served to
//! downstream collaborators (goal aggregation, analytics, kiosk polling).
//! The completion history itself is only ever written through
//! [`crate::completion::CompletionEngine`].

use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr, time::Duration};
use uuid::Uuid;

use crate::model::{CompletionRow, PersonRow, TaskKind, TaskRow, WorkspaceRow};

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the caller indefinitely.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Execute a future with the standard query timeout.
/// Returns an error if the operation takes longer than `QUERY_TIMEOUT`.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        Self::open_with_slow_query(data_dir, 0).await
    }

    /// Open storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding
    /// it are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn open_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("routinely.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                // Writers fail the instant the database is locked instead of
                // queueing behind the busy handler. Contention is resolved by
                // telling the loser to retry, never by waiting.
                .busy_timeout(Duration::ZERO)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    /// The completion engine runs its transactions on this pool.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/storage/migrations")
            .run(pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Health probe: true when the database answers a trivial query.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    // ─── Workspaces ─────────────────────────────────────────────────────────

    pub async fn create_workspace(&self, name: &str) -> Result<WorkspaceRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO workspaces (id, name, last_activity_at, created_at) VALUES (?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_workspace(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("workspace not found after insert"))
    }

    pub async fn get_workspace(&self, id: &str) -> Result<Option<WorkspaceRow>> {
        Ok(sqlx::query_as("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn workspace_last_activity(&self, id: &str) -> Result<Option<i64>> {
        Ok(
            sqlx::query_scalar("SELECT last_activity_at FROM workspaces WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // ─── Persons ────────────────────────────────────────────────────────────

    pub async fn create_person(&self, workspace_id: &str, name: &str) -> Result<PersonRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO persons (id, workspace_id, name, last_activity_at, created_at) \
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_person(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("person not found after insert"))
    }

    pub async fn get_person(&self, id: &str) -> Result<Option<PersonRow>> {
        Ok(sqlx::query_as("SELECT * FROM persons WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// The propagated freshness timestamp polling kiosks compare against.
    pub async fn person_last_activity(&self, id: &str) -> Result<Option<i64>> {
        Ok(
            sqlx::query_scalar("SELECT last_activity_at FROM persons WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // ─── Tasks ──────────────────────────────────────────────────────────────

    pub async fn create_task(
        &self,
        workspace_id: &str,
        title: &str,
        kind: TaskKind,
        unit_label: Option<&str>,
        reset_rule: &str,
    ) -> Result<TaskRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO tasks (id, workspace_id, title, kind, unit_label, reset_rule, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(title)
        .bind(kind.as_str())
        .bind(unit_label)
        .bind(reset_rule)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_task(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task not found after insert"))
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRow>> {
        Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    // ─── Completion history (read-only surface) ─────────────────────────────

    /// All completion rows for a (task, person, period) window in sequence
    /// order. `reset_epoch` is the caller-supplied period lower bound.
    pub async fn completions_in_period(
        &self,
        task_id: &str,
        person_id: &str,
        reset_epoch: i64,
    ) -> Result<Vec<CompletionRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM completions \
                 WHERE task_id = ? AND person_id = ? AND completed_at >= ? \
                 ORDER BY sequence_number ASC",
            )
            .bind(task_id)
            .bind(person_id)
            .bind(reset_epoch)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    pub async fn completion_count(
        &self,
        task_id: &str,
        person_id: &str,
        reset_epoch: i64,
    ) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM completions \
             WHERE task_id = ? AND person_id = ? AND completed_at >= ?",
        )
        .bind(task_id)
        .bind(person_id)
        .bind(reset_epoch)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Current period total for a bounded-sum task. The running sum is
    /// denormalized onto each record, so this reads one row, not the period.
    pub async fn current_sum(
        &self,
        task_id: &str,
        person_id: &str,
        reset_epoch: i64,
    ) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COALESCE((SELECT running_sum FROM completions \
               WHERE task_id = ? AND person_id = ? AND completed_at >= ? \
               ORDER BY sequence_number DESC LIMIT 1), 0)",
        )
        .bind(task_id)
        .bind(person_id)
        .bind(reset_epoch)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn completion_by_key(&self, idempotency_key: &str) -> Result<Option<CompletionRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM completions WHERE idempotency_key = ?")
                .bind(idempotency_key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn get_completion(&self, id: &str) -> Result<Option<CompletionRow>> {
        Ok(sqlx::query_as("SELECT * FROM completions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}
