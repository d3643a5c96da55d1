//! Period-scoped row locking.
//!
//! SQLite has no per-row `SELECT ... FOR UPDATE`, so the locker takes the
//! database write lock up front with `BEGIN IMMEDIATE` on a connection whose
//! busy timeout is zero: a contended acquisition fails instantly with
//! SQLITE_BUSY instead of queueing, and surfaces as `Contended`. The locked
//! read of the period's rows then happens inside that write transaction,
//! which SQLite runs at serializable isolation, so the set cannot change
//! between the read and the insert.

use sqlx::SqliteConnection;

use crate::error::CompletionError;
use crate::model::CompletionRow;

/// The (task, person, period) window a recording transaction owns.
pub(crate) struct PeriodScope<'a> {
    pub task_id: &'a str,
    pub person_id: &'a str,
    /// Unix seconds; rows with `completed_at >= reset_epoch` are in scope.
    pub reset_epoch: i64,
}

/// Open a fail-fast write transaction and return the period's existing rows
/// in sequence order. On any failure after the transaction opened, the
/// transaction is rolled back before the error is returned.
pub(crate) async fn acquire(
    conn: &mut SqliteConnection,
    scope: &PeriodScope<'_>,
) -> Result<Vec<CompletionRow>, CompletionError> {
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(CompletionError::from_sqlx)?;

    match read_period(conn, scope).await {
        Ok(rows) => Ok(rows),
        Err(err) => {
            rollback(conn).await;
            Err(err)
        }
    }
}

async fn read_period(
    conn: &mut SqliteConnection,
    scope: &PeriodScope<'_>,
) -> Result<Vec<CompletionRow>, CompletionError> {
    sqlx::query_as(
        "SELECT * FROM completions \
         WHERE task_id = ? AND person_id = ? AND completed_at >= ? \
         ORDER BY sequence_number ASC",
    )
    .bind(scope.task_id)
    .bind(scope.person_id)
    .bind(scope.reset_epoch)
    .fetch_all(&mut *conn)
    .await
    .map_err(CompletionError::from_sqlx)
}

pub(crate) async fn commit(conn: &mut SqliteConnection) -> Result<(), CompletionError> {
    sqlx::query("COMMIT")
        .execute(&mut *conn)
        .await
        .map_err(CompletionError::from_sqlx)?;
    Ok(())
}

/// Best-effort: a rollback that itself fails leaves a poisoned connection,
/// which the pool will discard rather than reuse mid-transaction.
pub(crate) async fn rollback(conn: &mut SqliteConnection) {
    let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
}
