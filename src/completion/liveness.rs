//! Liveness timestamp propagation.
//!
//! After a successful non-replay insert, the person's and the owning
//! workspace's `last_activity_at` move forward inside the same transaction.
//! Polling kiosks compare against these instead of re-querying completion
//! tables. Best-effort freshness signal, not a correctness invariant.

use sqlx::SqliteConnection;

/// Touch both liveness timestamps. Runs inside the caller's transaction.
pub(crate) async fn touch(
    conn: &mut SqliteConnection,
    person_id: &str,
    workspace_id: &str,
    at_epoch: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE persons SET last_activity_at = ? WHERE id = ?")
        .bind(at_epoch)
        .bind(person_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE workspaces SET last_activity_at = ? WHERE id = ?")
        .bind(at_epoch)
        .bind(workspace_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
