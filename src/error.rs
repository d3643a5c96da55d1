//! Typed error taxonomy for the completion engine.
//!
//! Every variant aborts the enclosing transaction with zero partial effects.
//! The engine never retries internally; `is_retryable` tells the caller
//! whether resubmitting the same request is safe.

/// Errors returned by [`crate::completion::CompletionEngine::complete_task`].
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The period's completion rows are write-locked by another in-flight
    /// request. Transient; resolve by retrying.
    #[error("completion rows for this period are locked by another writer")]
    Contended,
    /// A single-shot task is already completed in this period. Terminal for
    /// the period.
    #[error("task already completed this period")]
    AlreadyCompleted,
    /// The kind's per-period cardinality bound is already met. Terminal for
    /// the period.
    #[error("completion limit reached for this period")]
    LimitReached,
    /// Missing or out-of-range numeric value. Caller bug, not retryable
    /// as submitted.
    #[error("invalid completion value: {0}")]
    InvalidValue(String),
    /// Unknown task or person id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    /// Infrastructure failure (I/O, timeout). Safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),
}

impl CompletionError {
    /// Whether the caller may resubmit the same request verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::Contended | CompletionError::Transient(_)
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        CompletionError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify a sqlx failure: an immediate SQLITE_BUSY means another
    /// writer holds the period lock; everything else is infrastructure.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            CompletionError::Contended
        } else {
            CompletionError::Transient(err.to_string())
        }
    }
}

/// True when the error is SQLite's immediate lock refusal. With a zero busy
/// timeout this surfaces the instant a competing write transaction is open.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}

/// True when an insert lost the idempotency race: two requests derived the
/// same key and both made it past the duplicate check. The winner's row is
/// re-fetched and returned as a replay.
pub(crate) fn is_idempotency_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            msg.contains("unique constraint failed")
                && msg.contains("completions.idempotency_key")
        }
        _ => false,
    }
}
