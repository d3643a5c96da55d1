//! Completion engine data model types.

use serde::{Deserialize, Serialize};

/// Generate a new ULID string.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

// ─── Task kinds ──────────────────────────────────────────────────────────────

/// How a task's completions are bounded within one period.
///
/// This is a closed set — the bounds are business rules, not plugin points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// One completion per period (a plain checkbox).
    SingleShot,
    /// Up to nine tallied check-ins per period.
    BoundedSequence,
    /// Up to twenty numeric entries per period, accumulated into a running sum.
    BoundedSum,
}

impl TaskKind {
    /// Column encoding used in `tasks.kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::SingleShot => "single_shot",
            TaskKind::BoundedSequence => "bounded_sequence",
            TaskKind::BoundedSum => "bounded_sum",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single_shot" => Some(TaskKind::SingleShot),
            "bounded_sequence" => Some(TaskKind::BoundedSequence),
            "bounded_sum" => Some(TaskKind::BoundedSum),
            _ => None,
        }
    }
}

// ─── Row types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkspaceRow {
    pub id: String,
    pub name: String,
    /// Unix seconds of the last visible-state change in this workspace.
    /// Polling clients compare against this instead of re-querying history.
    pub last_activity_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PersonRow {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    /// Unix seconds of this person's last visible-state change.
    pub last_activity_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRow {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    /// One of `single_shot`, `bounded_sequence`, `bounded_sum`.
    pub kind: String,
    /// Unit label shown next to numeric entries ("minutes", "pages", …).
    pub unit_label: Option<String>,
    /// Opaque reset rule name; period-boundary math lives outside this crate.
    pub reset_rule: String,
    pub created_at: i64,
}

impl TaskRow {
    pub fn task_kind(&self) -> Option<TaskKind> {
        TaskKind::parse(&self.kind)
    }
}

/// The append-only completion fact. Created by exactly one successful engine
/// transaction, never mutated or deleted afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRow {
    pub id: String,
    pub task_id: String,
    pub person_id: String,
    /// Numeric string 1–999; present only for bounded-sum tasks.
    pub value: Option<String>,
    pub notes: Option<String>,
    /// Gapless 1..N within the period.
    pub sequence_number: i64,
    /// Cumulative total through this record (bounded-sum tasks only).
    pub running_sum: Option<i64>,
    pub completed_at: i64,
    pub idempotency_key: String,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub created_at: i64,
}

impl CompletionRow {
    /// The record's value parsed as an integer; unparseable or missing
    /// values count as zero when summing.
    pub fn value_as_int(&self) -> i64 {
        self.value
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_round_trips_column_encoding() {
        for kind in [
            TaskKind::SingleShot,
            TaskKind::BoundedSequence,
            TaskKind::BoundedSum,
        ] {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::parse("weekly"), None);
    }

    #[test]
    fn value_as_int_defaults_to_zero() {
        let mut row = CompletionRow {
            id: new_id(),
            task_id: "t".into(),
            person_id: "p".into(),
            value: Some("15".into()),
            notes: None,
            sequence_number: 1,
            running_sum: Some(15),
            completed_at: 0,
            idempotency_key: "k".into(),
            device_id: None,
            session_id: None,
            created_at: 0,
        };
        assert_eq!(row.value_as_int(), 15);
        row.value = Some("not-a-number".into());
        assert_eq!(row.value_as_int(), 0);
        row.value = None;
        assert_eq!(row.value_as_int(), 0);
    }
}
