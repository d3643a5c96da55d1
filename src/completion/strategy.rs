//! Per-kind completion policies.
//!
//! All three policies run after the locker has returned the period's locked
//! rows, inside the same transaction as the final insert. The bounds are
//! business rules (checkbox vs. tally vs. numeric accumulator), enforced
//! here rather than as a separate pre-check so no race window opens between
//! "check" and "write".

use crate::error::CompletionError;
use crate::model::{CompletionRow, TaskKind};

/// Single-shot tasks: one completion per period.
pub const SINGLE_SHOT_BOUND: usize = 1;
/// Bounded-sequence tasks: up to nine tallied check-ins per period.
pub const SEQUENCE_BOUND: usize = 9;
/// Bounded-sum tasks: up to twenty numeric entries per period.
pub const SUM_BOUND: usize = 20;

/// Accepted numeric value range for bounded-sum entries.
pub const VALUE_MIN: i64 = 1;
pub const VALUE_MAX: i64 = 999;

/// What the coordinator should insert, decided against the locked set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    /// Gapless 1..N position within the period.
    pub sequence_number: i64,
    /// Validated numeric value (bounded-sum only).
    pub value: Option<i64>,
    /// Cumulative total through this record (bounded-sum only).
    pub running_sum: Option<i64>,
}

/// Validate the request against the locked rows and decide the new row's
/// sequence number and running sum.
pub fn plan(
    kind: TaskKind,
    locked: &[CompletionRow],
    value: Option<&str>,
) -> Result<InsertPlan, CompletionError> {
    let n = locked.len();
    match kind {
        TaskKind::SingleShot => {
            if n >= SINGLE_SHOT_BOUND {
                return Err(CompletionError::AlreadyCompleted);
            }
            Ok(InsertPlan {
                sequence_number: 1,
                value: None,
                running_sum: None,
            })
        }
        TaskKind::BoundedSequence => {
            if n >= SEQUENCE_BOUND {
                return Err(CompletionError::LimitReached);
            }
            Ok(InsertPlan {
                sequence_number: n as i64 + 1,
                value: None,
                running_sum: None,
            })
        }
        TaskKind::BoundedSum => {
            // Value validation comes first: a malformed request must surface
            // as InvalidValue even when the period is already full.
            let value = parse_value(value)?;
            if n >= SUM_BOUND {
                return Err(CompletionError::LimitReached);
            }
            let current_total: i64 = locked.iter().map(CompletionRow::value_as_int).sum();
            Ok(InsertPlan {
                sequence_number: n as i64 + 1,
                value: Some(value),
                running_sum: Some(current_total + value),
            })
        }
    }
}

fn parse_value(raw: Option<&str>) -> Result<i64, CompletionError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CompletionError::InvalidValue("missing numeric value".into()))?;
    let value: i64 = raw
        .parse()
        .map_err(|_| CompletionError::InvalidValue(format!("not an integer: {raw}")))?;
    if !(VALUE_MIN..=VALUE_MAX).contains(&value) {
        return Err(CompletionError::InvalidValue(format!(
            "out of range {VALUE_MIN}..{VALUE_MAX}: {value}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;
    use proptest::prelude::*;

    fn row(sequence_number: i64, value: Option<i64>, running_sum: Option<i64>) -> CompletionRow {
        CompletionRow {
            id: new_id(),
            task_id: "t".into(),
            person_id: "p".into(),
            value: value.map(|v| v.to_string()),
            notes: None,
            sequence_number,
            running_sum,
            completed_at: 0,
            idempotency_key: new_id(),
            device_id: None,
            session_id: None,
            created_at: 0,
        }
    }

    /// Replay a sequence of planned inserts, growing the locked set the way
    /// the store would between transactions.
    fn apply_all(kind: TaskKind, values: &[Option<&str>]) -> Vec<Result<InsertPlan, CompletionError>> {
        let mut period: Vec<CompletionRow> = Vec::new();
        let mut results = Vec::new();
        for value in values {
            let result = plan(kind, &period, *value);
            if let Ok(p) = &result {
                period.push(row(p.sequence_number, p.value, p.running_sum));
            }
            results.push(result);
        }
        results
    }

    #[test]
    fn single_shot_first_wins_second_rejected() {
        let results = apply_all(TaskKind::SingleShot, &[None, None]);
        assert_eq!(results[0].as_ref().unwrap().sequence_number, 1);
        assert!(matches!(results[1], Err(CompletionError::AlreadyCompleted)));
    }

    #[test]
    fn bounded_sequence_caps_at_nine() {
        let calls = vec![None; 10];
        let results = apply_all(TaskKind::BoundedSequence, &calls);
        let sequence: Vec<i64> = results[..9]
            .iter()
            .map(|r| r.as_ref().unwrap().sequence_number)
            .collect();
        assert_eq!(sequence, (1..=9).collect::<Vec<i64>>());
        assert!(matches!(results[9], Err(CompletionError::LimitReached)));
    }

    #[test]
    fn bounded_sum_accumulates_running_totals() {
        let results = apply_all(TaskKind::BoundedSum, &[Some("5"), Some("10"), Some("3")]);
        let sums: Vec<i64> = results
            .iter()
            .map(|r| r.as_ref().unwrap().running_sum.unwrap())
            .collect();
        assert_eq!(sums, vec![5, 15, 18]);
    }

    #[test]
    fn bounded_sum_rejects_out_of_range_values() {
        for bad in [Some("0"), Some("1000"), Some("-3"), Some("nope"), Some(""), None] {
            let result = plan(TaskKind::BoundedSum, &[], bad);
            assert!(
                matches!(result, Err(CompletionError::InvalidValue(_))),
                "expected InvalidValue for {bad:?}"
            );
        }
    }

    #[test]
    fn bounded_sum_value_checked_before_limit() {
        let full: Vec<CompletionRow> = (1..=SUM_BOUND as i64)
            .map(|i| row(i, Some(1), Some(i)))
            .collect();
        let result = plan(TaskKind::BoundedSum, &full, Some("0"));
        assert!(matches!(result, Err(CompletionError::InvalidValue(_))));
        let result = plan(TaskKind::BoundedSum, &full, Some("5"));
        assert!(matches!(result, Err(CompletionError::LimitReached)));
    }

    #[test]
    fn bounded_sum_treats_unparseable_history_as_zero() {
        let mut damaged = row(1, None, Some(7));
        damaged.value = Some("garbled".into());
        let result = plan(TaskKind::BoundedSum, &[damaged], Some("5")).unwrap();
        assert_eq!(result.running_sum, Some(5));
        assert_eq!(result.sequence_number, 2);
    }

    proptest! {
        #[test]
        fn sum_sequences_stay_gapless_and_reconstructible(
            values in proptest::collection::vec(VALUE_MIN..=VALUE_MAX, 1..SUM_BOUND)
        ) {
            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            let calls: Vec<Option<&str>> = rendered.iter().map(|v| Some(v.as_str())).collect();
            let results = apply_all(TaskKind::BoundedSum, &calls);

            let mut expected_sum = 0;
            for (i, result) in results.iter().enumerate() {
                let p = result.as_ref().unwrap();
                expected_sum += values[i];
                prop_assert_eq!(p.sequence_number, i as i64 + 1);
                prop_assert_eq!(p.running_sum, Some(expected_sum));
            }
        }

        #[test]
        fn sequence_bound_is_never_exceeded(extra in 0usize..6) {
            let calls = vec![None; SEQUENCE_BOUND + extra];
            let results = apply_all(TaskKind::BoundedSequence, &calls);
            let successes = results.iter().filter(|r| r.is_ok()).count();
            prop_assert_eq!(successes, SEQUENCE_BOUND);
        }
    }
}
