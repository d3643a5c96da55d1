//! Idempotency key derivation.
//!
//! A completion request is fingerprinted so that an accidental double-submit
//! from one device (a double-tap, a transport retry) collapses to a single
//! stored effect. Two humans tapping the same task on different devices in
//! the same instant stay distinct: the device id is part of the tuple, and
//! the cardinality bound, not the key, arbitrates the second intent.

use sha2::{Digest, Sha256};

/// Device label used when the client did not identify itself.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Derive the deterministic fingerprint of a completion request.
///
/// `completed_epoch` is rounded down into `bucket_secs`-wide buckets, so
/// sub-second resubmissions from the same device land on the same key.
/// The bucket width is a tunable, not a hard contract; widths below one
/// second are clamped to one.
pub fn derive_key(
    task_id: &str,
    person_id: &str,
    value: Option<&str>,
    device_id: Option<&str>,
    completed_epoch: i64,
    bucket_secs: i64,
) -> String {
    let bucket = completed_epoch.div_euclid(bucket_secs.max(1));
    let device = device_id.unwrap_or(UNKNOWN_DEVICE);
    let canonical = format!(
        "{task_id}|{person_id}|{}|{device}|{bucket}",
        value.unwrap_or("")
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let a = derive_key("t1", "p1", Some("5"), Some("kiosk-a"), 1_700_000_000, 1);
        let b = derive_key("t1", "p1", Some("5"), Some("kiosk-a"), 1_700_000_000, 1);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // 32 bytes x 2 hex chars
    }

    #[test]
    fn same_device_same_second_collapses() {
        // Sub-second timing is already gone by the time the epoch is an
        // integer; two requests inside one bucket share the key.
        let a = derive_key("t1", "p1", None, Some("kiosk-a"), 100, 1);
        let b = derive_key("t1", "p1", None, Some("kiosk-a"), 100, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn different_devices_never_collapse() {
        let a = derive_key("t1", "p1", None, Some("kiosk-a"), 100, 1);
        let b = derive_key("t1", "p1", None, Some("kiosk-b"), 100, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn missing_device_uses_the_unknown_label() {
        let a = derive_key("t1", "p1", None, None, 100, 1);
        let b = derive_key("t1", "p1", None, Some(UNKNOWN_DEVICE), 100, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn adjacent_buckets_differ() {
        let a = derive_key("t1", "p1", None, Some("kiosk-a"), 100, 1);
        let b = derive_key("t1", "p1", None, Some("kiosk-a"), 101, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn wider_bucket_collapses_adjacent_seconds() {
        let a = derive_key("t1", "p1", None, Some("kiosk-a"), 100, 5);
        let b = derive_key("t1", "p1", None, Some("kiosk-a"), 103, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn value_participates_in_the_tuple() {
        let a = derive_key("t1", "p1", Some("5"), Some("kiosk-a"), 100, 1);
        let b = derive_key("t1", "p1", Some("6"), Some("kiosk-a"), 100, 1);
        assert_ne!(a, b);
    }
}
