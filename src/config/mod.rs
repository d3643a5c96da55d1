use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_IDEMPOTENCY_BUCKET_SECS: i64 = 1;
const DEFAULT_TRANSACTION_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 100;

// ─── CompletionConfig ────────────────────────────────────────────────────────

/// Completion engine tuning (`[completion]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Width of the double-submit collapse window in seconds (default: 1).
    /// Requests from one device inside the same bucket share an idempotency
    /// key. Values below 1 are treated as 1.
    pub idempotency_bucket_secs: i64,
    /// Upper bound on a single recording transaction in seconds
    /// (default: 5). Exceeding it aborts with a retryable transient error.
    pub transaction_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            idempotency_bucket_secs: DEFAULT_IDEMPOTENCY_BUCKET_SECS,
            transaction_timeout_secs: DEFAULT_TRANSACTION_TIMEOUT_SECS,
        }
    }
}

// ─── ObservabilityConfig ─────────────────────────────────────────────────────

/// Engine observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds).
    /// Default: 100. Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_THRESHOLD_MS,
        }
    }
}

// ─── TOML config file ────────────────────────────────────────────────────────

/// Root of the engine's TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub completion: CompletionConfig,
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file. Missing sections and fields
    /// fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = EngineConfig::default();
        assert_eq!(config.completion.idempotency_bucket_secs, 1);
        assert_eq!(config.completion.transaction_timeout_secs, 5);
        assert_eq!(config.observability.slow_query_threshold_ms, 100);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: EngineConfig = toml::from_str(
            r#"
            [completion]
            idempotency_bucket_secs = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.completion.idempotency_bucket_secs, 3);
        assert_eq!(config.completion.transaction_timeout_secs, 5);
        assert_eq!(config.observability.slow_query_threshold_ms, 100);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.completion.transaction_timeout_secs, 5);
    }
}
