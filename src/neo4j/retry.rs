//! Retry policy: error classification and backoff
//!
//! Pure functions only. The executor decides *when* to call them.

use super::error::DbError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Neo4j status codes that always warrant another attempt.
pub const RETRYABLE_CODES: &[&str] = &[
    "Neo.TransientError.Transaction.DeadlockDetected",
    "Neo.TransientError.Transaction.LockClientStopped",
    "Neo.TransientError.Transaction.Terminated",
    "Neo.TransientError.General.DatabaseUnavailable",
    "ServiceUnavailable",
    "SessionExpired",
];

/// Lower-case fragments marking an error message as transient.
pub const TRANSIENT_PATTERNS: &[&str] = &[
    "deadlock",
    "lock client stopped",
    "database unavailable",
    "network error",
    "connection lost",
    "timeout",
];

/// Upper bound of the jitter, as a fraction of the base delay.
pub const JITTER_FACTOR: f64 = 0.3;

/// Retry behaviour for one executor call.
///
/// Treated as an immutable value: callers build one (usually from
/// [`crate::Config`]) and pass it by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Whether a timed-out attempt may be retried. A retry after a timeout can
    /// repeat a write that the server eventually committed; turn this off for
    /// transaction functions that are not idempotent.
    pub retry_on_timeout: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            timeout_ms: 30_000,
            retry_on_timeout: true,
        }
    }
}

impl RetryConfig {
    /// A config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_retry_delay_ms(mut self, ms: u64) -> Self {
        self.initial_retry_delay_ms = ms;
        self
    }

    pub fn with_max_retry_delay_ms(mut self, ms: u64) -> Self {
        self.max_retry_delay_ms = ms;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject configurations the executor cannot honour.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.timeout_ms == 0 {
            return Err(DbError::Configuration("timeout_ms must be > 0".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(DbError::Configuration(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_retry_delay_ms > self.max_retry_delay_ms {
            return Err(DbError::Configuration(format!(
                "initial_retry_delay_ms ({}) exceeds max_retry_delay_ms ({})",
                self.initial_retry_delay_ms, self.max_retry_delay_ms
            )));
        }
        Ok(())
    }
}

/// Whether `error` is transient: a whitelisted status code or a message
/// matching one of [`TRANSIENT_PATTERNS`].
///
/// Configuration and connectivity failures are always fatal, whatever their
/// cause says.
pub fn is_retryable(error: &DbError) -> bool {
    if matches!(
        error,
        DbError::Configuration(_) | DbError::Connectivity { .. }
    ) {
        return false;
    }
    if let Some(code) = error.code() {
        if RETRYABLE_CODES.contains(&code) {
            return true;
        }
    }
    let message = error.to_string().to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| message.contains(p))
}

/// Whether the executor should retry `error` under `config`.
///
/// Same as [`is_retryable`], except timeouts are gated by
/// `config.retry_on_timeout`.
pub fn should_retry(error: &DbError, config: &RetryConfig) -> bool {
    if error.is_timeout() && !config.retry_on_timeout {
        return false;
    }
    is_retryable(error)
}

/// Pre-jitter delay before retry number `attempt` (1-indexed), capped at
/// `max_retry_delay_ms`.
pub fn base_delay_ms(attempt: u32, config: &RetryConfig) -> u64 {
    let exponent = attempt.max(1) - 1;
    let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
    let raw = config.initial_retry_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = raw.min(config.max_retry_delay_ms as f64);
    if capped.is_finite() {
        capped as u64
    } else {
        config.max_retry_delay_ms
    }
}

/// Delay with a caller-supplied jitter sample in `[0, 1)`.
///
/// The result always lies in `[base, base * 1.3]`.
pub fn delay_with_jitter(attempt: u32, config: &RetryConfig, sample: f64) -> u64 {
    let base = base_delay_ms(attempt, config);
    let sample = sample.clamp(0.0, 1.0);
    let jitter = (base as f64 * JITTER_FACTOR * sample).floor() as u64;
    base.saturating_add(jitter)
}

/// Backoff before retry number `attempt`, with uniform random jitter.
pub fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    Duration::from_millis(delay_with_jitter(attempt, config, rand::random::<f64>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RetryConfig {
        RetryConfig::default()
            .with_initial_retry_delay_ms(100)
            .with_backoff_multiplier(2.0)
            .with_max_retry_delay_ms(1_000)
    }

    #[test]
    fn test_whitelisted_codes_are_retryable() {
        for code in RETRYABLE_CODES {
            let err = DbError::Database {
                code: code.to_string(),
                message: "something".into(),
            };
            assert!(is_retryable(&err), "{code} should be retryable");
        }
    }

    #[test]
    fn test_message_patterns_are_retryable() {
        assert!(is_retryable(&DbError::operation("Connection lost while reading")));
        assert!(is_retryable(&DbError::Driver("Network Error: reset".into())));
        assert!(is_retryable(&DbError::TransactionTimeout { timeout_ms: 10 }));
        assert!(is_retryable(&DbError::ServiceUnavailable("refused".into())));
    }

    #[test]
    fn test_other_errors_are_fatal() {
        let syntax = DbError::Database {
            code: "Neo.ClientError.Statement.SyntaxError".into(),
            message: "Invalid input 'MATC'".into(),
        };
        assert!(!is_retryable(&syntax));
        assert!(!is_retryable(&DbError::Configuration("missing uri".into())));
        assert!(!is_retryable(&DbError::operation("project not found")));
    }

    #[test]
    fn test_connectivity_failures_are_fatal() {
        let err = DbError::Connectivity {
            uri: "bolt://db:7687".into(),
            source: Box::new(DbError::ServiceUnavailable("network error".into())),
        };
        assert_eq!(err.code(), Some("ServiceUnavailable"));
        assert!(!is_retryable(&err));
        assert!(!should_retry(&err, &cfg()));
        assert!(!is_retryable(&DbError::Configuration(
            "connection timeout must be set".into()
        )));
    }

    #[test]
    fn test_timeout_gated_by_config() {
        let err = DbError::TransactionTimeout { timeout_ms: 50 };
        assert!(should_retry(&err, &cfg()));
        assert!(!should_retry(&err, &cfg().with_retry_on_timeout(false)));
        let deadlock = DbError::operation("deadlock detected");
        assert!(should_retry(&deadlock, &cfg().with_retry_on_timeout(false)));
    }

    #[test]
    fn test_base_delay_grows_then_caps() {
        let c = cfg();
        assert_eq!(base_delay_ms(1, &c), 100);
        assert_eq!(base_delay_ms(2, &c), 200);
        assert_eq!(base_delay_ms(3, &c), 400);
        assert_eq!(base_delay_ms(4, &c), 800);
        assert_eq!(base_delay_ms(5, &c), 1_000);
        assert_eq!(base_delay_ms(60, &c), 1_000);
        assert_eq!(base_delay_ms(u32::MAX, &c), 1_000);
        // attempt 0 behaves like the first retry
        assert_eq!(base_delay_ms(0, &c), 100);
    }

    #[test]
    fn test_delay_is_monotonic_until_cap() {
        let c = cfg();
        let mut previous = 0;
        for attempt in 1..20 {
            let base = base_delay_ms(attempt, &c);
            assert!(base >= previous);
            assert!(base <= c.max_retry_delay_ms);
            previous = base;
        }
    }

    #[test]
    fn test_jitter_bounds() {
        let c = cfg();
        for attempt in 1..8 {
            let base = base_delay_ms(attempt, &c);
            assert_eq!(delay_with_jitter(attempt, &c, 0.0), base);
            let top = delay_with_jitter(attempt, &c, 1.0);
            assert!(top <= base + base * 3 / 10);
            for _ in 0..50 {
                let ms = compute_delay(attempt, &c).as_millis() as u64;
                assert!(ms >= base && ms as f64 <= base as f64 * 1.3, "{ms} vs {base}");
            }
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::default().with_timeout_ms(0).validate().is_err());
        assert!(RetryConfig::default()
            .with_backoff_multiplier(0.5)
            .validate()
            .is_err());
        assert!(RetryConfig::default()
            .with_initial_retry_delay_ms(10_000)
            .with_max_retry_delay_ms(100)
            .validate()
            .is_err());
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(RetryConfig::no_retry().max_retries, 0);
    }
}
