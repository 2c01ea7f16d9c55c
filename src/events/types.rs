//! Transaction lifecycle event types

use serde::{Deserialize, Serialize};

/// Outcome of an executor call that eventually committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSucceeded {
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Operation label (`read`, `write`, `batch`)
    pub operation: String,
    /// Attempts made, including the successful one
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Terminal failure of an executor call (retries exhausted or fatal error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFailed {
    pub timestamp: String,
    pub operation: String,
    /// Display form of the error returned to the caller
    pub error: String,
    /// Neo4j status code, when the error carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Active sessions crossed the capacity warning threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolPressure {
    pub timestamp: String,
    pub active_sessions: usize,
    pub max_pool_size: usize,
}

/// The driver handle was closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverClosed {
    pub timestamp: String,
    pub total_sessions_created: usize,
    /// Sessions still leased at close time (should be 0)
    pub active_sessions: usize,
}

/// Closed set of events published by the access layer.
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    Succeeded(TransactionSucceeded),
    Failed(TransactionFailed),
    PoolPressure(PoolPressure),
    DriverClosed(DriverClosed),
}

impl TransactionEvent {
    /// Stable name of the event kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionEvent::Succeeded(_) => "transaction_succeeded",
            TransactionEvent::Failed(_) => "transaction_failed",
            TransactionEvent::PoolPressure(_) => "pool_pressure",
            TransactionEvent::DriverClosed(_) => "driver_closed",
        }
    }
}

/// Current time as an RFC 3339 string.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Receiver of access-layer events.
///
/// Implementations must be fire-and-forget: `publish` is called on the
/// transaction path and must not block or fail.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: TransactionEvent);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: TransactionEvent) {}
}
