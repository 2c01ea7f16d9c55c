//! Retrying transaction executor
//!
//! Every read and write against the graph goes through
//! [`TransactionExecutor::execute_with_retry`]. One call makes at most
//! `max_retries + 1` attempts; each attempt:
//!
//! 1. begins a transaction on the caller's session,
//! 2. runs the transaction function, then commits on `Ok` or rolls back on `Err`,
//! 3. is raced against `timeout_ms`.
//!
//! Step 2 runs in a detached task. When the timer wins, the caller gets
//! [`DbError::TransactionTimeout`] and the task is left to finish on its own:
//! the server may still commit it, but its outcome is dropped with the join
//! handle and can never reach the caller or a later attempt.

use super::driver::Session;
use super::error::DbError;
use super::retry::{compute_delay, should_retry, RetryConfig};
use super::traits::{AccessMode, TxRef};
use crate::events::{self, EventSink, TransactionEvent, TransactionFailed, TransactionSucceeded};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Result of a committed executor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult<T> {
    pub data: T,
    /// Attempts beyond the first
    pub retries: u32,
    /// Wall-clock time across all attempts and backoff sleeps
    pub duration_ms: u64,
}

/// One step of a batch. Build with [`batch_op`].
pub type BatchOperation<T> =
    Box<dyn Fn(TxRef) -> BoxFuture<'static, Result<T, DbError>> + Send + Sync>;

/// Box an async closure into a [`BatchOperation`].
pub fn batch_op<T, F, Fut>(f: F) -> BatchOperation<T>
where
    F: Fn(TxRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, DbError>> + Send + 'static,
{
    Box::new(move |tx| f(tx).boxed())
}

/// Runs transaction functions with timeout, retry and backoff.
pub struct TransactionExecutor {
    defaults: RetryConfig,
    events: Arc<dyn EventSink>,
}

impl TransactionExecutor {
    /// `defaults` applies to every call that does not pass its own config.
    pub fn new(defaults: RetryConfig, events: Arc<dyn EventSink>) -> Self {
        Self { defaults, events }
    }

    pub fn defaults(&self) -> &RetryConfig {
        &self.defaults
    }

    /// Run `f` in a `mode` transaction on `session`, retrying transient
    /// failures.
    ///
    /// `f` may be invoked several times and must not assume it runs once.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        session: &Session,
        f: F,
        config: Option<&RetryConfig>,
        mode: AccessMode,
    ) -> Result<TransactionResult<T>, DbError>
    where
        T: Send + 'static,
        F: Fn(TxRef) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        let operation = match mode {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        };
        self.run(session, &f, config, mode, operation).await
    }

    pub async fn execute_read_with_retry<T, F, Fut>(
        &self,
        session: &Session,
        f: F,
        config: Option<&RetryConfig>,
    ) -> Result<TransactionResult<T>, DbError>
    where
        T: Send + 'static,
        F: Fn(TxRef) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        self.execute_with_retry(session, f, config, AccessMode::Read)
            .await
    }

    pub async fn execute_write_with_retry<T, F, Fut>(
        &self,
        session: &Session,
        f: F,
        config: Option<&RetryConfig>,
    ) -> Result<TransactionResult<T>, DbError>
    where
        T: Send + 'static,
        F: Fn(TxRef) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        self.execute_with_retry(session, f, config, AccessMode::Write)
            .await
    }

    /// Run `ops` in order inside a single write transaction.
    ///
    /// The first failing operation stops the batch, rolls the transaction
    /// back and counts as one failed attempt. `data[i]` is the result of
    /// `ops[i]`.
    pub async fn execute_batch_with_retry<T>(
        &self,
        session: &Session,
        ops: Vec<BatchOperation<T>>,
        config: Option<&RetryConfig>,
    ) -> Result<TransactionResult<Vec<T>>, DbError>
    where
        T: Send + 'static,
    {
        let ops = Arc::new(ops);
        let batch = move |tx: TxRef| {
            let ops = Arc::clone(&ops);
            async move {
                let mut results = Vec::with_capacity(ops.len());
                for (index, op) in ops.iter().enumerate() {
                    match op(Arc::clone(&tx)).await {
                        Ok(value) => results.push(value),
                        Err(e) => {
                            debug!(index, total = ops.len(), error = %e, "Batch operation failed");
                            return Err(e);
                        }
                    }
                }
                Ok(results)
            }
        };
        self.run(session, &batch, config, AccessMode::Write, "batch")
            .await
    }

    async fn run<T, F, Fut>(
        &self,
        session: &Session,
        f: &F,
        config: Option<&RetryConfig>,
        mode: AccessMode,
        operation: &'static str,
    ) -> Result<TransactionResult<T>, DbError>
    where
        T: Send + 'static,
        F: Fn(TxRef) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        let config = config.unwrap_or(&self.defaults);
        let started = Instant::now();
        let max_attempts = config.max_retries.saturating_add(1);

        for attempt in 1..=max_attempts {
            let err = match self.attempt(session, f, config).await {
                Ok(data) => {
                    let duration_ms = elapsed_ms(started);
                    debug!(
                        session_id = %session.id(),
                        operation,
                        mode = %mode,
                        attempts = attempt,
                        duration_ms,
                        "Transaction committed"
                    );
                    self.events
                        .publish(TransactionEvent::Succeeded(TransactionSucceeded {
                            timestamp: events::now(),
                            operation: operation.to_string(),
                            attempts: attempt,
                            duration_ms,
                        }));
                    return Ok(TransactionResult {
                        data,
                        retries: attempt - 1,
                        duration_ms,
                    });
                }
                Err(err) => err,
            };

            let retryable = should_retry(&err, config);
            warn!(
                session_id = %session.id(),
                operation,
                attempt,
                max_attempts,
                error_code = err.code().unwrap_or("none"),
                error_kind = err.kind(),
                elapsed_ms = elapsed_ms(started),
                retryable,
                error = %err,
                "Transaction attempt failed"
            );

            if retryable && attempt < max_attempts {
                let delay = compute_delay(attempt, config);
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            self.events
                .publish(TransactionEvent::Failed(TransactionFailed {
                    timestamp: events::now(),
                    operation: operation.to_string(),
                    error: err.to_string(),
                    error_code: err.code().map(str::to_owned),
                    attempts: attempt,
                    duration_ms: elapsed_ms(started),
                }));
            return Err(err);
        }

        // Every iteration returns or continues, and the last one cannot continue.
        Err(DbError::Internal(
            "retry loop ended without a terminal attempt".into(),
        ))
    }

    async fn attempt<T, F, Fut>(
        &self,
        session: &Session,
        f: &F,
        config: &RetryConfig,
    ) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: Fn(TxRef) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        let backend = session.backend();
        let work = async {
            let tx = backend.begin_transaction().await?;
            // A panic on either side of the transaction function still rolls back.
            let pending = match panic::catch_unwind(AssertUnwindSafe(|| f(Arc::clone(&tx)))) {
                Ok(pending) => pending,
                Err(_) => return settle(tx, Err(panicked())).await,
            };
            let handle = tokio::spawn(async move {
                let outcome = AssertUnwindSafe(pending)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(panicked()));
                settle(tx, outcome).await
            });
            handle
                .await
                .map_err(|e| DbError::Internal(format!("transaction attempt aborted: {e}")))?
        };

        match tokio::time::timeout(config.timeout(), work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DbError::TransactionTimeout {
                timeout_ms: config.timeout_ms,
            }),
        }
    }
}

/// Commit on success, roll back on failure. A commit error replaces the
/// result; a rollback error is only logged so the original failure survives.
async fn settle<T>(tx: TxRef, outcome: Result<T, DbError>) -> Result<T, DbError> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

fn panicked() -> DbError {
    DbError::Internal("transaction function panicked".into())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
