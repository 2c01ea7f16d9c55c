//! In-memory mock backend for testing.
//!
//! Implements the backend traits without a server and counts every call so
//! tests can assert on driver, session and transaction lifecycles.
//! Conditionally compiled with `#[cfg(test)]`.

use crate::neo4j::error::DbError;
use crate::neo4j::traits::{
    AccessMode, BackendSession, ConnectionSettings, GraphBackend, GraphConnector,
    GraphTransaction,
};
use async_trait::async_trait;
use neo4rs::{Query, Row};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Call counters shared by every object a [`MockConnector`] hands out.
#[derive(Debug, Default)]
pub struct MockStats {
    connects: AtomicUsize,
    verifies: AtomicUsize,
    backend_closes: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    transactions_begun: AtomicUsize,
    statements: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl MockStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
    pub fn verifies(&self) -> usize {
        self.verifies.load(Ordering::SeqCst)
    }
    pub fn backend_closes(&self) -> usize {
        self.backend_closes.load(Ordering::SeqCst)
    }
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }
    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }
    pub fn transactions_begun(&self) -> usize {
        self.transactions_begun.load(Ordering::SeqCst)
    }
    pub fn statements(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

/// Connector producing [`MockBackend`]s.
#[derive(Debug, Default)]
pub struct MockConnector {
    stats: Arc<MockStats>,
    failing_connects: AtomicUsize,
    failing_verifications: AtomicUsize,
    connect_delay: Duration,
    open_delay: Duration,
    close_delay: Duration,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    /// The next `n` connect calls fail before a driver exists.
    pub fn failing_connects(self, n: usize) -> Self {
        self.failing_connects.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` drivers fail their connectivity check.
    pub fn failing_verifications(self, n: usize) -> Self {
        self.failing_verifications.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Sessions take `delay` to close.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }
}

fn take_one(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl GraphConnector for MockConnector {
    async fn connect(
        &self,
        _settings: &ConnectionSettings,
    ) -> Result<Arc<dyn GraphBackend>, DbError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if take_one(&self.failing_connects) {
            return Err(DbError::ServiceUnavailable("connection refused".into()));
        }
        Ok(Arc::new(MockBackend {
            stats: Arc::clone(&self.stats),
            fail_verify: take_one(&self.failing_verifications),
            open_delay: self.open_delay,
            close_delay: self.close_delay,
        }))
    }
}

/// Driver handle with no server behind it.
pub struct MockBackend {
    stats: Arc<MockStats>,
    fail_verify: bool,
    open_delay: Duration,
    close_delay: Duration,
}

#[async_trait]
impl GraphBackend for MockBackend {
    async fn verify_connectivity(&self) -> Result<(), DbError> {
        self.stats.verifies.fetch_add(1, Ordering::SeqCst);
        if self.fail_verify {
            return Err(DbError::ServiceUnavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn open_session(
        &self,
        _database: Option<&str>,
        _mode: AccessMode,
    ) -> Result<Arc<dyn BackendSession>, DbError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        self.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            stats: Arc::clone(&self.stats),
            close_delay: self.close_delay,
        }))
    }

    async fn close(&self) -> Result<(), DbError> {
        self.stats.backend_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockSession {
    stats: Arc<MockStats>,
    close_delay: Duration,
}

#[async_trait]
impl BackendSession for MockSession {
    async fn begin_transaction(&self) -> Result<Arc<dyn GraphTransaction>, DbError> {
        self.stats.transactions_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransaction {
            stats: Arc::clone(&self.stats),
            finished: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), DbError> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.stats.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockTransaction {
    stats: Arc<MockStats>,
    finished: AtomicBool,
}

impl MockTransaction {
    fn ensure_open(&self) -> Result<(), DbError> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(DbError::Driver("transaction already closed".into()));
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), DbError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(DbError::Driver("transaction already closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphTransaction for MockTransaction {
    async fn run(&self, _query: Query) -> Result<(), DbError> {
        self.ensure_open()?;
        self.stats.statements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, _query: Query) -> Result<Vec<Row>, DbError> {
        self.ensure_open()?;
        self.stats.statements.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn commit(&self) -> Result<(), DbError> {
        self.finish()?;
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        self.finish()?;
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
