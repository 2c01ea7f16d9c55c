//! Backend trait definitions
//!
//! The driver manager and the transaction executor only talk to the graph
//! through these traits. `client.rs` implements them on top of neo4rs; the
//! in-memory mock used by the unit tests implements them too.

use super::error::DbError;
use async_trait::async_trait;
use neo4rs::{Query, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Access mode a session is opened with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::Write => f.write_str("write"),
        }
    }
}

/// Everything needed to create a driver handle.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Default database; `None` lets the server pick its home database.
    pub database: Option<String>,
    /// Pool ceiling, also used for the capacity warning.
    pub max_connection_pool_size: usize,
    pub connection_acquisition_timeout_ms: u64,
}

// Hand-written so the password never ends up in logs.
impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connection_pool_size", &self.max_connection_pool_size)
            .field(
                "connection_acquisition_timeout_ms",
                &self.connection_acquisition_timeout_ms,
            )
            .finish()
    }
}

impl ConnectionSettings {
    /// Check that uri and credentials are present.
    pub fn validate(&self) -> Result<(), DbError> {
        let mut missing = Vec::new();
        if self.uri.trim().is_empty() {
            missing.push("uri");
        }
        if self.user.trim().is_empty() {
            missing.push("user");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if !missing.is_empty() {
            return Err(DbError::Configuration(format!(
                "missing connection settings: {}",
                missing.join(", ")
            )));
        }
        if self.max_connection_pool_size == 0 {
            return Err(DbError::Configuration(
                "max_connection_pool_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Creates driver handles. Called by the driver manager at most once per
/// successful initialization.
#[async_trait]
pub trait GraphConnector: Send + Sync {
    async fn connect(&self, settings: &ConnectionSettings)
        -> Result<Arc<dyn GraphBackend>, DbError>;
}

/// A live driver handle owning the underlying connection pool.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Round-trip to the server to prove the handle is usable.
    async fn verify_connectivity(&self) -> Result<(), DbError>;

    /// Lease a logical session.
    async fn open_session(
        &self,
        database: Option<&str>,
        mode: AccessMode,
    ) -> Result<Arc<dyn BackendSession>, DbError>;

    /// Close the handle and its pool.
    async fn close(&self) -> Result<(), DbError>;
}

/// A logical session issued by a [`GraphBackend`].
#[async_trait]
pub trait BackendSession: Send + Sync {
    async fn begin_transaction(&self) -> Result<Arc<dyn GraphTransaction>, DbError>;

    async fn close(&self) -> Result<(), DbError>;
}

/// An explicit transaction. Transaction functions receive it as [`TxRef`].
///
/// `commit` and `rollback` are called by the executor, never by transaction
/// functions; after either one the transaction rejects further work.
#[async_trait]
pub trait GraphTransaction: Send + Sync {
    /// Run a statement, discarding its result.
    async fn run(&self, query: Query) -> Result<(), DbError>;

    /// Run a statement and collect every row.
    async fn fetch(&self, query: Query) -> Result<Vec<Row>, DbError>;

    async fn commit(&self) -> Result<(), DbError>;

    async fn rollback(&self) -> Result<(), DbError>;
}

/// Handle passed to transaction functions.
pub type TxRef = Arc<dyn GraphTransaction>;
