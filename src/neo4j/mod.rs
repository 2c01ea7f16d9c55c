//! Neo4j access layer: driver lifecycle, session pool and retrying transactions

pub mod client;
pub mod driver;
pub mod error;
pub mod executor;
pub mod retry;
pub mod traits;

pub use client::Neo4jConnector;
pub use driver::{DriverManager, PoolStats, Session, DEFAULT_MAX_POOL_SIZE};
pub use error::DbError;
pub use executor::{batch_op, BatchOperation, TransactionExecutor, TransactionResult};
pub use retry::{compute_delay, is_retryable, RetryConfig};
pub use traits::{
    AccessMode, BackendSession, ConnectionSettings, GraphBackend, GraphConnector,
    GraphTransaction, TxRef,
};

#[cfg(test)]
pub(crate) mod mock;
