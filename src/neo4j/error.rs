//! Error taxonomy for the database access layer

use thiserror::Error;

/// Status code attached to network/communication failures raised by the driver
/// itself (as opposed to errors reported by the server).
pub const SERVICE_UNAVAILABLE: &str = "ServiceUnavailable";

/// Errors produced by the driver manager, the transaction executor and the
/// backends behind them.
///
/// The executor never wraps or rewrites these: whatever the last attempt
/// failed with is what the caller receives.
#[derive(Error, Debug)]
pub enum DbError {
    /// Missing or invalid connection settings. Never retried.
    #[error("Neo4j configuration error: {0}")]
    Configuration(String),

    /// The connectivity check run while creating the driver failed.
    #[error("Failed to connect to Neo4j at {uri}: {source}")]
    Connectivity {
        uri: String,
        #[source]
        source: Box<DbError>,
    },

    /// Error reported by the server, carrying its Neo4j status code.
    #[error("Neo4j error {code}: {message}")]
    Database { code: String, message: String },

    /// Network/communication failure between driver and server.
    #[error("Neo4j service unavailable (network error): {0}")]
    ServiceUnavailable(String),

    /// An attempt did not settle within the configured timeout.
    #[error("Transaction timeout after {timeout_ms}ms")]
    TransactionTimeout { timeout_ms: u64 },

    /// Opening a session took longer than the acquisition timeout.
    #[error("Session acquisition timeout after {timeout_ms}ms")]
    SessionAcquisition { timeout_ms: u64 },

    /// Any other client-side driver failure.
    #[error("Neo4j driver error: {0}")]
    Driver(String),

    /// Failure raised by a caller-supplied transaction function.
    #[error("{0}")]
    Operation(String),

    /// Invariant violations inside the access layer (e.g. a panicking attempt).
    #[error("Internal database layer error: {0}")]
    Internal(String),
}

impl DbError {
    /// Convenience constructor for transaction functions.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    /// The status code carried by this error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => Some(code),
            Self::ServiceUnavailable(_) => Some(SERVICE_UNAVAILABLE),
            Self::Connectivity { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Short label used in logs and failure events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connectivity { .. } => "connectivity",
            Self::Database { .. } => "database",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::TransactionTimeout { .. } => "transaction_timeout",
            Self::SessionAcquisition { .. } => "session_acquisition",
            Self::Driver(_) => "driver",
            Self::Operation(_) => "operation",
            Self::Internal(_) => "internal",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TransactionTimeout { .. })
    }
}

impl From<neo4rs::Error> for DbError {
    fn from(err: neo4rs::Error) -> Self {
        match &err {
            neo4rs::Error::Neo4j(e) => Self::Database {
                code: e.code().to_string(),
                message: e.message().to_string(),
            },
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
                Self::ServiceUnavailable(err.to_string())
            }
            _ => Self::Driver(err.to_string()),
        }
    }
}
