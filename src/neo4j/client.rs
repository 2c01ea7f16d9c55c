//! neo4rs implementation of the backend traits

use super::error::DbError;
use super::traits::{
    AccessMode, BackendSession, ConnectionSettings, GraphBackend, GraphConnector,
    GraphTransaction,
};
use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query, Row, Txn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Statement used to prove a fresh driver can reach the server.
const CONNECTIVITY_QUERY: &str = "RETURN 1";

/// Connects to Neo4j over Bolt with neo4rs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neo4jConnector;

#[async_trait]
impl GraphConnector for Neo4jConnector {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Arc<dyn GraphBackend>, DbError> {
        let mut builder = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(settings.user.as_str())
            .password(settings.password.as_str())
            .max_connections(settings.max_connection_pool_size);
        if let Some(db) = &settings.database {
            builder = builder.db(db.as_str());
        }
        let config = builder
            .build()
            .map_err(|e| DbError::Configuration(e.to_string()))?;

        let graph = Graph::connect(config).await?;
        Ok(Arc::new(Neo4jBackend {
            graph: Arc::new(graph),
        }))
    }
}

/// Driver handle wrapping a neo4rs [`Graph`] (which owns the Bolt pool).
pub struct Neo4jBackend {
    graph: Arc<Graph>,
}

#[async_trait]
impl GraphBackend for Neo4jBackend {
    async fn verify_connectivity(&self) -> Result<(), DbError> {
        self.graph.run(query(CONNECTIVITY_QUERY)).await?;
        Ok(())
    }

    async fn open_session(
        &self,
        database: Option<&str>,
        mode: AccessMode,
    ) -> Result<Arc<dyn BackendSession>, DbError> {
        // neo4rs has no session object: connections are taken from the pool
        // per transaction, so a session only remembers where to open them.
        Ok(Arc::new(Neo4jSession {
            graph: Arc::clone(&self.graph),
            database: database.map(str::to_owned),
            mode,
        }))
    }

    async fn close(&self) -> Result<(), DbError> {
        // Pooled connections are closed when the last `Graph` clone drops.
        debug!(
            outstanding_handles = Arc::strong_count(&self.graph),
            "Releasing neo4rs graph handle"
        );
        Ok(())
    }
}

pub struct Neo4jSession {
    graph: Arc<Graph>,
    database: Option<String>,
    mode: AccessMode,
}

#[async_trait]
impl BackendSession for Neo4jSession {
    async fn begin_transaction(&self) -> Result<Arc<dyn GraphTransaction>, DbError> {
        // neo4rs 0.8 has no read-routed explicit transaction, so `mode` is
        // only recorded for logs and read sessions run on a write transaction.
        let txn = match &self.database {
            Some(db) => self.graph.start_txn_on(db.as_str()).await?,
            None => self.graph.start_txn().await?,
        };
        debug!(mode = %self.mode, database = ?self.database, "Transaction started");
        Ok(Arc::new(Neo4jTransaction {
            txn: Mutex::new(Some(txn)),
        }))
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

/// Explicit neo4rs transaction. `None` once committed or rolled back.
pub struct Neo4jTransaction {
    txn: Mutex<Option<Txn>>,
}

fn closed() -> DbError {
    DbError::Driver("transaction already closed".into())
}

#[async_trait]
impl GraphTransaction for Neo4jTransaction {
    async fn run(&self, query: Query) -> Result<(), DbError> {
        let mut guard = self.txn.lock().await;
        let txn = guard.as_mut().ok_or_else(closed)?;
        txn.run(query).await?;
        Ok(())
    }

    async fn fetch(&self, query: Query) -> Result<Vec<Row>, DbError> {
        let mut guard = self.txn.lock().await;
        let txn = guard.as_mut().ok_or_else(closed)?;
        let mut stream = txn.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(txn.handle()).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn commit(&self) -> Result<(), DbError> {
        let txn = self.txn.lock().await.take().ok_or_else(closed)?;
        txn.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        let txn = self.txn.lock().await.take().ok_or_else(closed)?;
        txn.rollback().await?;
        Ok(())
    }
}
