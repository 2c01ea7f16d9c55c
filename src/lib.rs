//! Orchestrator DB
//!
//! Transactional Neo4j access layer for the project orchestrator:
//! - Lazily initialised driver handle with connectivity verification
//! - Session pool with utilisation tracking and capacity warnings
//! - Retrying transaction executor (timeout, backoff with jitter, batches)
//! - Typed lifecycle events for observability collaborators

pub mod events;
pub mod neo4j;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use events::EventBus;
use neo4j::{
    AccessMode, BatchOperation, ConnectionSettings, DbError, DriverManager, GraphConnector,
    Neo4jConnector, PoolStats, RetryConfig, TransactionExecutor, TransactionResult, TxRef,
};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub neo4j: Neo4jYamlConfig,
    pub transaction: TransactionYamlConfig,
}

/// Neo4j connection section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jYamlConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Target database; omitted means the server's home database
    pub database: Option<String>,
    pub max_connection_pool_size: usize,
    pub connection_acquisition_timeout_ms: u64,
}

impl Default for Neo4jYamlConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "orchestrator123".into(),
            database: None,
            max_connection_pool_size: neo4j::DEFAULT_MAX_POOL_SIZE,
            connection_acquisition_timeout_ms: 60_000,
        }
    }
}

/// Transaction retry section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionYamlConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retry_on_timeout: bool,
}

impl Default for TransactionYamlConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            timeout_ms: retry.timeout_ms,
            max_retries: retry.max_retries,
            initial_retry_delay_ms: retry.initial_retry_delay_ms,
            max_retry_delay_ms: retry.max_retry_delay_ms,
            backoff_multiplier: retry.backoff_multiplier,
            retry_on_timeout: retry.retry_on_timeout,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Clone)]
pub struct Config {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_database: Option<String>,
    pub max_connection_pool_size: usize,
    pub connection_acquisition_timeout_ms: u64,
    /// Process-wide retry defaults
    pub retry: RetryConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("neo4j_uri", &self.neo4j_uri)
            .field("neo4j_user", &self.neo4j_user)
            .field("neo4j_password", &"<redacted>")
            .field("neo4j_database", &self.neo4j_database)
            .field("max_connection_pool_size", &self.max_connection_pool_size)
            .field(
                "connection_acquisition_timeout_ms",
                &self.connection_acquisition_timeout_ms,
            )
            .field("retry", &self.retry)
            .finish()
    }
}

/// Read an env var and parse it, ignoring unset or unparsable values.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid value for {}: {:?}", name, raw);
                None
            }
        },
        Err(_) => None,
    }
}

impl Config {
    /// Load configuration from environment variables only (no YAML file).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path);
        let tx = yaml.transaction;

        // 2. Build Config with env var overrides
        let config = Self {
            neo4j_uri: std::env::var("NEO4J_URI").unwrap_or(yaml.neo4j.uri),
            neo4j_user: std::env::var("NEO4J_USER").unwrap_or(yaml.neo4j.user),
            neo4j_password: std::env::var("NEO4J_PASSWORD").unwrap_or(yaml.neo4j.password),
            neo4j_database: std::env::var("NEO4J_DATABASE")
                .ok()
                .filter(|db| !db.is_empty())
                .or(yaml.neo4j.database),
            max_connection_pool_size: env_parse("NEO4J_MAX_POOL_SIZE")
                .unwrap_or(yaml.neo4j.max_connection_pool_size),
            connection_acquisition_timeout_ms: env_parse("NEO4J_ACQUISITION_TIMEOUT_MS")
                .unwrap_or(yaml.neo4j.connection_acquisition_timeout_ms),
            retry: RetryConfig {
                timeout_ms: env_parse("NEO4J_TX_TIMEOUT_MS").unwrap_or(tx.timeout_ms),
                max_retries: env_parse("NEO4J_MAX_RETRIES").unwrap_or(tx.max_retries),
                initial_retry_delay_ms: env_parse("NEO4J_INITIAL_RETRY_DELAY_MS")
                    .unwrap_or(tx.initial_retry_delay_ms),
                max_retry_delay_ms: env_parse("NEO4J_MAX_RETRY_DELAY_MS")
                    .unwrap_or(tx.max_retry_delay_ms),
                backoff_multiplier: env_parse("NEO4J_BACKOFF_MULTIPLIER")
                    .unwrap_or(tx.backoff_multiplier),
                retry_on_timeout: env_parse("NEO4J_RETRY_ON_TIMEOUT")
                    .unwrap_or(tx.retry_on_timeout),
            },
        };

        config.retry.validate()?;
        Ok(config)
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    /// Settings handed to the driver manager.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            uri: self.neo4j_uri.clone(),
            user: self.neo4j_user.clone(),
            password: self.neo4j_password.clone(),
            database: self.neo4j_database.clone(),
            max_connection_pool_size: self.max_connection_pool_size,
            connection_acquisition_timeout_ms: self.connection_acquisition_timeout_ms,
        }
    }
}

// ============================================================================
// Shared database context
// ============================================================================

/// Explicit handle over the access layer, passed to business services.
///
/// Owns one driver manager (and therefore at most one driver handle), the
/// executor configured with the process-wide retry defaults, and the event bus
/// both of them publish to. Cloning shares all three.
#[derive(Clone)]
pub struct DbContext {
    pub driver: Arc<DriverManager>,
    pub executor: Arc<TransactionExecutor>,
    pub events: Arc<EventBus>,
    pub config: Arc<Config>,
}

impl DbContext {
    /// Context backed by neo4rs. Does not connect until first use.
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(Neo4jConnector))
    }

    /// Context backed by any connector.
    pub fn with_connector(config: Config, connector: Arc<dyn GraphConnector>) -> Self {
        let events = Arc::new(EventBus::default());
        let driver = Arc::new(DriverManager::new(
            config.connection_settings(),
            connector,
            events.clone(),
        ));
        let executor = Arc::new(TransactionExecutor::new(
            config.retry.clone(),
            events.clone(),
        ));
        Self {
            driver,
            executor,
            events,
            config: Arc::new(config),
        }
    }

    /// Run `f` in a read transaction on a fresh session.
    pub async fn read<T, F, Fut>(&self, f: F) -> Result<TransactionResult<T>, DbError>
    where
        T: Send + 'static,
        F: Fn(TxRef) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        let session = self.driver.get_session(None, AccessMode::Read).await?;
        let result = self
            .executor
            .execute_read_with_retry(&session, f, None)
            .await;
        self.driver.release_session(session).await;
        result
    }

    /// Run `f` in a write transaction on a fresh session.
    pub async fn write<T, F, Fut>(&self, f: F) -> Result<TransactionResult<T>, DbError>
    where
        T: Send + 'static,
        F: Fn(TxRef) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        let session = self.driver.get_session(None, AccessMode::Write).await?;
        let result = self
            .executor
            .execute_write_with_retry(&session, f, None)
            .await;
        self.driver.release_session(session).await;
        result
    }

    /// Run `ops` as one write transaction on a fresh session.
    pub async fn batch<T>(
        &self,
        ops: Vec<BatchOperation<T>>,
    ) -> Result<TransactionResult<Vec<T>>, DbError>
    where
        T: Send + 'static,
    {
        let session = self.driver.get_session(None, AccessMode::Write).await?;
        let result = self
            .executor
            .execute_batch_with_retry(&session, ops, None)
            .await;
        self.driver.release_session(session).await;
        result
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.driver.pool_stats()
    }

    /// Close the driver. The context stays usable and reconnects on demand.
    pub async fn shutdown(&self) -> Result<(), DbError> {
        self.driver.close().await
    }
}

// ============================================================================
// Tests
// ============================================================================
