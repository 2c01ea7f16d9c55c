//! Test helper factories
//!
//! Builds driver managers and contexts over the in-memory mock backend.
#![allow(dead_code)]

use crate::events::EventBus;
use crate::neo4j::mock::MockConnector;
use crate::neo4j::{ConnectionSettings, DriverManager, RetryConfig};
use crate::{Config, DbContext};
use std::sync::Arc;

/// Connection settings pointing at a server that does not exist.
pub fn test_settings() -> ConnectionSettings {
    ConnectionSettings {
        uri: "bolt://mock:7687".to_string(),
        user: "neo4j".to_string(),
        password: "mock".to_string(),
        database: None,
        max_connection_pool_size: 50,
        connection_acquisition_timeout_ms: 1_000,
    }
}

/// Driver manager over `connector` with a throwaway event bus.
pub fn mock_manager(connector: MockConnector) -> DriverManager {
    DriverManager::new(
        test_settings(),
        Arc::new(connector),
        Arc::new(EventBus::default()),
    )
}

/// Config matching [`test_settings`] with millisecond backoff.
pub fn test_config() -> Config {
    Config {
        neo4j_uri: "bolt://mock:7687".to_string(),
        neo4j_user: "neo4j".to_string(),
        neo4j_password: "mock".to_string(),
        neo4j_database: None,
        max_connection_pool_size: 50,
        connection_acquisition_timeout_ms: 1_000,
        retry: RetryConfig::default()
            .with_initial_retry_delay_ms(1)
            .with_max_retry_delay_ms(5)
            .with_timeout_ms(1_000),
    }
}

/// DbContext over `connector`.
pub fn mock_context(connector: MockConnector) -> DbContext {
    DbContext::with_connector(test_config(), Arc::new(connector))
}
