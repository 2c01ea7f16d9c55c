//! Driver lifecycle and session pool
//!
//! `DriverManager` owns at most one driver handle at a time. The handle is
//! created lazily on the first session request, verified once, and kept until
//! [`DriverManager::close`]. Sessions are leased from it and must come back
//! through [`DriverManager::release_session`].

use super::error::DbError;
use super::traits::{AccessMode, BackendSession, ConnectionSettings, GraphBackend, GraphConnector};
use crate::events::{self, DriverClosed, EventSink, PoolPressure, TransactionEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default pool ceiling when the configuration does not set one.
pub const DEFAULT_MAX_POOL_SIZE: usize = 50;

/// Snapshot of pool utilisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub active_sessions: usize,
    pub total_sessions_created: usize,
    pub max_pool_size: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    active: AtomicUsize,
    total: AtomicUsize,
}

/// A leased session.
///
/// Hand it back with [`DriverManager::release_session`]. Dropping it without
/// releasing still balances the pool counters, but logs a warning.
pub struct Session {
    id: Uuid,
    database: Option<String>,
    mode: AccessMode,
    inner: Arc<dyn BackendSession>,
    counters: Arc<PoolCounters>,
    released: bool,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub(crate) fn backend(&self) -> Arc<dyn BackendSession> {
        Arc::clone(&self.inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        warn!(session_id = %self.id, "Session dropped without release");
        // Best effort: close the backend session if a runtime is around
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            let id = self.id;
            handle.spawn(async move {
                if let Err(e) = inner.close().await {
                    debug!(session_id = %id, error = %e, "Closing dropped session failed");
                }
            });
        }
    }
}

/// Lazily initialised driver handle plus session bookkeeping.
pub struct DriverManager {
    settings: ConnectionSettings,
    connector: Arc<dyn GraphConnector>,
    events: Arc<dyn EventSink>,
    driver: Mutex<Option<Arc<dyn GraphBackend>>>,
    counters: Arc<PoolCounters>,
}

impl DriverManager {
    /// Create a manager. No connection is made until the first
    /// [`get_driver`](Self::get_driver) / [`get_session`](Self::get_session).
    pub fn new(
        settings: ConnectionSettings,
        connector: Arc<dyn GraphConnector>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            settings,
            connector,
            events,
            driver: Mutex::new(None),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Return the driver handle, creating and verifying it on first use.
    ///
    /// Concurrent callers queue on the same lock, so only one of them ever
    /// connects; the rest observe its result. A failed initialization leaves
    /// nothing cached and the next call tries again.
    pub async fn get_driver(&self) -> Result<Arc<dyn GraphBackend>, DbError> {
        let mut slot = self.driver.lock().await;
        if let Some(driver) = slot.as_ref() {
            return Ok(Arc::clone(driver));
        }

        self.settings.validate()?;
        info!(
            uri = %self.settings.uri,
            max_pool_size = self.settings.max_connection_pool_size,
            "Initializing Neo4j driver"
        );

        let driver = match self.connector.connect(&self.settings).await {
            Ok(driver) => driver,
            Err(e @ DbError::Configuration(_)) => return Err(e),
            Err(e) => return Err(self.connectivity_error(e)),
        };

        if let Err(e) = driver.verify_connectivity().await {
            if let Err(close_err) = driver.close().await {
                debug!(error = %close_err, "Closing unverified driver failed");
            }
            return Err(self.connectivity_error(e));
        }

        info!(uri = %self.settings.uri, "Connected to Neo4j");
        *slot = Some(Arc::clone(&driver));
        Ok(driver)
    }

    fn connectivity_error(&self, cause: DbError) -> DbError {
        warn!(uri = %self.settings.uri, error = %cause, "Neo4j connectivity check failed");
        DbError::Connectivity {
            uri: self.settings.uri.clone(),
            source: Box::new(cause),
        }
    }

    /// Whether a verified driver handle is currently cached.
    pub async fn is_connected(&self) -> bool {
        self.driver.lock().await.is_some()
    }

    /// Lease a session, on `database` or the configured default database.
    pub async fn get_session(
        &self,
        database: Option<&str>,
        mode: AccessMode,
    ) -> Result<Session, DbError> {
        let driver = self.get_driver().await?;
        let database = database
            .map(str::to_owned)
            .or_else(|| self.settings.database.clone());

        let timeout_ms = self.settings.connection_acquisition_timeout_ms;
        let inner = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            driver.open_session(database.as_deref(), mode),
        )
        .await
        {
            Ok(session) => session?,
            Err(_) => return Err(DbError::SessionAcquisition { timeout_ms }),
        };

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.total.fetch_add(1, Ordering::SeqCst);
        let session = Session {
            id: Uuid::new_v4(),
            database,
            mode,
            inner,
            counters: Arc::clone(&self.counters),
            released: false,
        };
        debug!(
            session_id = %session.id,
            mode = %mode,
            database = session.database.as_deref().unwrap_or("default"),
            active_sessions = active,
            "Session acquired"
        );

        let max = self.settings.max_connection_pool_size;
        if is_over_capacity(active, max) {
            warn!(
                active_sessions = active,
                max_pool_size = max,
                "Session pool above 80% of capacity"
            );
            self.events.publish(TransactionEvent::PoolPressure(PoolPressure {
                timestamp: events::now(),
                active_sessions: active,
                max_pool_size: max,
            }));
        }

        Ok(session)
    }

    /// Close `session` and return its slot to the pool.
    ///
    /// Close failures are logged, never returned: release runs on cleanup
    /// paths where it must not mask the caller's own outcome.
    pub async fn release_session(&self, mut session: Session) {
        // The slot is returned before awaiting close so a cancelled release
        // cannot leave it counted.
        session.released = true;
        let active = self.counters.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        if let Err(e) = session.inner.close().await {
            warn!(session_id = %session.id, error = %e, "Error closing session");
        }
        debug!(session_id = %session.id, active_sessions = active, "Session released");
    }

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            active_sessions: self.counters.active.load(Ordering::SeqCst),
            total_sessions_created: self.counters.total.load(Ordering::SeqCst),
            max_pool_size: self.settings.max_connection_pool_size,
        }
    }

    /// Close the driver handle. The next session request re-initializes it.
    pub async fn close(&self) -> Result<(), DbError> {
        let driver = self.driver.lock().await.take();
        let Some(driver) = driver else {
            debug!("Neo4j driver already closed");
            return Ok(());
        };

        let stats = self.pool_stats();
        let result = driver.close().await;
        info!(
            active_sessions = stats.active_sessions,
            total_sessions_created = stats.total_sessions_created,
            max_pool_size = stats.max_pool_size,
            "Neo4j driver closed"
        );
        if stats.active_sessions > 0 {
            warn!(
                active_sessions = stats.active_sessions,
                "Driver closed with sessions still leased"
            );
        }
        self.events.publish(TransactionEvent::DriverClosed(DriverClosed {
            timestamp: events::now(),
            total_sessions_created: stats.total_sessions_created,
            active_sessions: stats.active_sessions,
        }));
        result
    }
}

/// More than 80% of the ceiling in use.
fn is_over_capacity(active: usize, max: usize) -> bool {
    active.saturating_mul(5) > max.saturating_mul(4)
}
