//! Scoped access to the source and destination databases.
//!
//! Source handles are opened per logical operation and closed right after,
//! since the legacy driver is not safe to pool. Destination handles come from
//! a bounded pool. Both are RAII guards: dropping a handle on any exit path
//! (success, error, cancellation) releases the connection.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use sync_core::{DestinationPool, DestinationSession, SourceConnector, SourceSession, SyncError};

use crate::retry::RetryPolicy;

/// Timeouts and retry behavior for acquisitions.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Upper bound for opening a source connection.
    pub source_timeout: Duration,
    /// Upper bound for waiting on a pooled destination connection.
    pub destination_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(30),
            destination_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Owns the source connector and the destination pool.
pub struct ConnectionManager {
    source: Arc<dyn SourceConnector>,
    destination: Arc<dyn DestinationPool>,
    settings: ConnectionSettings,
}

/// A source connection scoped to one logical operation.
pub struct SourceHandle {
    session: Box<dyn SourceSession>,
}

impl SourceHandle {
    /// Close the connection gracefully. Dropping the handle also closes it,
    /// without waiting for the server's acknowledgement.
    pub async fn release(self) {
        if let Err(e) = self.session.close().await {
            tracing::debug!("Error closing source connection: {e}");
        }
    }
}

impl Deref for SourceHandle {
    type Target = dyn SourceSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SourceHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

/// A pooled destination connection; returned to the pool on drop.
pub struct DestinationHandle {
    session: Box<dyn DestinationSession>,
}

impl Deref for DestinationHandle {
    type Target = dyn DestinationSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for DestinationHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

/// Outcome of [`ConnectionManager::check_connections`].
#[derive(Debug)]
pub struct ConnectionReport {
    pub source: Result<(), SyncError>,
    pub destination: Result<(), SyncError>,
}

impl ConnectionReport {
    pub fn is_healthy(&self) -> bool {
        self.source.is_ok() && self.destination.is_ok()
    }
}

impl ConnectionManager {
    pub fn new(
        source: Arc<dyn SourceConnector>,
        destination: Arc<dyn DestinationPool>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            source,
            destination,
            settings,
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Maximum number of destination connections in use at once.
    pub fn destination_pool_size(&self) -> usize {
        self.destination.max_size()
    }

    pub fn destination_description(&self) -> String {
        self.destination.describe()
    }

    /// Open a source connection, retrying `ConnectionUnavailable` with backoff.
    pub async fn acquire_source(&self) -> Result<SourceHandle, SyncError> {
        let source = &self.source;
        let limit = self.settings.source_timeout;
        self.settings
            .retry
            .run("Acquire source connection", move || async move {
                match tokio::time::timeout(limit, source.connect()).await {
                    Ok(Ok(session)) => Ok(SourceHandle { session }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SyncError::ConnectionUnavailable(format!(
                        "could not connect to {} within {limit:?}",
                        source.describe()
                    ))),
                }
            })
            .await
    }

    /// Check out a pooled destination connection, waiting at most the
    /// configured timeout per attempt.
    pub async fn acquire_destination(&self) -> Result<DestinationHandle, SyncError> {
        let destination = &self.destination;
        let limit = self.settings.destination_timeout;
        self.settings
            .retry
            .run("Acquire destination connection", move || async move {
                match tokio::time::timeout(limit, destination.acquire()).await {
                    Ok(Ok(session)) => Ok(DestinationHandle { session }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SyncError::ConnectionUnavailable(format!(
                        "no connection to {} became free within {limit:?} (pool size {})",
                        destination.describe(),
                        destination.max_size()
                    ))),
                }
            })
            .await
    }

    /// Round-trip to both databases.
    pub async fn check_connections(&self) -> ConnectionReport {
        let source = match self.acquire_source().await {
            Ok(mut handle) => {
                let result = handle.ping().await;
                handle.release().await;
                result
            }
            Err(e) => Err(e),
        };
        let destination = match self.acquire_destination().await {
            Ok(mut handle) => handle.ping().await,
            Err(e) => Err(e),
        };

        match &source {
            Ok(()) => tracing::info!("Source connection OK: {}", self.source.describe()),
            Err(e) => tracing::error!("Source connection failed: {e}"),
        }
        match &destination {
            Ok(()) => tracing::info!(
                "Destination connection OK: {}",
                self.destination.describe()
            ),
            Err(e) => tracing::error!("Destination connection failed: {e}"),
        }

        ConnectionReport {
            source,
            destination,
        }
    }
}
