//! Lazy per-instance connection cache.
//!
//! The provider owns one [`RedisConnection`] per instance, created on first
//! use. Callers receive cloned handles; a handle that reports disconnected
//! is dropped and replaced on the next acquisition.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::client::redis_client::{ClientError, RedisConnection};
use crate::topology::spec::RedisInstance;

/// Default connect timeout for new connections.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Lends a connection per Redis instance.
pub struct ConnectionProvider {
    connection_timeout: Duration,
    command_timeout: Duration,
    connections: Mutex<HashMap<RedisInstance, RedisConnection>>,
}

impl Default for ConnectionProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_TIMEOUT, DEFAULT_COMMAND_TIMEOUT)
    }
}

impl ConnectionProvider {
    pub fn new(connection_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            command_timeout,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// A connection to the given instance, connecting lazily.
    pub async fn get(&self, instance: &RedisInstance) -> Result<RedisConnection, ClientError> {
        let mut connections = self.connections.lock().await;

        if let Some(existing) = connections.get(instance) {
            if existing.is_connected() {
                return Ok(existing.clone());
            }

            debug!(instance = %instance, "dropping disconnected client");
            connections.remove(instance);
        }

        let connection =
            RedisConnection::connect(instance, self.connection_timeout, self.command_timeout)
                .await?;
        connections.insert(instance.clone(), connection.clone());

        Ok(connection)
    }

    /// Close every cached connection.
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;

        for (instance, connection) in connections.drain() {
            if let Err(error) = connection.close().await {
                debug!(instance = %instance, error = %error, "closing connection failed");
            }
        }
    }
}
