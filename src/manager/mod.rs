//! The reconciliation control loop.
//!
//! Every tick the manager rebuilds a fresh [`TopologyDatabase`] from live
//! `CLUSTER NODES` replies, asks the planner for operations and executes
//! them in order. Nothing persists across ticks: a failed tick is simply
//! retried on the next one.
//!
//! ## Module structure
//!
//! - [`error_feed`]: rate-limited error coalescing
//! - [`state`]: the manager state machine

pub mod error_feed;
pub mod state;

pub use error_feed::{ErrorFeed, ErrorItem};
pub use state::ManagerState;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::provider::{
    ConnectionProvider, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT,
};
use crate::client::redis_client::ClientError;
use crate::client::types::{ClusterNodeId, ClusterNodes, HashSlots};
use crate::topology::database::{TopologyDatabase, TopologyError};
use crate::topology::operations::Operation;
use crate::topology::spec::{MasterGroup, RedisInstance};

/// How many keys one `CLUSTER GETKEYSINSLOT` batch may return during a slot
/// migration.
const KEYS_BATCH_SIZE: u64 = 10_000;

/// Key-copy timeout passed to `MIGRATE`.
const KEYS_COPY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by the control loop.
///
/// Every variant names the operation and the targeted instance; callers
/// distinguish errors by their context, not by type.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("can't build database: {0}")]
    Database(#[from] TopologyError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("fetching cluster nodes for {instance}: {source}")]
    FetchNodes {
        instance: RedisInstance,
        #[source]
        source: ClientError,
    },

    #[error("resolving {hostname}: {source}")]
    Resolve {
        hostname: String,
        #[source]
        source: std::io::Error,
    },

    #[error("resolving {0}: no address records")]
    NoAddress(String),

    #[error("asking {target} to meet {other}: {source}")]
    Meet {
        target: RedisInstance,
        other: RedisInstance,
        #[source]
        source: Box<ManagerError>,
    },

    #[error("asking {target} to forget {node_id}: {source}")]
    Forget {
        target: RedisInstance,
        node_id: ClusterNodeId,
        #[source]
        source: ClientError,
    },

    #[error("asking {target} to replicate {master_id}: {source}")]
    Replicate {
        target: RedisInstance,
        master_id: ClusterNodeId,
        #[source]
        source: ClientError,
    },

    #[error("asking {target} to take ownership of {count} slot(s): {source}")]
    AddSlots {
        target: RedisInstance,
        count: usize,
        #[source]
        source: ClientError,
    },

    #[error("migrating slot {slot} from {from} to {to}: {source}")]
    MigrateSlot {
        slot: u16,
        from: RedisInstance,
        to: RedisInstance,
        #[source]
        source: ClientError,
    },
}

/// Control-loop configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Time between reconciliation ticks.
    pub sync_period: Duration,
    /// How long errors must persist before a summary is logged.
    pub warning_threshold: Duration,
    /// Maximum slots per pipelined `CLUSTER ADDSLOTS` command.
    pub max_slots_per_add_slots: usize,
    /// Connect timeout for new Redis connections.
    pub connection_timeout: Duration,
    /// Per-command timeout.
    pub command_timeout: Duration,
    /// Execute slot migrations (phase 4) once phases 1-3 are converged.
    pub enable_slot_migration: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sync_period: Duration::from_secs(5),
            warning_threshold: Duration::from_secs(30),
            max_slots_per_add_slots: 1024,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            enable_slot_migration: false,
        }
    }
}

/// Drives a set of Redis instances toward the registered master groups.
pub struct Manager {
    config: ManagerConfig,
    provider: Arc<ConnectionProvider>,
    state: ManagerState,
}

impl Manager {
    pub fn new(config: ManagerConfig, provider: Arc<ConnectionProvider>) -> Self {
        Self {
            config,
            provider,
            state: ManagerState::DnsResolution,
        }
    }

    fn set_state(&mut self, state: ManagerState) {
        if self.state != state {
            self.state = state;
            info!(event = "state-changed", state = %state);
        }
    }

    /// Run the reconciliation loop until `shutdown` resolves.
    ///
    /// An in-flight tick always completes before the loop exits; the
    /// shutdown future is only consulted between ticks.
    pub async fn run(mut self, groups: Vec<MasterGroup>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut interval = tokio::time::interval(self.config.sync_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut error_feed = ErrorFeed::new(self.config.warning_threshold);

        info!(event = "state-changed", state = %self.state);

        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = interval.tick() => {}
            }

            self.tick(&groups, &mut error_feed).await;
        }
    }

    /// One reconciliation pass.
    pub async fn tick(&mut self, groups: &[MasterGroup], error_feed: &mut ErrorFeed) {
        let mut failed = false;

        match self.build_database(groups).await {
            Err(error) => {
                debug!(error = %error, "tick aborted");
                error_feed.add(&error);
                failed = true;
            }
            Ok(database) => {
                let operations = database.operations();

                if operations.is_empty() {
                    self.set_state(ManagerState::Stable);
                } else {
                    for operation in operations {
                        self.set_state(ManagerState::for_operation(&operation));

                        if let Err(error) = self.execute(&operation).await {
                            error_feed.add(&error);
                            failed = true;
                        }
                    }
                }
            }
        }

        if !failed {
            error_feed.reset();
            return;
        }

        let errors = error_feed.pop_errors();

        if !errors.is_empty() {
            warn!(event = "synchronization-errors", count = errors.len());

            for (index, item) in errors.iter().enumerate() {
                warn!(
                    event = "synchronization-error",
                    index,
                    error = %item.message,
                    count = item.count,
                );
            }
        }
    }

    /// Build the tick's database by querying every registered instance.
    pub async fn build_database(
        &self,
        groups: &[MasterGroup],
    ) -> Result<TopologyDatabase, ManagerError> {
        let mut database = TopologyDatabase::new()
            .with_migrations_enabled(self.config.enable_slot_migration);

        for group in groups {
            database.register_group(group.clone())?;

            for instance in group {
                let nodes = self.fetch_cluster_nodes(instance).await?;
                database.feed(instance.clone(), nodes)?;
            }
        }

        Ok(database)
    }

    async fn fetch_cluster_nodes(
        &self,
        instance: &RedisInstance,
    ) -> Result<ClusterNodes, ManagerError> {
        let result = async {
            let connection = self.provider.get(instance).await?;
            connection.cluster_nodes().await
        }
        .await;

        result.map_err(|source| ManagerError::FetchNodes {
            instance: instance.clone(),
            source,
        })
    }

    /// Execute one operation against the live cluster.
    async fn execute(&self, operation: &Operation) -> Result<(), ManagerError> {
        match operation {
            Operation::Meet { target, other } => {
                info!(event = "cluster-meet", target = %target, other = %other);
                self.cluster_meet(target, other).await
            }
            Operation::Forget { target, node_id } => {
                info!(event = "cluster-forget", target = %target, node_id = %node_id);
                self.cluster_forget(target, node_id).await
            }
            Operation::Replicate {
                target,
                master,
                master_id,
            } => {
                info!(
                    event = "cluster-replicate",
                    target = %target,
                    master = %master,
                    master_id = %master_id,
                );
                self.cluster_replicate(target, master_id).await
            }
            Operation::AddSlots { target, slots } => {
                info!(event = "cluster-add-slots", target = %target, slots = %slots);
                self.cluster_add_slots(target, slots).await
            }
            Operation::MigrateSlot {
                source,
                source_id,
                destination,
                destination_id,
                slot,
            } => {
                info!(
                    event = "cluster-migrate-slot",
                    source = %source,
                    destination = %destination,
                    slot = slot,
                );
                self.cluster_migrate_slot(source, source_id, destination, destination_id, *slot)
                    .await
            }
        }
    }

    /// Resolve a hostname to its first address record.
    async fn resolve(&self, hostname: &str, port: u16) -> Result<IpAddr, ManagerError> {
        let mut addresses = tokio::net::lookup_host((hostname, port))
            .await
            .map_err(|source| ManagerError::Resolve {
                hostname: hostname.to_string(),
                source,
            })?;

        addresses
            .next()
            .map(|address| address.ip())
            .ok_or_else(|| ManagerError::NoAddress(hostname.to_string()))
    }

    async fn cluster_meet(
        &self,
        target: &RedisInstance,
        other: &RedisInstance,
    ) -> Result<(), ManagerError> {
        let result = async {
            // CLUSTER MEET takes an address, not a name.
            let ip = self.resolve(&other.hostname, other.port).await?;
            let connection = self.provider.get(target).await.map_err(ManagerError::from)?;
            connection
                .cluster_meet(&ip.to_string(), other.port)
                .await
                .map_err(ManagerError::from)
        }
        .await;

        result.map_err(|source| ManagerError::Meet {
            target: target.clone(),
            other: other.clone(),
            source: Box::new(source),
        })
    }

    async fn cluster_forget(
        &self,
        target: &RedisInstance,
        node_id: &ClusterNodeId,
    ) -> Result<(), ManagerError> {
        let result = async {
            let connection = self.provider.get(target).await?;
            connection.cluster_forget(node_id).await
        }
        .await;

        result.map_err(|source| ManagerError::Forget {
            target: target.clone(),
            node_id: node_id.clone(),
            source,
        })
    }

    async fn cluster_replicate(
        &self,
        target: &RedisInstance,
        master_id: &ClusterNodeId,
    ) -> Result<(), ManagerError> {
        let result = async {
            let connection = self.provider.get(target).await?;
            connection.cluster_replicate(master_id).await
        }
        .await;

        result.map_err(|source| ManagerError::Replicate {
            target: target.clone(),
            master_id: master_id.clone(),
            source,
        })
    }

    async fn cluster_add_slots(
        &self,
        target: &RedisInstance,
        slots: &HashSlots,
    ) -> Result<(), ManagerError> {
        let result = async {
            let connection = self.provider.get(target).await?;
            connection
                .cluster_add_slots(slots, self.config.max_slots_per_add_slots)
                .await
        }
        .await;

        result.map_err(|source| ManagerError::AddSlots {
            target: target.clone(),
            count: slots.len(),
            source,
        })
    }

    /// The slot-migration dance.
    ///
    /// IMPORTING on the destination, MIGRATING on the source, key batches
    /// copied until the slot is empty, then NODE on both sides. Any failure
    /// after IMPORTING rolls both sides back to STABLE; rollback errors are
    /// discarded since the next tick re-plans from scratch anyway.
    async fn cluster_migrate_slot(
        &self,
        source: &RedisInstance,
        source_id: &ClusterNodeId,
        destination: &RedisInstance,
        destination_id: &ClusterNodeId,
        slot: u16,
    ) -> Result<(), ManagerError> {
        let result = async {
            let source_connection = self.provider.get(source).await?;
            let destination_connection = self.provider.get(destination).await?;

            destination_connection
                .cluster_setslot_importing(slot, source_id)
                .await?;

            if let Err(error) = source_connection
                .cluster_setslot_migrating(slot, destination_id)
                .await
            {
                let _ = destination_connection.cluster_setslot_stable(slot).await;
                return Err(error);
            }

            loop {
                let keys = match source_connection
                    .cluster_get_keys_in_slot(slot, KEYS_BATCH_SIZE)
                    .await
                {
                    Ok(keys) => keys,
                    Err(error) => {
                        let _ = destination_connection.cluster_setslot_stable(slot).await;
                        let _ = source_connection.cluster_setslot_stable(slot).await;
                        return Err(error);
                    }
                };

                if keys.is_empty() {
                    break;
                }

                if let Err(error) = source_connection
                    .migrate_keys(
                        &destination.hostname,
                        destination.port,
                        &keys,
                        KEYS_COPY_TIMEOUT,
                    )
                    .await
                {
                    let _ = destination_connection.cluster_setslot_stable(slot).await;
                    let _ = source_connection.cluster_setslot_stable(slot).await;
                    return Err(error);
                }
            }

            let _ = destination_connection
                .cluster_setslot_node(slot, destination_id)
                .await;
            let _ = source_connection
                .cluster_setslot_node(slot, destination_id)
                .await;

            Ok(())
        }
        .await;

        result.map_err(|error: ClientError| ManagerError::MigrateSlot {
            slot,
            from: source.clone(),
            to: destination.clone(),
            source: error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.sync_period, Duration::from_secs(5));
        assert_eq!(config.warning_threshold, Duration::from_secs(30));
        assert_eq!(config.max_slots_per_add_slots, 1024);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert!(!config.enable_slot_migration);
    }
}
