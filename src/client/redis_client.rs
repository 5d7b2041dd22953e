//! Redis client wrapper using the fred crate.
//!
//! Each managed instance gets its own centralized (non-clustered) client:
//! the engine always addresses a specific node and must never be redirected
//! to another one. Slot-migration commands that fred's typed API cannot
//! express with a node id (`CLUSTER SETSLOT ... IMPORTING <id>`, `MIGRATE
//! ... REPLACE KEYS ...`) go through the custom-command escape hatch.

use std::time::Duration;

use fred::prelude::*;
use fred::types::CustomCommand;
use fred::types::ClusterHash;
use thiserror::Error;
use tracing::instrument;

use crate::client::types::{ClusterNodeId, ClusterNodes, HashSlots, ParseError};
use crate::topology::spec::RedisInstance;

/// Errors that can occur while talking to a Redis instance.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// A connection to one Redis instance.
///
/// Cloning is cheap: fred clients are shared handles over one multiplexed
/// connection.
#[derive(Clone)]
pub struct RedisConnection {
    client: Client,
    instance: RedisInstance,
}

impl RedisConnection {
    /// Connect to a single instance with the given timeouts.
    #[instrument(skip_all, fields(instance = %instance))]
    pub async fn connect(
        instance: &RedisInstance,
        connection_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let server_config = ServerConfig::Centralized {
            server: Server::new(instance.hostname.clone(), instance.port),
        };

        let config = Config {
            server: server_config,
            ..Default::default()
        };

        let client = Builder::from_config(config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()?;

        client.init().await?;

        Ok(Self {
            client,
            instance: instance.clone(),
        })
    }

    /// The instance this connection talks to.
    pub fn instance(&self) -> &RedisInstance {
        &self.instance
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.client.quit().await?;
        Ok(())
    }

    /// Fetch and parse `CLUSTER NODES`.
    #[instrument(skip(self), fields(instance = %self.instance))]
    pub async fn cluster_nodes(&self) -> Result<ClusterNodes, ClientError> {
        let raw: String = self.client.cluster_nodes().await?;
        Ok(raw.parse()?)
    }

    /// `CLUSTER MEET <ip> <port>`.
    #[instrument(skip(self), fields(instance = %self.instance))]
    pub async fn cluster_meet(&self, ip: &str, port: u16) -> Result<(), ClientError> {
        self.client.cluster_meet(ip, port).await?;
        Ok(())
    }

    /// `CLUSTER FORGET <node-id>`.
    #[instrument(skip(self), fields(instance = %self.instance))]
    pub async fn cluster_forget(&self, node_id: &ClusterNodeId) -> Result<(), ClientError> {
        self.client.cluster_forget(node_id.as_str()).await?;
        Ok(())
    }

    /// `CLUSTER REPLICATE <master-id>`.
    #[instrument(skip(self), fields(instance = %self.instance))]
    pub async fn cluster_replicate(&self, master_id: &ClusterNodeId) -> Result<(), ClientError> {
        self.client.cluster_replicate(master_id.as_str()).await?;
        Ok(())
    }

    /// `CLUSTER ADDSLOTS`, batched and pipelined.
    ///
    /// Batches of at most `batch_size` slots are queued on one pipeline and
    /// flushed in a single round trip.
    #[instrument(skip(self, slots), fields(instance = %self.instance, slot_count = slots.len()))]
    pub async fn cluster_add_slots(
        &self,
        slots: &HashSlots,
        batch_size: usize,
    ) -> Result<(), ClientError> {
        if slots.is_empty() {
            return Ok(());
        }

        let pipeline = self.client.pipeline();

        for batch in slots.as_slice().chunks(batch_size.max(1)) {
            let _: () = pipeline.cluster_add_slots(batch.to_vec()).await?;
        }

        let _: Vec<Value> = pipeline.all().await?;

        Ok(())
    }

    /// `CLUSTER GETKEYSINSLOT <slot> <count>`.
    #[instrument(skip(self), fields(instance = %self.instance))]
    pub async fn cluster_get_keys_in_slot(
        &self,
        slot: u16,
        count: u64,
    ) -> Result<Vec<String>, ClientError> {
        let keys: Vec<String> = self.client.cluster_get_keys_in_slot(slot, count).await?;
        Ok(keys)
    }

    /// `CLUSTER SETSLOT <slot> IMPORTING <source-id>`.
    pub async fn cluster_setslot_importing(
        &self,
        slot: u16,
        source_id: &ClusterNodeId,
    ) -> Result<(), ClientError> {
        self.cluster_setslot(slot, &["IMPORTING", source_id.as_str()])
            .await
    }

    /// `CLUSTER SETSLOT <slot> MIGRATING <destination-id>`.
    pub async fn cluster_setslot_migrating(
        &self,
        slot: u16,
        destination_id: &ClusterNodeId,
    ) -> Result<(), ClientError> {
        self.cluster_setslot(slot, &["MIGRATING", destination_id.as_str()])
            .await
    }

    /// `CLUSTER SETSLOT <slot> NODE <owner-id>`.
    pub async fn cluster_setslot_node(
        &self,
        slot: u16,
        owner_id: &ClusterNodeId,
    ) -> Result<(), ClientError> {
        self.cluster_setslot(slot, &["NODE", owner_id.as_str()]).await
    }

    /// `CLUSTER SETSLOT <slot> STABLE`.
    pub async fn cluster_setslot_stable(&self, slot: u16) -> Result<(), ClientError> {
        self.cluster_setslot(slot, &["STABLE"]).await
    }

    // fred's typed cluster_setslot does not carry the node-id parameter for
    // IMPORTING/MIGRATING, so all SETSLOT variants go through a custom
    // command.
    #[instrument(skip(self, args), fields(instance = %self.instance))]
    async fn cluster_setslot(&self, slot: u16, args: &[&str]) -> Result<(), ClientError> {
        let mut command_args: Vec<Value> = vec!["SETSLOT".into(), Value::from(i64::from(slot))];
        command_args.extend(args.iter().map(|arg| Value::from(*arg)));

        let _: Value = self
            .client
            .custom(
                CustomCommand::new_static("CLUSTER", ClusterHash::default(), false),
                command_args,
            )
            .await?;

        Ok(())
    }

    /// `MIGRATE <host> <port> "" 0 <timeout> REPLACE KEYS <key>...`
    #[instrument(skip(self, keys), fields(instance = %self.instance, key_count = keys.len()))]
    pub async fn migrate_keys(
        &self,
        host: &str,
        port: u16,
        keys: &[String],
        timeout: Duration,
    ) -> Result<(), ClientError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut args: Vec<Value> = vec![
            host.into(),
            Value::from(i64::from(port)),
            "".into(),
            Value::from(0_i64),
            Value::from(timeout.as_millis() as i64),
            "REPLACE".into(),
            "KEYS".into(),
        ];
        args.extend(keys.iter().map(|key| Value::from(key.clone())));

        let _: Value = self
            .client
            .custom(
                CustomCommand::new_static("MIGRATE", ClusterHash::default(), false),
                args,
            )
            .await?;

        Ok(())
    }
}
