//! The per-tick topology database.
//!
//! The database merges every instance's `CLUSTER NODES` view into one
//! consistent model and rejects contradictory reports at ingest time. It is
//! built fresh on every reconciliation tick and never outlives it, which
//! gives the reconciler natural recovery from any corrupt state.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::client::types::{ClusterNodeId, ClusterNodes, HashSlots, ParseError};
use crate::topology::spec::{MasterGroup, RedisInstance};

/// Errors raised when a report contradicts the model or the registration
/// preconditions.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("can't register master group {group} because {instance} is already a member of {other}")]
    GroupOverlap {
        group: MasterGroup,
        instance: RedisInstance,
        other: MasterGroup,
    },

    #[error("no master group was registered")]
    NoGroups,

    #[error("{0} is not part of a registered master group")]
    UnknownInstance(RedisInstance),

    #[error("can't feed from nodes of {instance}: {source}")]
    BadSelf {
        instance: RedisInstance,
        #[source]
        source: ParseError,
    },

    #[error("{0} was already fed")]
    InstanceAlreadyFed(RedisInstance),

    #[error("refusing to register {id} for {instance} as it is already registered for {other}")]
    IdAlreadyBound {
        id: ClusterNodeId,
        instance: RedisInstance,
        other: RedisInstance,
    },

    #[error("refusing to register {id} as master because it is a replica of {master_id}")]
    MasterIsReplica {
        id: ClusterNodeId,
        master_id: ClusterNodeId,
    },

    #[error("refusing to register {id} as replica of {master_id} because it is a master")]
    ReplicaIsMaster {
        id: ClusterNodeId,
        master_id: ClusterNodeId,
    },

    #[error(
        "refusing to register {id} as replica of {master_id} because it is already a replica of {other}"
    )]
    ReplicaOfTwoMasters {
        id: ClusterNodeId,
        master_id: ClusterNodeId,
        other: ClusterNodeId,
    },

    #[error("refusing to register {0} as replica without a master")]
    ReplicaWithoutMaster(ClusterNodeId),

    #[error("refusing to register {id} as replica of {master_id}: {source}")]
    ImplicitMasterRejected {
        id: ClusterNodeId,
        master_id: ClusterNodeId,
        #[source]
        source: Box<TopologyError>,
    },
}

/// A directed `knows-about` edge between two cluster nodes, as observed
/// from the reporting side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: ClusterNodeId,
    pub to: ClusterNodeId,
}

/// Aggregation of per-instance cluster views.
#[derive(Debug, Default)]
pub struct TopologyDatabase {
    pub(crate) master_groups: Vec<MasterGroup>,
    pub(crate) group_by_instance: HashMap<RedisInstance, MasterGroup>,
    pub(crate) instance_by_id: HashMap<ClusterNodeId, RedisInstance>,
    pub(crate) id_by_instance: HashMap<RedisInstance, ClusterNodeId>,
    pub(crate) nodes_by_id: HashMap<ClusterNodeId, ClusterNodes>,
    /// Sorted set of every id classified as a master.
    pub(crate) masters: Vec<ClusterNodeId>,
    /// Sorted replica ids per master id.
    pub(crate) replicas_by_master: HashMap<ClusterNodeId, Vec<ClusterNodeId>>,
    pub(crate) connections: HashSet<Connection>,
    /// Slot ownership, from self-reports only.
    pub(crate) slots_by_node: HashMap<ClusterNodeId, HashSlots>,
    pub(crate) managed_slots: HashSlots,
    pub(crate) migrations_enabled: bool,
}

impl TopologyDatabase {
    /// A database managing every hash slot.
    pub fn new() -> Self {
        Self {
            managed_slots: HashSlots::all(),
            ..Self::default()
        }
    }

    /// Restrict the database to a subset of slots.
    pub fn with_managed_slots(mut self, slots: HashSlots) -> Self {
        self.managed_slots = slots;
        self
    }

    /// Allow the planner to emit slot migrations (phase 4).
    pub fn with_migrations_enabled(mut self, enabled: bool) -> Self {
        self.migrations_enabled = enabled;
        self
    }

    /// Register a master group.
    ///
    /// Fails when any member already belongs to a previously registered
    /// group.
    pub fn register_group(&mut self, group: MasterGroup) -> Result<(), TopologyError> {
        for instance in &group {
            if let Some(other) = self.group_by_instance.get(instance) {
                return Err(TopologyError::GroupOverlap {
                    group: group.clone(),
                    instance: instance.clone(),
                    other: other.clone(),
                });
            }
        }

        for instance in &group {
            self.group_by_instance
                .insert(instance.clone(), group.clone());
        }

        self.master_groups.push(group);

        Ok(())
    }

    /// Feed the database with one instance's `CLUSTER NODES` reply.
    pub fn feed(
        &mut self,
        instance: RedisInstance,
        nodes: ClusterNodes,
    ) -> Result<(), TopologyError> {
        if self.master_groups.is_empty() {
            return Err(TopologyError::NoGroups);
        }

        if !self.group_by_instance.contains_key(&instance) {
            return Err(TopologyError::UnknownInstance(instance));
        }

        let self_node = nodes.self_node().map_err(|source| TopologyError::BadSelf {
            instance: instance.clone(),
            source,
        })?;
        let self_id = self_node.id.clone();

        if self.id_by_instance.contains_key(&instance) {
            return Err(TopologyError::InstanceAlreadyFed(instance));
        }

        if let Some(other) = self.instance_by_id.get(&self_id) {
            return Err(TopologyError::IdAlreadyBound {
                id: self_id,
                instance,
                other: other.clone(),
            });
        }

        for node in nodes.iter() {
            if node.id == self_id {
                self.slots_by_node.insert(self_id.clone(), node.slots.clone());
            } else {
                self.connections.insert(Connection {
                    from: self_id.clone(),
                    to: node.id.clone(),
                });
            }

            if node.is_master() {
                self.add_master(node.id.clone())?;
            } else {
                self.add_replica(node.master_id.clone(), node.id.clone())?;
            }
        }

        self.instance_by_id.insert(self_id.clone(), instance.clone());
        self.id_by_instance.insert(instance, self_id.clone());
        self.nodes_by_id.insert(self_id, nodes);

        Ok(())
    }

    /// Whether `id` is classified as a master.
    pub fn is_master(&self, id: &ClusterNodeId) -> bool {
        self.masters.binary_search(id).is_ok()
    }

    /// The master `id` replicates, when classified as a replica.
    pub fn replica_of(&self, id: &ClusterNodeId) -> Option<&ClusterNodeId> {
        self.replicas_by_master
            .iter()
            .find(|(_, replicas)| replicas.binary_search(id).is_ok())
            .map(|(master_id, _)| master_id)
    }

    /// The master id the node itself reported, when it reported one.
    ///
    /// Unlike [`replica_of`](Self::replica_of) this reads the node's own
    /// self-report, not the merged classification.
    pub fn master_of(&self, id: &ClusterNodeId) -> Option<&ClusterNodeId> {
        let self_node = self.nodes_by_id.get(id)?.self_node().ok()?;

        if self_node.master_id.is_set() {
            Some(&self_node.master_id)
        } else {
            None
        }
    }

    /// The id an instance reported for itself, once fed.
    pub fn id_of(&self, instance: &RedisInstance) -> Option<&ClusterNodeId> {
        self.id_by_instance.get(instance)
    }

    /// The instance a node id was fed from, when there is one.
    pub fn instance_of(&self, id: &ClusterNodeId) -> Option<&RedisInstance> {
        self.instance_by_id.get(id)
    }

    fn add_master(&mut self, id: ClusterNodeId) -> Result<(), TopologyError> {
        let index = match self.masters.binary_search(&id) {
            Ok(_) => return Ok(()),
            Err(index) => index,
        };

        if let Some(master_id) = self.replica_of(&id) {
            return Err(TopologyError::MasterIsReplica {
                id,
                master_id: master_id.clone(),
            });
        }

        self.replicas_by_master.entry(id.clone()).or_default();
        self.masters.insert(index, id);

        Ok(())
    }

    fn add_replica(
        &mut self,
        master_id: ClusterNodeId,
        id: ClusterNodeId,
    ) -> Result<(), TopologyError> {
        if !master_id.is_set() {
            return Err(TopologyError::ReplicaWithoutMaster(id));
        }

        if self.is_master(&id) {
            return Err(TopologyError::ReplicaIsMaster { id, master_id });
        }

        if let Some(other) = self.replica_of(&id) {
            if *other == master_id {
                return Ok(());
            }

            return Err(TopologyError::ReplicaOfTwoMasters {
                id,
                master_id,
                other: other.clone(),
            });
        }

        // First sighting of this master: it is registered implicitly.
        if !self.is_master(&master_id) {
            self.add_master(master_id.clone()).map_err(|source| {
                TopologyError::ImplicitMasterRejected {
                    id: id.clone(),
                    master_id: master_id.clone(),
                    source: Box::new(source),
                }
            })?;
        }

        let replicas = self.replicas_by_master.entry(master_id).or_default();

        if let Err(index) = replicas.binary_search(&id) {
            replicas.insert(index, id);
        }

        Ok(())
    }
}
