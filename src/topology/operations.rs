//! Primitive convergence operations.

use std::fmt;

use crate::client::types::{ClusterNodeId, HashSlots};
use crate::topology::spec::RedisInstance;

/// A primitive operation that advances the actual topology toward the
/// desired one. Operations are executed in the order the planner emits
/// them; a failed operation is retried naturally on the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Make `target` learn about `other`'s address (`CLUSTER MEET`).
    Meet {
        target: RedisInstance,
        other: RedisInstance,
    },

    /// Make `target` drop `node_id` from its view (`CLUSTER FORGET`).
    Forget {
        target: RedisInstance,
        node_id: ClusterNodeId,
    },

    /// Demote `target` into a replica of `master` (`CLUSTER REPLICATE`).
    Replicate {
        target: RedisInstance,
        master: RedisInstance,
        master_id: ClusterNodeId,
    },

    /// Assign unowned slots to `target` (`CLUSTER ADDSLOTS`).
    AddSlots {
        target: RedisInstance,
        slots: HashSlots,
    },

    /// Move one slot from `source` to `destination` (the SETSLOT dance).
    MigrateSlot {
        source: RedisInstance,
        source_id: ClusterNodeId,
        destination: RedisInstance,
        destination_id: ClusterNodeId,
        slot: u16,
    },
}

impl Operation {
    /// Whether this is a mesh operation (phase 1).
    pub fn is_mesh(&self) -> bool {
        matches!(self, Operation::Meet { .. } | Operation::Forget { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Meet { target, other } => write!(f, "meet {} -> {}", target, other),
            Operation::Forget { target, node_id } => {
                write!(f, "forget {} on {}", node_id, target)
            }
            Operation::Replicate {
                target, master_id, ..
            } => write!(f, "replicate {} under {}", target, master_id),
            Operation::AddSlots { target, slots } => {
                write!(f, "add {} slot(s) to {}", slots.len(), target)
            }
            Operation::MigrateSlot {
                source,
                destination,
                slot,
                ..
            } => write!(f, "migrate slot {} from {} to {}", slot, source, destination),
        }
    }
}
