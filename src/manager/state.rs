//! Manager state machine.

use std::fmt;

use crate::topology::operations::Operation;

/// Where the manager currently is in the convergence sequence.
///
/// The state moves forward as phases complete and falls back to any earlier
/// state when the planner emits operations for it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Waiting for the master-group endpoints to become reachable.
    DnsResolution,
    /// Establishing the node mesh.
    Mesh,
    /// Setting up replication.
    Replication,
    /// Assigning and moving hash slots.
    Assignment,
    /// The last planning pass returned zero operations.
    Stable,
}

impl ManagerState {
    /// The state an operation belongs to.
    pub fn for_operation(operation: &Operation) -> Self {
        match operation {
            Operation::Meet { .. } | Operation::Forget { .. } => ManagerState::Mesh,
            Operation::Replicate { .. } => ManagerState::Replication,
            Operation::AddSlots { .. } | Operation::MigrateSlot { .. } => ManagerState::Assignment,
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::DnsResolution => write!(f, "dns-resolution"),
            ManagerState::Mesh => write!(f, "mesh"),
            ManagerState::Replication => write!(f, "replication"),
            ManagerState::Assignment => write!(f, "assignment"),
            ManagerState::Stable => write!(f, "stable"),
        }
    }
}
