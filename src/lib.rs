//! redis-cluster-manager library crate
//!
//! A convergence engine for Redis Cluster: a periodic control loop that
//! queries every managed instance's view of the cluster, merges the views
//! into a validated topology database, plans the minimal set of primitive
//! operations (meet, forget, replicate, slot assignment, slot migration)
//! and executes them against live connections.

pub mod client;
pub mod manager;
pub mod topology;

pub use client::{ClusterNodeId, ClusterNodes, ConnectionProvider, HashSlots, SLOT_COUNT};
pub use manager::{Manager, ManagerConfig, ManagerError, ManagerState};
pub use topology::{MasterGroup, Operation, RedisInstance, TopologyDatabase};
