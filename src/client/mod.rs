//! Redis connectivity and the `CLUSTER NODES` wire model.
//!
//! ## Module structure
//!
//! - [`types`]: parsed wire types with canonical round-trip formatting
//! - [`redis_client`]: typed command wrapper over a per-instance fred client
//! - [`provider`]: lazy per-instance connection cache

pub mod provider;
pub mod redis_client;
pub mod types;

pub use provider::ConnectionProvider;
pub use redis_client::{ClientError, RedisConnection};
pub use types::{
    ClusterNode, ClusterNodeAddress, ClusterNodeFlags, ClusterNodeId, ClusterNodes, HashSlots,
    LinkState, ParseError, SLOT_COUNT,
};
