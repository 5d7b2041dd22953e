//! Topology model: desired-state input, the per-tick database and the
//! reconciliation planner.
//!
//! ## Module structure
//!
//! - [`spec`]: the desired topology (instances and master groups)
//! - [`database`]: the merged actual topology with ingest-time validation
//! - [`operations`]: the primitive convergence operation type
//! - [`planner`]: the phased planning pass over the database

pub mod database;
pub mod operations;
pub mod planner;
pub mod spec;

pub use database::{Connection, TopologyDatabase, TopologyError};
pub use operations::Operation;
pub use spec::{DEFAULT_REDIS_PORT, MasterGroup, RedisInstance, SpecError};
