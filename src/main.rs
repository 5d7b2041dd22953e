//! redis-cluster-manager - drives Redis instances into a valid cluster
//! configuration.
//!
//! This is the thin entry point that:
//! - Parses the master-group specs and flags
//! - Initializes structured logging on stderr
//! - Runs the manager loop until SIGINT/SIGTERM

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use redis_cluster_manager::manager::{Manager, ManagerConfig};
use redis_cluster_manager::topology::MasterGroup;
use redis_cluster_manager::ConnectionProvider;

/// A tool to converge Redis instances into a cluster.
#[derive(Parser)]
#[command(name = "redis-cluster-manager", version, about)]
struct Args {
    /// Master group specs, each a comma-separated list of host[:port].
    /// The first instance of a group is its preferred master.
    #[arg(required = true, value_name = "MASTER-GROUP")]
    master_groups: Vec<String>,

    /// Seconds between reconciliation ticks.
    #[arg(long, default_value_t = 5, value_name = "SECONDS")]
    sync_period: u64,

    /// Seconds of sustained errors before a warning summary is logged.
    #[arg(long, default_value_t = 30, value_name = "SECONDS")]
    warning_threshold: u64,

    /// Maximum slots per pipelined CLUSTER ADDSLOTS command.
    #[arg(long, default_value_t = 1024, value_name = "COUNT")]
    max_slots_per_add_slots: usize,

    /// Move misplaced slots once mesh, replication and assignment are done.
    #[arg(long)]
    enable_slot_migration: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut groups = Vec::with_capacity(args.master_groups.len());

    for (index, spec) in args.master_groups.iter().enumerate() {
        match spec.parse::<MasterGroup>() {
            Ok(group) => groups.push(group),
            Err(err) => {
                error!(event = "invalid-master-group", index, error = %err);
                return ExitCode::FAILURE;
            }
        }
    }

    info!(event = "master-groups", count = groups.len());

    for (index, group) in groups.iter().enumerate() {
        info!(event = "master-group", index, group = %group);
    }

    let config = ManagerConfig {
        sync_period: Duration::from_secs(args.sync_period),
        warning_threshold: Duration::from_secs(args.warning_threshold),
        max_slots_per_add_slots: args.max_slots_per_add_slots,
        enable_slot_migration: args.enable_slot_migration,
        ..ManagerConfig::default()
    };

    let provider = Arc::new(ConnectionProvider::new(
        config.connection_timeout,
        config.command_timeout,
    ));

    let manager = Manager::new(config, provider.clone());

    info!(event = "started");
    manager.run(groups, shutdown_signal()).await;

    provider.close_all().await;
    info!(event = "stopped");

    ExitCode::SUCCESS
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the manager cannot shut
/// down gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
