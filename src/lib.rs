//! keo - Kubernetes E2E Orchestrator.
//!
//! Reuses a managed cluster, waits until it is healthy, runs a test workload,
//! optionally upgrades the cluster and runs the workload again, then reports
//! and tears the cluster down.

pub mod analyze;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod execute;
pub mod health;
pub mod k8s;
pub mod orchestrator;
pub mod provider;
pub mod provision;
pub mod readiness;
pub mod report;
pub mod upgrade;

#[cfg(test)]
mod testing;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");
