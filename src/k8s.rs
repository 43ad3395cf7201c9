//! Kubernetes access to the cluster under test.

pub mod client;
pub mod upgrade_config;

pub use client::build_kube_client;
pub use upgrade_config::{LocalScheduler, UpgradeConfigClient};
