//! Cluster-management provider interface.
//!
//! The readiness and upgrade monitors only talk to the provider through
//! [`ClusterManager`], so tests can script provider behavior.

pub mod ocm;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cluster::ClusterSnapshot;
use crate::error::Result;

pub use ocm::OcmClient;

/// Operations the harness needs from a cluster-management provider.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Short provider name recorded on [`crate::cluster::ClusterInfo`].
    fn name(&self) -> &str;

    /// Fetch the current state of a cluster.
    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot>;

    /// Set a single property on the cluster, keeping every other property.
    async fn add_property(&self, cluster_id: &str, key: &str, value: &str) -> Result<()>;

    /// Delete the cluster.
    async fn delete_cluster(&self, cluster_id: &str) -> Result<()>;

    /// Admin kubeconfig contents for the cluster.
    async fn kubeconfig(&self, cluster_id: &str) -> Result<Vec<u8>>;

    /// Schedule a managed upgrade to `version` at `next_run`.
    async fn upgrade(&self, cluster_id: &str, version: &str, next_run: DateTime<Utc>)
    -> Result<()>;

    /// ID of the first outstanding upgrade policy, `None` when there is none.
    async fn get_upgrade_policy_id(&self, cluster_id: &str) -> Result<Option<String>>;

    /// Move an existing upgrade policy to a new run time.
    async fn update_schedule(
        &self,
        cluster_id: &str,
        policy_id: &str,
        next_run: DateTime<Utc>,
    ) -> Result<()>;
}
