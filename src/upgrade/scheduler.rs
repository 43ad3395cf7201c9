//! Upgrade scheduling paths.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::{UpgradeRequest, UpgradeSource};
use crate::error::{KeoError, Result};
use crate::provider::ClusterManager;

/// Lead time the provider needs between scheduling and the first run.
pub const MANAGED_SCHEDULE_LEAD_MINUTES: i64 = 7;

/// Places an upgrade request with whatever will carry it out.
#[async_trait]
pub trait UpgradeScheduler: Send + Sync {
    fn source(&self) -> UpgradeSource;

    /// Submit the request. `channel` is the resolved channel of the desired version.
    async fn schedule(&self, request: &UpgradeRequest, channel: Option<&str>) -> Result<()>;

    /// Whether a scheduled upgrade is still outstanding.
    async fn has_outstanding(&self) -> Result<bool>;

    /// Move the outstanding upgrade to run at `at`.
    async fn reschedule(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Schedules upgrades through the cluster-management provider's upgrade policies.
pub struct ManagedScheduler {
    provider: Arc<dyn ClusterManager>,
    cluster_id: String,
}

impl ManagedScheduler {
    pub fn new(provider: Arc<dyn ClusterManager>, cluster_id: &str) -> Self {
        Self {
            provider,
            cluster_id: cluster_id.to_string(),
        }
    }
}

#[async_trait]
impl UpgradeScheduler for ManagedScheduler {
    fn source(&self) -> UpgradeSource {
        UpgradeSource::Managed
    }

    async fn schedule(&self, request: &UpgradeRequest, _channel: Option<&str>) -> Result<()> {
        if request.desired_image.is_some() {
            return Err(KeoError::UpgradeNotPossible(
                "image-based managed upgrades are unsupported".to_string(),
            ));
        }
        let version = request.desired_version.as_deref().ok_or_else(|| {
            KeoError::UpgradeNotPossible("managed upgrades require a release".to_string())
        })?;

        let next_run = request.requested_at + Duration::minutes(MANAGED_SCHEDULE_LEAD_MINUTES);
        self.provider
            .upgrade(&self.cluster_id, version, next_run)
            .await
    }

    async fn has_outstanding(&self) -> Result<bool> {
        Ok(self
            .provider
            .get_upgrade_policy_id(&self.cluster_id)
            .await?
            .is_some())
    }

    async fn reschedule(&self, at: DateTime<Utc>) -> Result<()> {
        let policy_id = self
            .provider
            .get_upgrade_policy_id(&self.cluster_id)
            .await?
            .ok_or_else(|| {
                KeoError::UpgradeNotPossible(format!(
                    "no upgrade policy to reschedule for cluster {}",
                    self.cluster_id
                ))
            })?;
        info!(
            "Rescheduling upgrade policy {} for cluster {} to {}",
            policy_id,
            self.cluster_id,
            at.to_rfc3339()
        );
        self.provider
            .update_schedule(&self.cluster_id, &policy_id, at)
            .await
    }
}
