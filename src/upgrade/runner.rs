//! End-to-end upgrade of the cluster under test.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use semver::Version;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::channel::{ChannelResolver, parse_version};
use super::graph::VersionGraph;
use super::scheduler::{ManagedScheduler, UpgradeScheduler};
use super::select::latest_in_graph;
use super::{MonitorSettings, UpgradeMonitor, UpgradeRequest, UpgradeSource};
use crate::cluster::{ClusterInfo, HealthPhase, properties};
use crate::config::{UpgradeSettings, UpgradeSourceArg, UpgradeTarget};
use crate::error::{KeoError, ReadinessError, Result};
use crate::health::CompositeProbe;
use crate::k8s::{LocalScheduler, UpgradeConfigClient, build_kube_client};
use crate::provider::ClusterManager;
use crate::readiness::{ReadinessConfig, ReadinessMonitor};

/// Delay applied when moving a managed upgrade forward.
const RESCHEDULE_DELAY_MINUTES: i64 = 1;

/// How an upgrade attempt ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Nothing to upgrade to; carries the reason.
    Skipped(String),
    Completed { version: String },
}

/// Upgrades the cluster under test and waits until it is healthy again.
#[async_trait]
pub trait Upgrader: Send + Sync {
    async fn upgrade(
        &self,
        cluster: &ClusterInfo,
        cancel: &CancellationToken,
    ) -> Result<UpgradeOutcome>;
}

impl From<UpgradeSourceArg> for UpgradeSource {
    fn from(source: UpgradeSourceArg) -> Self {
        match source {
            UpgradeSourceArg::Managed => Self::Managed,
            UpgradeSourceArg::Local => Self::Local,
        }
    }
}

/// [`Upgrader`] backed by the provider, the release graph and the cluster API.
pub struct ClusterUpgrader {
    provider: Arc<dyn ClusterManager>,
    settings: UpgradeSettings,
    channel_group: String,
    graph_url: String,
    readiness: ReadinessConfig,
}

impl ClusterUpgrader {
    pub fn new(
        provider: Arc<dyn ClusterManager>,
        settings: UpgradeSettings,
        channel_group: &str,
        graph_url: &str,
        readiness: ReadinessConfig,
    ) -> Self {
        Self {
            provider,
            settings,
            channel_group: channel_group.to_string(),
            graph_url: graph_url.to_string(),
            readiness,
        }
    }

    fn resolver(&self, install: &Version) -> ChannelResolver {
        let resolver = ChannelResolver::new(&self.channel_group);
        if self.settings.only_z_stream {
            resolver.only_z_stream(install.clone())
        } else {
            resolver
        }
    }

    /// Turn the configured target into a request. `None` when no newer version is available.
    pub async fn resolve_target(
        &self,
        install: &Version,
        graph: &VersionGraph,
    ) -> Result<Option<UpgradeRequest>> {
        let source = UpgradeSource::from(self.settings.source);
        match &self.settings.target {
            UpgradeTarget::Release(release) => {
                UpgradeRequest::new(Some(release.clone()), None, source).map(Some)
            }
            UpgradeTarget::Image(image) => {
                UpgradeRequest::new(None, Some(image.clone()), source).map(Some)
            }
            UpgradeTarget::Latest => {
                let channel = graph.resolver().resolve(install)?;
                let edges = graph.get(&channel).await?;
                match latest_in_graph(&edges, install, self.settings.only_z_stream) {
                    Some(version) => {
                        info!("Selected upgrade target {} from channel {}", version, channel);
                        UpgradeRequest::new(Some(version.to_string()), None, source).map(Some)
                    }
                    None => Ok(None),
                }
            }
        }
    }
}

#[async_trait]
impl Upgrader for ClusterUpgrader {
    async fn upgrade(
        &self,
        cluster: &ClusterInfo,
        cancel: &CancellationToken,
    ) -> Result<UpgradeOutcome> {
        let install = parse_version(&cluster.version)?;
        let resolver = self.resolver(&install);
        let graph = Arc::new(VersionGraph::new(self.graph_url.clone(), resolver.clone()));

        let Some(request) = self.resolve_target(&install, &graph).await? else {
            info!("No upgrade target newer than {} found, skipping upgrade", install);
            return Ok(UpgradeOutcome::Skipped("no version found".to_string()));
        };
        let target = request.target().to_string();

        if let Err(e) = self
            .provider
            .add_property(&cluster.id, properties::UPGRADE_VERSION, &target)
            .await
        {
            warn!(error = %e, "Failed to annotate cluster with upgrade version");
        }

        let client = build_kube_client(&cluster.kubeconfig).await?;
        let scheduler: Arc<dyn UpgradeScheduler> = match request.source {
            UpgradeSource::Managed => {
                Arc::new(ManagedScheduler::new(Arc::clone(&self.provider), &cluster.id))
            }
            UpgradeSource::Local => Arc::new(LocalScheduler::new(client.clone())),
        };
        let status = Arc::new(UpgradeConfigClient::new(client.clone()));

        let mut monitor = UpgradeMonitor::new(
            &cluster.id,
            install,
            scheduler,
            status,
            resolver,
            MonitorSettings::new(self.settings.poll_interval, self.settings.max_duration),
        );
        if self.settings.validate_edge {
            monitor = monitor.with_edge_validation(graph);
        }

        monitor.trigger(request, cancel).await?;

        if self.settings.reschedule {
            let at = Utc::now() + ChronoDuration::minutes(RESCHEDULE_DELAY_MINUTES);
            if let Err(e) = monitor.reschedule(at).await {
                warn!(error = %e, "Failed to reschedule upgrade");
            }
        }

        monitor.wait(cancel).await?;

        let probe = CompositeProbe::for_cluster(client);
        ReadinessMonitor::new(Arc::clone(&self.provider), self.readiness, HealthPhase::Upgrade)
            .wait(&cluster.id, &probe, cancel)
            .await
            .map_err(|e| match e {
                ReadinessError::Cancelled => {
                    KeoError::Cancelled("post-upgrade readiness".to_string())
                }
                other => {
                    KeoError::UpgradeFailed(format!("cluster not healthy after upgrade: {other}"))
                }
            })?;

        info!("Cluster {} upgraded to {}", cluster.id, target);
        Ok(UpgradeOutcome::Completed { version: target })
    }
}
