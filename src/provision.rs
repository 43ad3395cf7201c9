//! Provisioning against the cluster-management provider.
//!
//! Clusters are reused by ID. Creating new clusters through a cloud API is
//! not supported.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cluster::{ClusterInfo, HealthPhase, HealthStatus, properties};
use crate::error::{KeoError, Result};
use crate::health::{CompositeProbe, HealthProbe};
use crate::k8s::build_kube_client;
use crate::orchestrator::Provisioner;
use crate::provider::ClusterManager;
use crate::readiness::{ReadinessConfig, ReadinessMonitor};

/// Reuses an existing cluster and gates it on readiness.
pub struct OcmProvisioner {
    provider: Arc<dyn ClusterManager>,
    cluster_id: String,
    readiness: ReadinessConfig,
    skip_destroy: bool,
    kubeconfig_path: Option<PathBuf>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl OcmProvisioner {
    pub fn new(
        provider: Arc<dyn ClusterManager>,
        cluster_id: &str,
        readiness: ReadinessConfig,
        skip_destroy: bool,
    ) -> Self {
        Self {
            provider,
            cluster_id: cluster_id.to_string(),
            readiness,
            skip_destroy,
            kubeconfig_path: None,
            probe: None,
        }
    }

    /// Read the kubeconfig from a local file instead of the provider.
    #[must_use]
    pub fn with_kubeconfig_path(mut self, path: Option<PathBuf>) -> Self {
        self.kubeconfig_path = path;
        self
    }

    /// Use `probe` instead of the kube-backed composite probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    async fn load_kubeconfig(&self) -> Result<Vec<u8>> {
        match &self.kubeconfig_path {
            Some(path) => {
                info!("Using kubeconfig from {}", path.display());
                Ok(tokio::fs::read(path).await?)
            }
            None => self.provider.kubeconfig(&self.cluster_id).await,
        }
    }

    async fn probe_for(&self, kubeconfig: &[u8]) -> Result<Arc<dyn HealthProbe>> {
        if let Some(probe) = &self.probe {
            return Ok(Arc::clone(probe));
        }
        let client = build_kube_client(kubeconfig).await?;
        Ok(Arc::new(CompositeProbe::for_cluster(client)))
    }
}

#[async_trait]
impl Provisioner for OcmProvisioner {
    async fn provision(&self, cancel: &CancellationToken) -> Result<ClusterInfo> {
        if self.cluster_id.is_empty() {
            return Err(KeoError::Config(
                "a cluster ID is required; creating clusters is not supported".to_string(),
            ));
        }
        info!("Reusing cluster {}", self.cluster_id);
        self.provider.get_cluster(&self.cluster_id).await?;

        let kubeconfig = self.load_kubeconfig().await?;
        if !self.readiness.skip {
            let probe = self.probe_for(&kubeconfig).await?;
            let report = ReadinessMonitor::new(
                Arc::clone(&self.provider),
                self.readiness,
                HealthPhase::Install,
            )
            .wait(&self.cluster_id, probe.as_ref(), cancel)
            .await?;
            info!(
                polls = report.polls,
                clean_runs = report.clean_runs,
                elapsed_secs = report.elapsed.as_secs(),
                "Cluster passed health checks"
            );
        }

        // Fetched again so the annotations written while waiting are included.
        let snapshot = self.provider.get_cluster(&self.cluster_id).await?;
        Ok(ClusterInfo::from_snapshot(
            &snapshot,
            self.provider.name(),
            kubeconfig,
        ))
    }

    async fn destroy(&self, cluster: &ClusterInfo) -> Result<()> {
        let status = if cluster.is_passing() {
            properties::STATUS_COMPLETED_PASSING
        } else {
            properties::STATUS_COMPLETED_FAILING
        };
        if let Err(e) = self
            .provider
            .add_property(&cluster.id, properties::STATUS, status)
            .await
        {
            warn!(error = %e, "Failed to annotate cluster {} as {}", cluster.id, status);
        }

        if self.skip_destroy {
            info!("Preserving cluster {} ({})", cluster.name, cluster.id);
            return Ok(());
        }

        info!("Destroying cluster {}", cluster.id);
        self.provider.delete_cluster(&cluster.id).await
    }

    async fn kubeconfig(&self, cluster: &ClusterInfo) -> Result<Vec<u8>> {
        if !cluster.kubeconfig.is_empty() {
            return Ok(cluster.kubeconfig.clone());
        }
        self.provider.kubeconfig(&cluster.id).await
    }

    async fn health(&self, cluster: &ClusterInfo) -> Result<HealthStatus> {
        let kubeconfig = self.kubeconfig(cluster).await?;
        let client = build_kube_client(&kubeconfig).await?;
        CompositeProbe::for_cluster(client).health_status().await
    }
}
