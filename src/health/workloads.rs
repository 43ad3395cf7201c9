//! Replica checks for platform daemonsets and deployments.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::api::{Api, ListParams};

use super::{HealthCheck, is_system_namespace};
use crate::error::{KeoError, Result};

fn qualified(namespace: Option<&str>, name: Option<&str>) -> String {
    format!("{}/{}", namespace.unwrap_or_default(), name.unwrap_or_default())
}

/// Describe system daemonsets whose pods are not all ready.
pub fn daemonset_failures(daemonsets: &[DaemonSet]) -> Vec<String> {
    daemonsets
        .iter()
        .filter(|ds| is_system_namespace(ds.metadata.namespace.as_deref().unwrap_or_default()))
        .filter_map(|ds| {
            let status = ds.status.as_ref()?;
            (status.number_ready < status.desired_number_scheduled).then(|| {
                format!(
                    "daemonset {} has {}/{} pods ready",
                    qualified(ds.metadata.namespace.as_deref(), ds.metadata.name.as_deref()),
                    status.number_ready,
                    status.desired_number_scheduled
                )
            })
        })
        .collect()
}

/// Describe system deployments with fewer ready replicas than desired.
pub fn deployment_failures(deployments: &[Deployment]) -> Vec<String> {
    deployments
        .iter()
        .filter(|d| is_system_namespace(d.metadata.namespace.as_deref().unwrap_or_default()))
        .filter_map(|d| {
            let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let ready = d
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            (ready < desired).then(|| {
                format!(
                    "deployment {} has {}/{} replicas ready",
                    qualified(d.metadata.namespace.as_deref(), d.metadata.name.as_deref()),
                    ready,
                    desired
                )
            })
        })
        .collect()
}

/// Fails while a system daemonset has unready pods.
pub struct DaemonSetCheck {
    client: kube::Client,
}

impl DaemonSetCheck {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthCheck for DaemonSetCheck {
    fn name(&self) -> &'static str {
        "daemonset"
    }

    async fn check(&self) -> Result<Vec<String>> {
        let api: Api<DaemonSet> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| KeoError::kube("Failed to list daemonsets", &e))?;
        Ok(daemonset_failures(&list.items))
    }
}

/// Fails while a system deployment is short of ready replicas.
pub struct DeploymentCheck {
    client: kube::Client,
}

impl DeploymentCheck {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthCheck for DeploymentCheck {
    fn name(&self) -> &'static str {
        "deployment"
    }

    async fn check(&self) -> Result<Vec<String>> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| KeoError::kube("Failed to list deployments", &e))?;
        Ok(deployment_failures(&list.items))
    }
}
