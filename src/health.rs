//! Composite cluster health probe.
//!
//! A [`CompositeProbe`] runs independent [`HealthCheck`]s concurrently and folds
//! their results into one [`ProbeOutcome`]. A check that could not execute is an
//! error, which the readiness wait counts separately from a check that ran and
//! found problems.

pub mod nodes;
pub mod pods;
pub mod workloads;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::cluster::HealthStatus;
use crate::error::Result;

pub use nodes::NodeCheck;
pub use pods::PodCheck;
pub use workloads::{DaemonSetCheck, DeploymentCheck};

/// Namespaces owned by the platform rather than by tenants.
pub const SYSTEM_NAMESPACE_PREFIXES: &[&str] = &["openshift-", "kube-"];

/// Returns true if the namespace belongs to the platform.
pub fn is_system_namespace(namespace: &str) -> bool {
    SYSTEM_NAMESPACE_PREFIXES
        .iter()
        .any(|prefix| namespace.starts_with(prefix))
}

/// Result of one composite health evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Every check ran and none found problems.
    Healthy,
    /// Every check ran; the listed checks found problems.
    Unhealthy(Vec<String>),
    /// At least one check could not execute.
    Error(String),
}

/// Something the readiness wait can poll for cluster health.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}

/// One independent health check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Short name annotated onto the cluster while the check is failing.
    fn name(&self) -> &'static str;

    /// Run the check, returning a description of each problem found.
    async fn check(&self) -> Result<Vec<String>>;
}

/// Runs a fixed set of checks and combines their results.
pub struct CompositeProbe {
    checks: Vec<Box<dyn HealthCheck>>,
}

impl CompositeProbe {
    pub fn new(checks: Vec<Box<dyn HealthCheck>>) -> Self {
        Self { checks }
    }

    /// Default checks for a cluster reachable through `client`.
    pub fn for_cluster(client: kube::Client) -> Self {
        Self::new(vec![
            Box::new(NodeCheck::new(client.clone())),
            Box::new(PodCheck::new(client.clone())),
            Box::new(DaemonSetCheck::new(client.clone())),
            Box::new(DeploymentCheck::new(client)),
        ])
    }

    async fn run_checks(&self) -> Vec<(&'static str, Result<Vec<String>>)> {
        let results = join_all(self.checks.iter().map(|c| c.check())).await;
        self.checks.iter().map(|c| c.name()).zip(results).collect()
    }

    /// Evaluate every check into a [`HealthStatus`] with one condition per check.
    ///
    /// Errors only when no check could execute.
    pub async fn health_status(&self) -> Result<HealthStatus> {
        let results = self.run_checks().await;
        let mut conditions = BTreeMap::new();
        let mut messages = Vec::new();
        let mut first_error = None;
        let mut errors = 0usize;

        for (name, result) in results {
            match result {
                Ok(failures) => {
                    conditions.insert(name.to_string(), failures.is_empty());
                    messages.extend(failures);
                }
                Err(e) => {
                    errors += 1;
                    conditions.insert(name.to_string(), false);
                    messages.push(format!("{name}: {e}"));
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error
            && errors == conditions.len()
        {
            return Err(e);
        }

        let ready = conditions.values().all(|ok| *ok);
        let message = if ready {
            "all health checks passed".to_string()
        } else {
            messages.join("; ")
        };
        Ok(HealthStatus {
            ready,
            message,
            conditions,
        })
    }
}

#[async_trait]
impl HealthProbe for CompositeProbe {
    async fn probe(&self) -> ProbeOutcome {
        let results = self.run_checks().await;
        let mut failing = Vec::new();
        let mut errors = Vec::new();

        for (name, result) in results {
            match result {
                Ok(failures) if failures.is_empty() => {}
                Ok(failures) => {
                    for failure in &failures {
                        debug!(check = name, "{}", failure);
                    }
                    failing.push(name.to_string());
                }
                Err(e) => {
                    warn!(check = name, error = %e, "Health check could not execute");
                    errors.push(format!("{name}: {e}"));
                }
            }
        }

        if !errors.is_empty() {
            return ProbeOutcome::Error(errors.join("; "));
        }
        if failing.is_empty() {
            ProbeOutcome::Healthy
        } else {
            ProbeOutcome::Unhealthy(failing)
        }
    }
}
