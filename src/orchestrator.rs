//! Top-level run: provision, execute, report, analyze and always clean up.

pub mod types;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::{ClusterInfo, HealthStatus, properties};
use crate::error::Result;
use crate::upgrade::{UpgradeOutcome, Upgrader};

pub use types::*;

/// Supplies the cluster under test and disposes of it afterwards.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, cancel: &CancellationToken) -> Result<ClusterInfo>;
    async fn destroy(&self, cluster: &ClusterInfo) -> Result<()>;
    async fn kubeconfig(&self, cluster: &ClusterInfo) -> Result<Vec<u8>>;
    async fn health(&self, cluster: &ClusterInfo) -> Result<HealthStatus>;
}

/// Runs the workload against a cluster.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        target: &ExecutionTarget,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult>;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisResult>;
    fn should_analyze(&self, result: &ExecutionResult) -> bool;
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn report(&self, input: &ReportInput) -> Result<()>;
    async fn finalize(&self) -> Result<()>;
}

/// Receives run events. Called from the orchestrator's own task only.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn record(&self, event: Event);
    async fn flush(&self, cluster_id: &str) -> Result<()>;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Sequences one run. Cleanup runs exactly once after a successful provision.
pub struct Orchestrator {
    provisioner: Arc<dyn Provisioner>,
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn Reporter>,
    events: Arc<dyn EventSink>,
    analyzer: Option<Arc<dyn Analyzer>>,
    upgrader: Option<Arc<dyn Upgrader>>,
    artifacts_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        executor: Arc<dyn Executor>,
        reporter: Arc<dyn Reporter>,
        events: Arc<dyn EventSink>,
        artifacts_dir: PathBuf,
    ) -> Self {
        Self {
            provisioner,
            executor,
            reporter,
            events,
            analyzer: None,
            upgrader: None,
            artifacts_dir,
        }
    }

    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    #[must_use]
    pub fn with_upgrader(mut self, upgrader: Arc<dyn Upgrader>) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    /// Run every phase and return the final outcome. Never panics.
    pub async fn run(&self, cancel: &CancellationToken) -> OrchestratorResult {
        let mut result = OrchestratorResult {
            exit_code: FAILURE_EXIT_CODE,
            ..Default::default()
        };

        let provisioned = AssertUnwindSafe(self.provisioner.provision(cancel))
            .catch_unwind()
            .await;
        let mut cluster = match provisioned {
            Ok(Ok(cluster)) => cluster,
            Ok(Err(e)) => {
                error!(error = %e, "Provisioning failed, aborting run");
                self.events.record(Event::InstallFailed);
                result.errors.push(format!("provision: {e}"));
                return result;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Provisioning panicked: {}", message);
                self.events.record(Event::InstallFailed);
                result.errors.push(format!("provision panicked: {message}"));
                return result;
            }
        };
        self.events.record(Event::InstallSuccessful);
        result.cluster_id.clone_from(&cluster.id);
        info!("Cluster ready: {}", cluster);

        match self.reporter.initialize().await {
            Ok(()) => {
                let body = AssertUnwindSafe(self.run_phases(&cluster, &mut result, cancel))
                    .catch_unwind()
                    .await;
                if let Err(panic) = body {
                    let message = panic_message(panic.as_ref());
                    error!("Run panicked: {}", message);
                    result.tests_passed = false;
                    result.errors.push(format!("panicked: {message}"));
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize reporting");
                result.errors.push(format!("reporter initialize: {e}"));
            }
        }

        if cancel.is_cancelled() {
            warn!("Run cancelled, cleaning up");
            result.tests_passed = false;
            result.errors.push("run cancelled".to_string());
        }

        self.cleanup(&mut cluster, &result).await;

        if result.succeeded() {
            result.exit_code = SUCCESS_EXIT_CODE;
        }
        info!(
            exit_code = result.exit_code,
            tests_passed = result.tests_passed,
            upgrade_passed = ?result.upgrade_passed,
            "Run finished"
        );
        result
    }

    async fn run_phases(
        &self,
        cluster: &ClusterInfo,
        result: &mut OrchestratorResult,
        cancel: &CancellationToken,
    ) {
        let install = self.run_workload(cluster, TestPhase::Install, result, cancel).await;
        result.tests_passed = install;

        let Some(upgrader) = &self.upgrader else {
            return;
        };
        if !install {
            warn!("Pre-upgrade workload failed, skipping upgrade");
            result.upgrade_passed = Some(false);
            result
                .errors
                .push("upgrade skipped: pre-upgrade workload failed".to_string());
            return;
        }

        match upgrader.upgrade(cluster, cancel).await {
            Ok(UpgradeOutcome::Skipped(reason)) => {
                info!("Upgrade skipped: {}", reason);
            }
            Ok(UpgradeOutcome::Completed { version }) => {
                info!("Upgrade to {} passed", version);
                self.events.record(Event::UpgradeSuccessful);
                result.upgrade_passed = Some(true);
                let upgraded =
                    self.run_workload(cluster, TestPhase::Upgrade, result, cancel).await;
                result.tests_passed = result.tests_passed && upgraded;
            }
            Err(e) => {
                error!(error = %e, "Upgrade failed");
                self.events.record(Event::UpgradeFailed);
                result.upgrade_passed = Some(false);
                result.errors.push(format!("upgrade: {e}"));
            }
        }
    }

    /// Execute, report and analyze one phase. Returns whether the workload passed.
    async fn run_workload(
        &self,
        cluster: &ClusterInfo,
        phase: TestPhase,
        result: &mut OrchestratorResult,
        cancel: &CancellationToken,
    ) -> bool {
        let artifacts_dir = self.artifacts_dir.join(phase.as_str());
        let mut errors = Vec::new();

        let execution = match self.provisioner.kubeconfig(cluster).await {
            Ok(kubeconfig) => {
                let target = ExecutionTarget {
                    cluster: cluster.clone(),
                    kubeconfig,
                    phase,
                    artifacts_dir: artifacts_dir.clone(),
                };
                info!("Executing {} workload", phase);
                self.executor.execute(&target, cancel).await
            }
            Err(e) => Err(e),
        };
        let execution = match execution {
            Ok(execution) => Some(execution),
            Err(e) => {
                error!(error = %e, "{} workload did not produce a result", phase);
                errors.push(format!("execute: {e}"));
                None
            }
        };

        let passed = execution.as_ref().is_some_and(|r| r.success);
        self.events.record(if passed {
            Event::TestsPassed
        } else {
            Event::TestsFailed
        });

        let mut input = ReportInput {
            cluster: cluster.clone(),
            phase,
            result: execution.clone(),
            analysis: None,
            errors: errors.clone(),
        };
        if let Err(e) = self.reporter.report(&input).await {
            warn!(error = %e, "Failed to report {} results", phase);
        }

        if let Some(analyzer) = &self.analyzer {
            let subject = execution.unwrap_or_else(|| {
                ExecutionResult::failed(errors.first().map_or("no result", String::as_str))
            });
            if analyzer.should_analyze(&subject) {
                let analysis_input = AnalysisInput {
                    cluster: cluster.clone(),
                    phase,
                    result: subject,
                    artifacts_dir,
                };
                match analyzer.analyze(&analysis_input).await {
                    Ok(analysis) => {
                        self.events.record(Event::AnalysisRun);
                        input.analysis = Some(analysis);
                        if let Err(e) = self.reporter.report(&input).await {
                            warn!(error = %e, "Failed to report {} analysis", phase);
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to analyze {} results", phase),
                }
            }
        }

        result.errors.extend(errors);
        passed
    }

    /// Failures here are warnings and never the primary failure reason.
    async fn cleanup(&self, cluster: &mut ClusterInfo, result: &OrchestratorResult) {
        cluster.properties.insert(
            properties::PASSING.to_string(),
            serde_json::Value::Bool(result.succeeded()),
        );

        if let Err(e) = self.provisioner.destroy(cluster).await {
            warn!(error = %e, "Failed to clean up cluster {}", cluster.id);
        }
        if let Err(e) = self.events.flush(&cluster.id).await {
            warn!(error = %e, "Failed to write run events");
        }
        if let Err(e) = self.reporter.finalize().await {
            warn!(error = %e, "Failed to finalize reporting");
        }
    }
}
