//! Workload execution through an external command.
//!
//! The command runs under `sh -c` with `KUBECONFIG` pointing at the cluster's
//! kubeconfig, `ARTIFACTS` at the phase directory and `TEST_PHASE` set to the
//! phase name. Output goes to `test-output.log` in the artifacts directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{KeoError, Result};
use crate::orchestrator::{ExecutionResult, ExecutionTarget, Executor, ResultSummary};

pub const SUMMARY_FILE: &str = "summary.json";
pub const OUTPUT_FILE: &str = "test-output.log";
const KUBECONFIG_FILE: &str = "kubeconfig";

pub struct CommandExecutor {
    command: Option<String>,
}

impl CommandExecutor {
    pub const fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

/// Summary written by the workload, or a single synthetic case following the exit status.
async fn read_summary(dir: &Path, exited_ok: bool) -> ResultSummary {
    let path = dir.join(SUMMARY_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => match serde_json::from_str::<ResultSummary>(&body) {
            Ok(summary) => return summary,
            Err(e) => warn!(error = %e, "Ignoring malformed {}", path.display()),
        },
        Err(e) => debug!("No workload summary at {}: {}", path.display(), e),
    }

    ResultSummary {
        total: 1,
        passed: u32::from(exited_ok),
        failed: u32::from(!exited_ok),
        ..Default::default()
    }
}

async fn collect_artifacts(dir: &Path) -> Vec<PathBuf> {
    let mut artifacts = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return artifacts;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.file_name().is_some_and(|n| n != KUBECONFIG_FILE) {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    artifacts
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(
        &self,
        target: &ExecutionTarget,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let command = self
            .command
            .as_deref()
            .ok_or_else(|| KeoError::Config("no test command configured".to_string()))?;

        let dir = &target.artifacts_dir;
        tokio::fs::create_dir_all(dir).await?;
        let kubeconfig_path = dir.join(KUBECONFIG_FILE);
        tokio::fs::write(&kubeconfig_path, &target.kubeconfig).await?;

        let output = tokio::fs::File::create(dir.join(OUTPUT_FILE))
            .await?
            .into_std()
            .await;
        let errors = output.try_clone()?;

        info!(phase = %target.phase, "Running workload: {}", command);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("KUBECONFIG", &kubeconfig_path)
            .env("ARTIFACTS", dir)
            .env("TEST_PHASE", target.phase.as_str())
            .env("CLUSTER_ID", &target.cluster.id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::from(errors))
            .kill_on_drop(true)
            .spawn()?;

        let exited = tokio::select! {
            status = child.wait() => Some(status?),
            () = cancel.cancelled() => None,
        };
        let Some(status) = exited else {
            warn!("Cancelled, stopping workload");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to stop workload");
            }
            return Err(KeoError::Cancelled(format!("{} workload", target.phase)));
        };

        let summary = read_summary(dir, status.success()).await;
        let success = status.success() && summary.failed == 0;
        info!(
            phase = %target.phase,
            exit_code = status.code(),
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "Workload finished"
        );

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("exitCode".to_string(), serde_json::json!(status.code()));
        metadata.insert("phase".to_string(), serde_json::json!(target.phase.as_str()));

        Ok(ExecutionResult {
            success,
            summary,
            artifacts: collect_artifacts(dir).await,
            metadata,
        })
    }
}
