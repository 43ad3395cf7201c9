//! Values passed between orchestrator phases.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterInfo;

pub const SUCCESS_EXIT_CODE: i32 = 0;
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Which workload run a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    Install,
    Upgrade,
}

impl TestPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
        }
    }
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to run the workload.
#[derive(Debug, Clone)]
pub struct ExecutionTarget {
    pub cluster: ClusterInfo,
    pub kubeconfig: Vec<u8>,
    pub phase: TestPhase,
    /// Directory the workload writes logs and its summary into.
    pub artifacts_dir: PathBuf,
}

/// Test counts. Read from the workload's `summary.json` when it writes one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Outcome of one workload run. Read-only once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub summary: ResultSummary,
    pub artifacts: Vec<PathBuf>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ExecutionResult {
    /// Stand-in for a run that produced no result, so analysis still sees a failure.
    pub fn failed(message: &str) -> Self {
        Self {
            success: false,
            summary: ResultSummary {
                total: 1,
                failed: 1,
                errors: vec![message.to_string()],
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub cluster: ClusterInfo,
    pub phase: TestPhase,
    pub result: ExecutionResult,
    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub findings: Vec<String>,
}

/// Everything a reporter needs for one phase.
#[derive(Debug, Clone, Serialize)]
pub struct ReportInput {
    pub cluster: ClusterInfo,
    pub phase: TestPhase,
    pub result: Option<ExecutionResult>,
    pub analysis: Option<AnalysisResult>,
    pub errors: Vec<String>,
}

impl ReportInput {
    pub fn passed(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.success)
    }
}

/// Final outcome of a run. Owned and mutated by the orchestrator only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorResult {
    pub exit_code: i32,
    pub cluster_id: String,
    pub tests_passed: bool,
    /// `None` when no upgrade was attempted.
    pub upgrade_passed: Option<bool>,
    pub errors: Vec<String>,
}

impl OrchestratorResult {
    /// Success requires passing tests and, when attempted, a passing upgrade.
    pub const fn succeeded(&self) -> bool {
        self.tests_passed && !matches!(self.upgrade_passed, Some(false))
    }
}

/// Named events counted over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    InstallSuccessful,
    InstallFailed,
    UpgradeSuccessful,
    UpgradeFailed,
    TestsPassed,
    TestsFailed,
    AnalysisRun,
}

impl Event {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InstallSuccessful => "install-successful",
            Self::InstallFailed => "install-failed",
            Self::UpgradeSuccessful => "upgrade-successful",
            Self::UpgradeFailed => "upgrade-failed",
            Self::TestsPassed => "tests-passed",
            Self::TestsFailed => "tests-failed",
            Self::AnalysisRun => "analysis-run",
        }
    }
}
