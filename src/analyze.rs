//! Failure analysis over a run's artifacts.
//!
//! Collects failing-test messages from the result summary and error lines
//! from the workload logs, so a failed run carries a short explanation.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::orchestrator::{AnalysisInput, AnalysisResult, Analyzer, ExecutionResult};

/// Upper bound on findings kept per analysis.
pub const MAX_FINDINGS: usize = 20;
const MAX_LINE_LEN: usize = 300;
const ERROR_MARKERS: &[&str] = &["error", "fail", "panic", "timed out"];

pub struct FailureAnalyzer {
    max_findings: usize,
}

impl Default for FailureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureAnalyzer {
    pub const fn new() -> Self {
        Self {
            max_findings: MAX_FINDINGS,
        }
    }

    #[must_use]
    pub const fn with_max_findings(mut self, max: usize) -> Self {
        self.max_findings = max;
        self
    }
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    ERROR_MARKERS.iter().any(|m| lower.contains(m))
}

fn truncate(line: &str) -> String {
    let line = line.trim();
    if line.chars().count() <= MAX_LINE_LEN {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(MAX_LINE_LEN).collect();
    cut.push_str("...");
    cut
}

/// Error lines from every `*.log` file directly under `dir`, in file name order.
async fn log_findings(dir: &Path, limit: usize) -> Result<Vec<String>> {
    let mut logs = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "log") {
            logs.push(path);
        }
    }
    logs.sort();

    let mut findings = Vec::new();
    for path in logs {
        let body = match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!("Skipping unreadable log {}: {}", path.display(), e);
                continue;
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for line in body.lines().filter(|l| is_error_line(l)) {
            if findings.len() >= limit {
                return Ok(findings);
            }
            findings.push(format!("{name}: {}", truncate(line)));
        }
    }
    Ok(findings)
}

#[async_trait]
impl Analyzer for FailureAnalyzer {
    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisResult> {
        let summary = &input.result.summary;
        let mut findings: Vec<String> = summary
            .errors
            .iter()
            .take(self.max_findings)
            .map(|e| truncate(e))
            .collect();

        let remaining = self.max_findings.saturating_sub(findings.len());
        findings.extend(log_findings(&input.artifacts_dir, remaining).await?);

        let headline = format!(
            "{} phase on cluster {}: {} of {} tests failed",
            input.phase, input.cluster.id, summary.failed, summary.total
        );
        let summary = match findings.first() {
            Some(first) => format!("{headline}. First finding: {first}"),
            None => format!("{headline}. No error output was found in the artifacts"),
        };
        info!(phase = %input.phase, findings = findings.len(), "Analysis complete");

        Ok(AnalysisResult { summary, findings })
    }

    fn should_analyze(&self, result: &ExecutionResult) -> bool {
        !result.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterInfo;
    use crate::orchestrator::{ResultSummary, TestPhase};

    fn input(dir: &Path, errors: Vec<String>) -> AnalysisInput {
        AnalysisInput {
            cluster: ClusterInfo {
                id: "abc123".into(),
                ..Default::default()
            },
            phase: TestPhase::Upgrade,
            result: ExecutionResult {
                success: false,
                summary: ResultSummary {
                    total: 5,
                    failed: 2,
                    errors,
                    ..Default::default()
                },
                ..Default::default()
            },
            artifacts_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_should_analyze_only_failures() {
        let analyzer = FailureAnalyzer::new();
        assert!(analyzer.should_analyze(&ExecutionResult::failed("boom")));
        assert!(!analyzer.should_analyze(&ExecutionResult {
            success: true,
            ..Default::default()
        }));
    }

    #[tokio::test]
    async fn test_analyze_collects_summary_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("test-output.log"),
            "starting\nERROR: pod web-1 crashlooping\nok\nnode drain Failed\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "error in ignored file\n").unwrap();

        let result = FailureAnalyzer::new()
            .analyze(&input(dir.path(), vec!["route not admitted".into()]))
            .await
            .unwrap();

        assert_eq!(
            result.findings,
            vec![
                "route not admitted".to_string(),
                "test-output.log: ERROR: pod web-1 crashlooping".to_string(),
                "test-output.log: node drain Failed".to_string(),
            ]
        );
        assert!(result.summary.contains("2 of 5 tests failed"));
        assert!(result.summary.contains("route not admitted"));
    }

    #[tokio::test]
    async fn test_analyze_caps_findings() {
        let dir = tempfile::tempdir().unwrap();
        let log: String = (0..50).map(|i| format!("error {i}\n")).collect();
        std::fs::write(dir.path().join("a.log"), log).unwrap();

        let result = FailureAnalyzer::new()
            .with_max_findings(5)
            .analyze(&input(dir.path(), vec!["first".into()]))
            .await
            .unwrap();
        assert_eq!(result.findings.len(), 5);
        assert_eq!(result.findings[0], "first");
    }

    #[tokio::test]
    async fn test_analyze_missing_artifacts_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = FailureAnalyzer::new()
            .analyze(&input(&dir.path().join("missing"), vec![]))
            .await
            .unwrap();
        assert!(result.findings.is_empty());
        assert!(result.summary.contains("No error output"));
    }

    #[test]
    fn test_truncate_long_line() {
        let line = "x".repeat(400);
        let cut = truncate(&line);
        assert_eq!(cut.chars().count(), MAX_LINE_LEN + 3);
        assert!(cut.ends_with("..."));
    }
}
