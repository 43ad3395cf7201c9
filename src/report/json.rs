//! JSON report files.
//!
//! Layout under the report directory:
//!
//! ```text
//! <report_dir>/<phase>/report.json
//! <report_dir>/<phase>/analysis.json   (only when analysis ran)
//! <report_dir>/run-summary.json        (written at finalize)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{KeoError, Result};
use crate::orchestrator::{ReportInput, Reporter, TestPhase};

pub const REPORT_FILE: &str = "report.json";
pub const ANALYSIS_FILE: &str = "analysis.json";
pub const RUN_SUMMARY_FILE: &str = "run-summary.json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PhaseSummary {
    phase: TestPhase,
    passed: bool,
    total: u32,
    failed: u32,
    errors: Vec<String>,
    analysis: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary<'a> {
    version: &'a str,
    cluster_id: Option<String>,
    generated_at: String,
    phases: &'a [PhaseSummary],
}

pub struct JsonReporter {
    report_dir: PathBuf,
    phases: Mutex<Vec<(String, PhaseSummary)>>,
}

impl JsonReporter {
    pub fn new(report_dir: PathBuf) -> Self {
        Self {
            report_dir,
            phases: Mutex::new(Vec::new()),
        }
    }

    pub fn phase_dir(&self, phase: TestPhase) -> PathBuf {
        self.report_dir.join(phase.as_str())
    }

    fn remember(&self, input: &ReportInput) -> Result<()> {
        let summary = PhaseSummary {
            phase: input.phase,
            passed: input.passed(),
            total: input.result.as_ref().map_or(0, |r| r.summary.total),
            failed: input.result.as_ref().map_or(0, |r| r.summary.failed),
            errors: input.errors.clone(),
            analysis: input.analysis.as_ref().map(|a| a.summary.clone()),
        };
        let mut phases = self
            .phases
            .lock()
            .map_err(|_| KeoError::Report("report state poisoned".to_string()))?;
        // A second report for the same phase carries the analysis and replaces the first.
        phases.retain(|(_, p)| p.phase != input.phase);
        phases.push((input.cluster.id.clone(), summary));
        Ok(())
    }
}

async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| KeoError::Report(format!("Failed to serialize {}: {e}", path.display())))?;
    tokio::fs::write(path, body).await?;
    debug!("Wrote {}", path.display());
    Ok(())
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.report_dir).await?;
        info!("Writing reports to {}", self.report_dir.display());
        Ok(())
    }

    async fn report(&self, input: &ReportInput) -> Result<()> {
        let dir = self.phase_dir(input.phase);
        tokio::fs::create_dir_all(&dir).await?;
        write_json(&dir.join(REPORT_FILE), input).await?;
        if let Some(analysis) = &input.analysis {
            write_json(&dir.join(ANALYSIS_FILE), analysis).await?;
        }
        self.remember(input)
    }

    async fn finalize(&self) -> Result<()> {
        let (cluster_id, phases) = {
            let mut guard = self
                .phases
                .lock()
                .map_err(|_| KeoError::Report("report state poisoned".to_string()))?;
            let entries = std::mem::take(&mut *guard);
            let cluster_id = entries.first().map(|(id, _)| id.clone());
            let phases: Vec<PhaseSummary> = entries.into_iter().map(|(_, p)| p).collect();
            (cluster_id, phases)
        };

        let summary = RunSummary {
            version: crate::VERSION,
            cluster_id,
            generated_at: chrono::Utc::now().to_rfc3339(),
            phases: &phases,
        };
        tokio::fs::create_dir_all(&self.report_dir).await?;
        let path = self.report_dir.join(RUN_SUMMARY_FILE);
        write_json(&path, &summary).await?;
        info!(phases = phases.len(), "Wrote run summary to {}", path.display());
        Ok(())
    }
}
