//! Slack run summary via Incoming Webhooks.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::Result;
use crate::orchestrator::{ReportInput, Reporter};

/// Structured Slack message for Block Kit rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackMessage {
    pub header: String,
    pub fields: Vec<(String, String)>,
    pub context: String,
}

/// Buffers the latest report per phase and posts one summary at finalize.
pub struct SlackReporter {
    webhook_url: String,
    client: reqwest::Client,
    reports: Mutex<Vec<ReportInput>>,
}

impl SlackReporter {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
            reports: Mutex::new(Vec::new()),
        }
    }

    fn take_reports(&self) -> Vec<ReportInput> {
        self.reports
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }

    /// Post a Block Kit message. Errors are logged but not propagated.
    pub async fn send(&self, cluster_id: &str, message: &SlackMessage) {
        let payload = build_blocks_payload(message);
        match self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) if !resp.status().is_success() => {
                warn!(
                    cluster = cluster_id,
                    status = %resp.status(),
                    "Slack webhook returned non-success status"
                );
            }
            Err(e) => {
                warn!(cluster = cluster_id, error = %e, "Failed to send Slack summary");
            }
            Ok(_) => {
                info!(
                    cluster = cluster_id,
                    header = message.header.as_str(),
                    "Slack summary sent"
                );
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

/// Summary message for the reports of one run, in phase order.
pub fn build_run_message(reports: &[ReportInput]) -> SlackMessage {
    let passed = !reports.is_empty() && reports.iter().all(ReportInput::passed);
    let cluster = reports.first().map(|r| &r.cluster);
    let name = cluster.map_or("unknown", |c| {
        if c.name.is_empty() { c.id.as_str() } else { c.name.as_str() }
    });

    let header = if passed {
        format!("E2E passed on {name}")
    } else {
        format!("E2E failed on {name}")
    };

    let mut fields = Vec::new();
    if let Some(cluster) = cluster {
        fields.push(("Cluster".to_string(), format!("`{}`", cluster.id)));
        if !cluster.version.is_empty() {
            fields.push(("Version".to_string(), format!("`{}`", cluster.version)));
        }
    }
    for report in reports {
        let label = format!("{} tests", capitalize(report.phase.as_str()));
        let value = report.result.as_ref().map_or_else(
            || "no result".to_string(),
            |r| {
                format!(
                    "{} passed / {} failed of {}",
                    r.summary.passed, r.summary.failed, r.summary.total
                )
            },
        );
        fields.push((label, value));
        if let Some(analysis) = &report.analysis {
            fields.push((
                format!("{} analysis", capitalize(report.phase.as_str())),
                analysis.summary.clone(),
            ));
        }
        if !report.errors.is_empty() {
            fields.push((
                format!("{} errors", capitalize(report.phase.as_str())),
                report.errors.join("\n"),
            ));
        }
    }

    SlackMessage {
        header,
        fields,
        context: format!("Sent by keo {}", crate::VERSION),
    }
}

/// Build a Slack Block Kit payload from a [`SlackMessage`].
fn build_blocks_payload(message: &SlackMessage) -> Value {
    let mut blocks: Vec<Value> = vec![json!({
        "type": "header",
        "text": {
            "type": "plain_text",
            "text": message.header,
            "emoji": true
        }
    })];

    let fields: Vec<Value> = message
        .fields
        .iter()
        .map(|(label, value)| {
            json!({
                "type": "mrkdwn",
                "text": format!("*{label}*\n{value}")
            })
        })
        .collect();
    // Slack allows at most 10 fields per section.
    for chunk in fields.chunks(10) {
        blocks.push(json!({
            "type": "section",
            "fields": chunk
        }));
    }

    blocks.push(json!({"type": "divider"}));
    blocks.push(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": message.context
        }]
    }));

    json!({
        "text": format!("{}\n{}", message.header, message.context),
        "blocks": blocks
    })
}

#[async_trait]
impl Reporter for SlackReporter {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn report(&self, input: &ReportInput) -> Result<()> {
        if let Ok(mut reports) = self.reports.lock() {
            reports.retain(|r| r.phase != input.phase);
            reports.push(input.clone());
        }
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let reports = self.take_reports();
        if reports.is_empty() {
            info!("No reports to send to Slack");
            return Ok(());
        }
        let cluster_id = reports[0].cluster.id.clone();
        self.send(&cluster_id, &build_run_message(&reports)).await;
        Ok(())
    }
}
