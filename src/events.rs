//! Run event sinks.

use std::path::PathBuf;

use async_trait::async_trait;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use tracing::{debug, info};

use crate::error::{KeoError, Result};
use crate::orchestrator::{Event, EventSink};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    pub event: String,
}

/// Counts events in a prometheus registry and writes it out as text on flush.
pub struct MetricsSink {
    registry: Registry,
    events_total: Family<EventLabels, Counter>,
    report_dir: PathBuf,
}

impl MetricsSink {
    pub fn new(report_dir: PathBuf) -> Self {
        let mut registry = Registry::default();
        let events_total = Family::<EventLabels, Counter>::default();
        registry.register(
            "keo_event",
            "Total number of run events by name",
            events_total.clone(),
        );
        Self {
            registry,
            events_total,
            report_dir,
        }
    }

    /// File the registry is written to for `cluster_id`.
    pub fn metrics_path(&self, cluster_id: &str) -> PathBuf {
        self.report_dir
            .join(format!("{cluster_id}.events.metrics.prom"))
    }

    /// Encode the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)
            .map_err(|e| KeoError::Report(format!("Failed to encode event metrics: {e}")))?;
        Ok(buf)
    }
}

#[async_trait]
impl EventSink for MetricsSink {
    fn record(&self, event: Event) {
        debug!("Recording event {}", event.as_str());
        self.events_total
            .get_or_create(&EventLabels {
                event: event.as_str().to_string(),
            })
            .inc();
    }

    async fn flush(&self, cluster_id: &str) -> Result<()> {
        let path = self.metrics_path(cluster_id);
        let body = self.encode()?;
        tokio::fs::create_dir_all(&self.report_dir).await?;
        tokio::fs::write(&path, body).await?;
        info!("Wrote event metrics to {}", path.display());
        Ok(())
    }
}

/// Discards events.
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    fn record(&self, _event: Event) {}

    async fn flush(&self, _cluster_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_encoding() {
        let sink = MetricsSink::new(PathBuf::from("/unused"));
        sink.record(Event::InstallSuccessful);
        sink.record(Event::TestsFailed);
        sink.record(Event::TestsFailed);

        let buf = sink.encode().unwrap();
        assert!(buf.contains("keo_event_total"));
        assert!(buf.contains(r#"event="install-successful"} 1"#));
        assert!(buf.contains(r#"event="tests-failed"} 2"#));
    }

    #[tokio::test]
    async fn test_flush_writes_cluster_file() {
        let dir = tempfile::tempdir().unwrap();
        let report_dir = dir.path().join("reports");
        let sink = MetricsSink::new(report_dir.clone());
        sink.record(Event::UpgradeSuccessful);

        sink.flush("abc123").await.unwrap();
        let written =
            std::fs::read_to_string(report_dir.join("abc123.events.metrics.prom")).unwrap();
        assert!(written.contains("upgrade-successful"));
    }

    #[tokio::test]
    async fn test_flush_fails_when_report_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let report_dir = dir.path().join("reports");
        std::fs::write(&report_dir, "not a directory").unwrap();
        let sink = MetricsSink::new(report_dir);
        sink.record(Event::InstallSuccessful);

        assert!(matches!(sink.flush("abc123").await, Err(KeoError::Io(_))));
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoopSink;
        sink.record(Event::AnalysisRun);
        assert!(sink.flush("abc123").await.is_ok());
    }
}
