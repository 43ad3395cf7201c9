//! Cluster readiness wait.
//!
//! Polls the provider until the cluster reports ready, then polls the composite
//! health probe until a quorum of consecutive clean runs is observed. Probe results
//! that are merely unhealthy reset the quorum; probe results that could not be
//! produced count toward the error window and abort the wait once it fills.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::{HealthPhase, properties};
use crate::error::ReadinessError;
use crate::health::{HealthProbe, ProbeOutcome};
use crate::provider::ClusterManager;

/// Polling policy for one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub clean_runs_needed: u32,
    pub error_window: u32,
    pub skip: bool,
}

/// Consecutive clean runs and consecutive probe errors for one wait.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanRunCounter {
    pub consecutive_clean: u32,
    pub consecutive_errors: u32,
}

impl CleanRunCounter {
    pub fn record_healthy(&mut self) -> u32 {
        self.consecutive_clean += 1;
        self.consecutive_errors = 0;
        self.consecutive_clean
    }

    pub fn record_unhealthy(&mut self) {
        self.consecutive_clean = 0;
        self.consecutive_errors = 0;
    }

    pub fn record_error(&mut self) -> u32 {
        self.consecutive_clean = 0;
        self.consecutive_errors += 1;
        self.consecutive_errors
    }
}

/// Summary of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyReport {
    pub polls: u32,
    pub probes: u32,
    pub clean_runs: u32,
    pub elapsed: Duration,
    pub skipped: bool,
}

/// Waits for a cluster to become ready and healthy.
pub struct ReadinessMonitor {
    provider: Arc<dyn ClusterManager>,
    config: ReadinessConfig,
    phase: HealthPhase,
}

impl ReadinessMonitor {
    pub fn new(
        provider: Arc<dyn ClusterManager>,
        config: ReadinessConfig,
        phase: HealthPhase,
    ) -> Self {
        Self {
            provider,
            config,
            phase,
        }
    }

    /// Set the cluster `Status` property. Failures are logged only and
    /// cancellation abandons the call.
    async fn annotate(&self, cluster_id: &str, status: &str, cancel: &CancellationToken) {
        let call = self.provider.add_property(cluster_id, properties::STATUS, status);
        let result = tokio::select! {
            () = cancel.cancelled() => return,
            r = call => r,
        };
        if let Err(e) = result {
            warn!(
                cluster_id,
                status,
                error = %e,
                "Failed to annotate cluster status"
            );
        }
    }

    pub async fn wait(
        &self,
        cluster_id: &str,
        probe: &dyn HealthProbe,
        cancel: &CancellationToken,
    ) -> Result<ReadyReport, ReadinessError> {
        let started = Instant::now();
        if self.config.skip {
            info!(cluster_id, "Skipping health checks");
            return Ok(ReadyReport {
                polls: 0,
                probes: 0,
                clean_runs: 0,
                elapsed: Duration::ZERO,
                skipped: true,
            });
        }

        info!(
            cluster_id,
            timeout_secs = self.config.timeout.as_secs(),
            clean_runs_needed = self.config.clean_runs_needed,
            error_window = self.config.error_window,
            "Waiting for cluster to be ready"
        );

        let mut counter = CleanRunCounter::default();
        let mut polls = 0u32;
        let mut probes = 0u32;
        let mut ready_seen = false;
        let mut last_status: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ReadinessError::Cancelled);
            }
            polls += 1;

            let fetched = tokio::select! {
                () = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                r = self.provider.get_cluster(cluster_id) => r,
            };
            let snapshot = fetched.map_err(|e| {
                error!(cluster_id, error = %e, "Failed fetching cluster from provider");
                ReadinessError::ProviderUnavailable {
                    cluster_id: cluster_id.to_string(),
                    message: e.to_string(),
                }
            })?;

            if snapshot.state.is_error() {
                error!(cluster_id, "Cluster is in error state");
                self.annotate(cluster_id, self.phase.unhealthy_status(), cancel).await;
                return Err(ReadinessError::ClusterErrorState(cluster_id.to_string()));
            }

            if polls == 1
                && snapshot.properties.get(properties::STATUS).map(String::as_str)
                    == Some(properties::STATUS_PROVISIONING)
            {
                self.annotate(cluster_id, properties::STATUS_WAITING_FOR_READY, cancel).await;
            }

            if snapshot.state.is_ready() {
                if !ready_seen {
                    ready_seen = true;
                    info!(cluster_id, "Cluster reports ready, starting health checks");
                    let status = self.phase.checking_status();
                    self.annotate(cluster_id, status, cancel).await;
                    last_status = Some(status.to_string());
                }

                probes += 1;
                let outcome = tokio::select! {
                    () = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                    outcome = probe.probe() => outcome,
                };
                match outcome {
                    ProbeOutcome::Healthy => {
                        let clean = counter.record_healthy();
                        info!(
                            cluster_id,
                            "Clean run {}/{}", clean, self.config.clean_runs_needed
                        );
                        if clean >= self.config.clean_runs_needed {
                            self.annotate(cluster_id, self.phase.healthy_status(), cancel).await;
                            let elapsed = started.elapsed();
                            info!(
                                cluster_id,
                                elapsed_secs = elapsed.as_secs(),
                                "Cluster is healthy"
                            );
                            return Ok(ReadyReport {
                                polls,
                                probes,
                                clean_runs: clean,
                                elapsed,
                                skipped: false,
                            });
                        }
                    }
                    ProbeOutcome::Unhealthy(failing) => {
                        counter.record_unhealthy();
                        let joined = failing.join(",");
                        info!(cluster_id, failing = %joined, "Cluster is not healthy yet");
                        if last_status.as_deref() != Some(joined.as_str()) {
                            self.annotate(cluster_id, &joined, cancel).await;
                            last_status = Some(joined);
                        }
                    }
                    ProbeOutcome::Error(message) => {
                        let errors = counter.record_error();
                        warn!(
                            cluster_id,
                            "Health check error {}/{}: {}",
                            errors,
                            self.config.error_window,
                            message
                        );
                        if errors >= self.config.error_window {
                            error!(cluster_id, errors, "Health check error window exhausted");
                            self.annotate(cluster_id, self.phase.unhealthy_status(), cancel).await;
                            return Err(ReadinessError::HealthCheckEscalation {
                                errors,
                                last_error: message,
                            });
                        }
                    }
                }
            } else {
                info!(cluster_id, state = %snapshot.state, "Cluster is not ready yet");
            }

            let elapsed = started.elapsed();
            let remaining = self.config.timeout.saturating_sub(elapsed);
            if remaining.is_zero() {
                error!(
                    cluster_id,
                    elapsed_secs = elapsed.as_secs(),
                    "Timed out waiting for cluster"
                );
                return Err(ReadinessError::Timeout {
                    waited: elapsed,
                    clean_runs: counter.consecutive_clean,
                    needed: self.config.clean_runs_needed,
                });
            }

            let delay = self.config.poll_interval.min(remaining);
            debug!(cluster_id, delay_secs = delay.as_secs(), "Sleeping before next poll");
            tokio::select! {
                () = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
