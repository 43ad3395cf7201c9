//! In-place cluster upgrade: request, scheduling and progress monitoring.
//!
//! [`UpgradeMonitor`] drives one upgrade attempt through
//! `NotRequested -> Triggered -> InProgress -> {Completed, Failed}`. It never
//! schedules itself; callers invoke [`UpgradeMonitor::poll`] at their own cadence
//! or use [`UpgradeMonitor::wait`] for a bounded polling loop.

pub mod channel;
pub mod graph;
pub mod runner;
pub mod scheduler;
pub mod select;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use semver::Version;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{KeoError, Result};
use channel::{ChannelResolver, parse_version};
use graph::VersionGraph;
use scheduler::UpgradeScheduler;

pub use runner::{ClusterUpgrader, UpgradeOutcome, Upgrader};

/// Interval between reconciler resync attempts.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound on the whole reconciler resync.
pub const RESYNC_CEILING: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    NotRequested,
    Triggered,
    InProgress,
    Completed,
    Failed,
}

impl UpgradeState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Who carries out the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeSource {
    /// The provider's upgrade policy API, which enforces its own timing windows.
    Managed,
    /// An upgrade custom resource written directly to the cluster.
    Local,
}

impl std::fmt::Display for UpgradeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Managed => write!(f, "managed"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// One upgrade attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Normalized version, without the release prefix.
    pub desired_version: Option<String>,
    pub desired_image: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub source: UpgradeSource,
}

impl UpgradeRequest {
    /// Build a request, normalizing the release name.
    ///
    /// Fails when neither a release nor an image is supplied.
    pub fn new(
        release: Option<String>,
        image: Option<String>,
        source: UpgradeSource,
    ) -> Result<Self> {
        let desired_version = release
            .filter(|r| !r.trim().is_empty())
            .map(|r| parse_version(&r).map(|v| v.to_string()))
            .transpose()?;
        let desired_image = image.filter(|i| !i.trim().is_empty());

        if desired_version.is_none() && desired_image.is_none() {
            return Err(KeoError::UpgradeNotPossible(
                "no upgrade release or image supplied".to_string(),
            ));
        }

        Ok(Self {
            desired_version,
            desired_image,
            requested_at: Utc::now(),
            source,
        })
    }

    /// Human-readable target for logs.
    pub fn target(&self) -> &str {
        self.desired_version
            .as_deref()
            .or(self.desired_image.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPhase {
    Pending,
    Upgraded,
    Failed,
}

/// Snapshot of the on-cluster record of an upgrade attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeHistoryEntry {
    pub version: String,
    pub phase: HistoryPhase,
    pub start_time: Option<DateTime<Utc>>,
    pub condition_message: Option<String>,
}

/// On-cluster upgrade status and the reconciler that acts on it.
#[async_trait]
pub trait UpgradeStatusSource: Send + Sync {
    /// History entry for `version`, or the most recent entry when `version` is `None`.
    async fn history(&self, version: Option<&str>) -> Result<Option<UpgradeHistoryEntry>>;

    /// Re-apply the testing drain profile if the live one differs. Returns true if it was applied.
    async fn ensure_drain_override(&self) -> Result<bool>;

    /// Scale the upgrade reconciler deployment.
    async fn scale_reconciler(&self, replicas: i32) -> Result<()>;

    /// Ready replicas of the upgrade reconciler deployment.
    async fn reconciler_replicas(&self) -> Result<i32>;
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not done; carries a progress message.
    Pending(String),
    Completed,
    Failed(String),
}

impl PollOutcome {
    pub const fn is_done(&self) -> bool {
        !matches!(self, Self::Pending(_))
    }
}

/// Polling policy for one upgrade wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub max_duration: Duration,
    pub resync_interval: Duration,
    pub resync_ceiling: Duration,
}

impl MonitorSettings {
    pub const fn new(poll_interval: Duration, max_duration: Duration) -> Self {
        Self {
            poll_interval,
            max_duration,
            resync_interval: RESYNC_INTERVAL,
            resync_ceiling: RESYNC_CEILING,
        }
    }
}

/// Format the progress message for an entry that has not finished.
fn progress_message(entry: &UpgradeHistoryEntry) -> String {
    match &entry.condition_message {
        None => "current upgrade status is pending".to_string(),
        Some(message) => {
            let since = entry
                .start_time
                .map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339());
            format!("current upgrade status is \"{message}\" since \"{since}\"")
        }
    }
}

/// Drives and monitors one upgrade attempt.
pub struct UpgradeMonitor {
    cluster_id: String,
    install_version: Version,
    scheduler: Arc<dyn UpgradeScheduler>,
    status: Arc<dyn UpgradeStatusSource>,
    resolver: ChannelResolver,
    graph: Option<Arc<VersionGraph>>,
    settings: MonitorSettings,
    state: UpgradeState,
    request: Option<UpgradeRequest>,
}

impl UpgradeMonitor {
    pub fn new(
        cluster_id: &str,
        install_version: Version,
        scheduler: Arc<dyn UpgradeScheduler>,
        status: Arc<dyn UpgradeStatusSource>,
        resolver: ChannelResolver,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            install_version,
            scheduler,
            status,
            resolver,
            graph: None,
            settings,
            state: UpgradeState::NotRequested,
            request: None,
        }
    }

    /// Reject desired versions without a graph edge from the installed version.
    #[must_use]
    pub fn with_edge_validation(mut self, graph: Arc<VersionGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub const fn state(&self) -> UpgradeState {
        self.state
    }

    pub const fn request(&self) -> Option<&UpgradeRequest> {
        self.request.as_ref()
    }

    /// Submit `request` through the scheduler.
    pub async fn trigger(
        &mut self,
        request: UpgradeRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if request.desired_version.is_none() && request.desired_image.is_none() {
            return Err(KeoError::UpgradeNotPossible(
                "no upgrade release or image supplied".to_string(),
            ));
        }

        let channel = match &request.desired_version {
            Some(raw) => {
                let desired = parse_version(raw)?;
                let channel = self.resolver.resolve(&desired)?;
                if let Some(graph) = &self.graph
                    && !graph.edge_exists(&self.install_version, &desired).await?
                {
                    return Err(KeoError::UpgradeNotPossible(format!(
                        "no upgrade edge from {} to {} in channel {}",
                        self.install_version, desired, channel
                    )));
                }
                Some(channel)
            }
            None => None,
        };

        self.apply_drain_override().await;

        info!(
            "Triggering {} upgrade of cluster {} to {}",
            self.scheduler.source(),
            self.cluster_id,
            request.target()
        );
        self.scheduler.schedule(&request, channel.as_deref()).await?;
        self.state = UpgradeState::Triggered;
        self.request = Some(request);

        self.resync_reconciler(cancel).await;
        Ok(())
    }

    /// Move the outstanding upgrade to run at `at`.
    pub async fn reschedule(&self, at: DateTime<Utc>) -> Result<()> {
        self.scheduler.reschedule(at).await
    }

    async fn apply_drain_override(&self) {
        match self.status.ensure_drain_override().await {
            Ok(true) => info!("Re-applied upgrade drain override"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to apply upgrade drain override"),
        }
    }

    /// Restart the reconciler so it picks up the request without waiting for its resync period.
    async fn resync_reconciler(&self, cancel: &CancellationToken) {
        if let Err(e) = self.status.scale_reconciler(0).await {
            warn!(error = %e, "Failed to scale down upgrade reconciler");
            return;
        }

        let deadline = Instant::now() + self.settings.resync_ceiling;
        loop {
            match self.status.reconciler_replicas().await {
                Ok(0) => break,
                Ok(n) => debug!("Waiting for upgrade reconciler to scale down ({} ready)", n),
                Err(e) => debug!(error = %e, "Failed to read upgrade reconciler replicas"),
            }
            if Instant::now() + self.settings.resync_interval > deadline {
                warn!("Upgrade reconciler did not scale down in time");
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.resync_interval) => {}
            }
        }

        if let Err(e) = self.status.scale_reconciler(1).await {
            warn!(error = %e, "Failed to scale up upgrade reconciler");
        }
    }

    /// Check upgrade progress once.
    ///
    /// Transiently unreadable history is reported as pending. Any other read
    /// error fails the upgrade.
    pub async fn poll(&mut self) -> PollOutcome {
        let Some(request) = &self.request else {
            return PollOutcome::Failed("upgrade was never triggered".to_string());
        };
        let desired = request.desired_version.clone();

        let entry = match self.status.history(desired.as_deref()).await {
            Ok(entry) => entry,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Unable to read upgrade history");
                return PollOutcome::Pending(format!("error getting upgrade history: {e}"));
            }
            Err(e) => {
                error!(error = %e, "Upgrade history is unusable");
                self.state = UpgradeState::Failed;
                return PollOutcome::Failed(format!("error getting upgrade history: {e}"));
            }
        };

        self.apply_drain_override().await;

        let outcome = match entry {
            None => match self.scheduler.has_outstanding().await {
                Ok(true) => PollOutcome::Pending("upgrade yet to commence".to_string()),
                Ok(false) => PollOutcome::Failed(
                    "upgrade is no longer scheduled and no upgrade history was recorded"
                        .to_string(),
                ),
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Unable to check for an outstanding upgrade");
                    PollOutcome::Pending(format!("error checking upgrade schedule: {e}"))
                }
                Err(e) => PollOutcome::Failed(format!("error checking upgrade schedule: {e}")),
            },
            Some(entry) => match entry.phase {
                HistoryPhase::Failed => PollOutcome::Failed(
                    entry
                        .condition_message
                        .unwrap_or_else(|| format!("upgrade to {} failed", entry.version)),
                ),
                HistoryPhase::Upgraded
                    if desired.as_deref().is_none_or(|d| d == entry.version) =>
                {
                    PollOutcome::Completed
                }
                _ => PollOutcome::Pending(progress_message(&entry)),
            },
        };

        self.state = match &outcome {
            PollOutcome::Completed => UpgradeState::Completed,
            PollOutcome::Failed(_) => UpgradeState::Failed,
            PollOutcome::Pending(_) if self.state == UpgradeState::Triggered => {
                UpgradeState::InProgress
            }
            PollOutcome::Pending(_) => self.state,
        };
        outcome
    }

    /// Poll until the upgrade finishes, `max_duration` elapses or `cancel` fires.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(KeoError::Cancelled("upgrade".to_string()));
            }

            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(KeoError::Cancelled("upgrade".to_string())),
                outcome = self.poll() => outcome,
            };
            match outcome {
                PollOutcome::Completed => {
                    info!(
                        "Upgrade of cluster {} completed in {}s",
                        self.cluster_id,
                        started.elapsed().as_secs()
                    );
                    return Ok(());
                }
                PollOutcome::Failed(message) => {
                    self.state = UpgradeState::Failed;
                    return Err(KeoError::UpgradeFailed(message));
                }
                PollOutcome::Pending(message) => info!("Upgrade in progress: {}", message),
            }

            let remaining = self.settings.max_duration.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                self.state = UpgradeState::Failed;
                return Err(KeoError::Timeout(
                    self.settings.max_duration,
                    "upgrade".to_string(),
                ));
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(KeoError::Cancelled("upgrade".to_string())),
                () = tokio::time::sleep(self.settings.poll_interval.min(remaining)) => {}
            }
        }
    }
}
