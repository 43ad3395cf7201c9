//! CLI configuration and argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use secrecy::SecretString;

use crate::error::{KeoError, Result};
use crate::readiness::ReadinessConfig;
use crate::{BUILD_DATE, COMMIT, VERSION};

/// Scheduling path for an upgrade request.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeSourceArg {
    /// Delegate to the cluster-management provider's upgrade policy API
    #[default]
    Managed,
    /// Write the upgrade custom resource on the cluster directly
    Local,
}

/// Kubernetes E2E orchestrator.
///
/// Reuses a managed cluster, waits until it is healthy, runs a workload
/// against it, optionally upgrades it in place, and always cleans up.
#[derive(Parser, Debug, Clone)]
#[command(name = "keo")]
#[command(about = "Kubernetes E2E test orchestrator")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// ID of the cluster to run against
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: String,

    /// Local kubeconfig file; fetched from the provider when unset
    #[arg(long, env = "KUBECONFIG_PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Cluster-management API base URL
    #[arg(long, env = "OCM_URL", default_value = "https://api.openshift.com")]
    pub ocm_url: String,

    /// Cluster-management API bearer token
    #[arg(long, env = "OCM_TOKEN", hide_env_values = true)]
    pub ocm_token: String,

    /// Channel group used to resolve upgrade channels (stable, fast, candidate)
    #[arg(long, env = "CHANNEL_GROUP", default_value = "fast")]
    pub channel_group: String,

    /// Upgrade graph endpoint
    #[arg(
        long,
        env = "UPGRADE_GRAPH_URL",
        default_value = "https://api.openshift.com/api/upgrades_info/v1/graph"
    )]
    pub graph_url: String,

    /// Minutes to wait for the cluster to become healthy
    #[arg(long, env = "INSTALL_TIMEOUT", default_value = "135")]
    pub install_timeout: u64,

    /// Consecutive clean health checks required before the cluster is ready
    #[arg(long, env = "CLEAN_CHECK_RUNS", default_value = "20")]
    pub clean_check_runs: u32,

    /// Consecutive health check execution errors tolerated before failing
    #[arg(long, env = "HEALTH_CHECK_ERROR_WINDOW", default_value = "20")]
    pub health_error_window: u32,

    /// Seconds between readiness polls
    #[arg(long, env = "POLL_INTERVAL", default_value = "30")]
    pub poll_interval: u64,

    /// Skip health checks and treat the cluster as ready
    #[arg(long, env = "SKIP_HEALTH_CHECKS", default_value = "false")]
    pub skip_health_checks: bool,

    /// Release to upgrade to (e.g. 4.14.3 or openshift-v4.14.3)
    #[arg(long, env = "UPGRADE_RELEASE_NAME")]
    pub upgrade_release: Option<String>,

    /// Release image to upgrade to (local source only)
    #[arg(long, env = "UPGRADE_IMAGE")]
    pub upgrade_image: Option<String>,

    /// Pick the newest version reachable from the installed version
    #[arg(long, env = "UPGRADE_TO_LATEST", default_value = "false")]
    pub upgrade_to_latest: bool,

    /// Restrict automatic target selection to z-stream releases
    #[arg(long, env = "ONLY_UPGRADE_TO_Z_RELEASES", default_value = "false")]
    pub only_upgrade_to_z_releases: bool,

    /// Reject an upgrade release that has no edge from the installed version
    #[arg(long, env = "VALIDATE_UPGRADE_EDGE", default_value = "false")]
    pub validate_upgrade_edge: bool,

    /// Upgrade scheduling path
    #[arg(long, env = "UPGRADE_SOURCE", value_enum, default_value_t = UpgradeSourceArg::Managed)]
    pub upgrade_source: UpgradeSourceArg,

    /// Minutes to wait for an upgrade to complete
    #[arg(long, env = "UPGRADE_MAX_DURATION", default_value = "90")]
    pub upgrade_max_duration: u64,

    /// Seconds between upgrade polls
    #[arg(long, env = "UPGRADE_POLL_INTERVAL", default_value = "10")]
    pub upgrade_poll_interval: u64,

    /// Move an outstanding managed upgrade so it runs right away
    #[arg(long, env = "UPGRADE_RESCHEDULE", default_value = "false")]
    pub upgrade_reschedule: bool,

    /// Keep the cluster after the run instead of deleting it
    #[arg(long, env = "SKIP_DESTROY_CLUSTER", default_value = "false")]
    pub skip_destroy_cluster: bool,

    /// Directory for reports, artifacts and event metrics
    #[arg(long, env = "REPORT_DIR", default_value = "./reports")]
    pub report_dir: PathBuf,

    /// Workload command run against the cluster
    #[arg(long, env = "TEST_COMMAND")]
    pub test_command: Option<String>,

    /// Slack incoming webhook URL for run summaries
    #[arg(long, env = "SLACK_WEBHOOK_URL", hide_env_values = true)]
    pub slack_webhook: Option<String>,

    /// Gather failure context from artifacts when the workload fails
    #[arg(long, env = "ENABLE_ANALYSIS", default_value = "false")]
    pub enable_analysis: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format: json or text
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: String,
}

/// How an upgrade target is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeTarget {
    Release(String),
    Image(String),
    Latest,
}

/// Upgrade settings derived from CLI args.
#[derive(Debug, Clone)]
pub struct UpgradeSettings {
    pub target: UpgradeTarget,
    pub source: UpgradeSourceArg,
    pub only_z_stream: bool,
    pub validate_edge: bool,
    pub max_duration: Duration,
    pub poll_interval: Duration,
    pub reschedule: bool,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_id: String,
    pub kubeconfig: Option<PathBuf>,
    pub ocm_url: String,
    pub ocm_token: SecretString,
    pub channel_group: String,
    pub graph_url: String,
    pub install_timeout: Duration,
    pub clean_check_runs: u32,
    pub health_error_window: u32,
    pub poll_interval: Duration,
    pub skip_health_checks: bool,
    pub upgrade: Option<UpgradeSettings>,
    pub skip_destroy_cluster: bool,
    pub report_dir: PathBuf,
    pub test_command: Option<String>,
    pub slack_webhook: Option<String>,
    pub enable_analysis: bool,
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        let target = match (args.upgrade_release, args.upgrade_image) {
            (Some(release), _) if !release.trim().is_empty() => {
                Some(UpgradeTarget::Release(release.trim().to_string()))
            }
            (_, Some(image)) if !image.trim().is_empty() => {
                Some(UpgradeTarget::Image(image.trim().to_string()))
            }
            _ if args.upgrade_to_latest => Some(UpgradeTarget::Latest),
            _ => None,
        };

        let upgrade = target.map(|target| UpgradeSettings {
            target,
            source: args.upgrade_source,
            only_z_stream: args.only_upgrade_to_z_releases,
            validate_edge: args.validate_upgrade_edge,
            max_duration: Duration::from_secs(args.upgrade_max_duration.saturating_mul(60)),
            poll_interval: Duration::from_secs(args.upgrade_poll_interval),
            reschedule: args.upgrade_reschedule,
        });

        Self {
            cluster_id: args.cluster_id,
            kubeconfig: args.kubeconfig,
            ocm_url: args.ocm_url.trim_end_matches('/').to_string(),
            ocm_token: SecretString::from(args.ocm_token),
            channel_group: args.channel_group,
            graph_url: args.graph_url,
            install_timeout: Duration::from_secs(args.install_timeout.saturating_mul(60)),
            clean_check_runs: args.clean_check_runs,
            health_error_window: args.health_error_window,
            poll_interval: Duration::from_secs(args.poll_interval),
            skip_health_checks: args.skip_health_checks,
            upgrade,
            skip_destroy_cluster: args.skip_destroy_cluster,
            report_dir: args.report_dir,
            test_command: args.test_command.filter(|c| !c.trim().is_empty()),
            slack_webhook: args.slack_webhook.filter(|url| !url.is_empty()),
            enable_analysis: args.enable_analysis,
            log_level: args.log_level,
            log_format: args.log_format,
        }
    }

    /// Reject settings the monitors cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_id.trim().is_empty() {
            return Err(KeoError::Config("cluster ID must not be empty".to_string()));
        }
        if self.clean_check_runs == 0 {
            return Err(KeoError::Config(
                "clean check runs must be at least 1".to_string(),
            ));
        }
        if self.health_error_window == 0 {
            return Err(KeoError::Config(
                "health check error window must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(KeoError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if let Some(upgrade) = &self.upgrade {
            if upgrade.poll_interval.is_zero() {
                return Err(KeoError::Config(
                    "upgrade poll interval must be greater than zero".to_string(),
                ));
            }
            if matches!(upgrade.target, UpgradeTarget::Image(_))
                && upgrade.source != UpgradeSourceArg::Local
            {
                return Err(KeoError::Config(
                    "an upgrade image requires the local upgrade source".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Readiness settings for the install-time wait.
    pub const fn readiness(&self) -> ReadinessConfig {
        ReadinessConfig {
            poll_interval: self.poll_interval,
            timeout: self.install_timeout,
            clean_runs_needed: self.clean_check_runs,
            error_window: self.health_error_window,
            skip: self.skip_health_checks,
        }
    }

    /// Log the effective configuration without secrets.
    pub fn display(&self) {
        tracing::info!(
            cluster_id = %self.cluster_id,
            ocm_url = %self.ocm_url,
            channel_group = %self.channel_group,
            install_timeout_secs = self.install_timeout.as_secs(),
            clean_check_runs = self.clean_check_runs,
            health_error_window = self.health_error_window,
            poll_interval_secs = self.poll_interval.as_secs(),
            skip_health_checks = self.skip_health_checks,
            upgrade = self.upgrade.is_some(),
            skip_destroy_cluster = self.skip_destroy_cluster,
            report_dir = %self.report_dir.display(),
            "Configuration initialized"
        );

        if self.skip_destroy_cluster {
            tracing::warn!("Cluster will be preserved after the run");
        }
    }
}
