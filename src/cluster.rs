//! Cluster data model shared by the provider, monitors and orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property keys and values annotated onto the remote cluster.
pub mod properties {
    /// Key holding the harness' view of the cluster's lifecycle.
    pub const STATUS: &str = "Status";
    /// Key holding the version an upgrade run is targeting.
    pub const UPGRADE_VERSION: &str = "UpgradeVersion";

    pub const STATUS_PROVISIONING: &str = "provisioning";
    pub const STATUS_WAITING_FOR_READY: &str = "waiting-for-ready";
    pub const STATUS_HEALTH_CHECK: &str = "health-check";
    pub const STATUS_HEALTHY: &str = "healthy";
    pub const STATUS_UNHEALTHY: &str = "unhealthy";
    pub const STATUS_UPGRADE_HEALTH_CHECK: &str = "upgrade-health-check";
    pub const STATUS_UPGRADE_HEALTHY: &str = "upgrade-healthy";
    pub const STATUS_UPGRADE_UNHEALTHY: &str = "upgrade-unhealthy";
    pub const STATUS_COMPLETED_PASSING: &str = "completed-passing";
    pub const STATUS_COMPLETED_FAILING: &str = "completed-failing";

    /// Local annotation set by the orchestrator before cleanup.
    pub const PASSING: &str = "passing";
}

/// State of a cluster as reported by the cluster-management provider.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    Pending,
    PendingAccount,
    Installing,
    Ready,
    Error,
    Uninstalling,
    PoweringDown,
    Hibernating,
    Resuming,
    #[default]
    Unknown,
}

impl ClusterState {
    /// Parse a provider state string. Unrecognized states map to `Unknown`.
    pub fn parse(state: &str) -> Self {
        match state {
            "pending" => Self::Pending,
            "pending_account" => Self::PendingAccount,
            "installing" => Self::Installing,
            "ready" => Self::Ready,
            "error" => Self::Error,
            "uninstalling" => Self::Uninstalling,
            "powering_down" => Self::PoweringDown,
            "hibernating" => Self::Hibernating,
            "resuming" => Self::Resuming,
            _ => Self::Unknown,
        }
    }

    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::PendingAccount => write!(f, "pending_account"),
            Self::Installing => write!(f, "installing"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
            Self::Uninstalling => write!(f, "uninstalling"),
            Self::PoweringDown => write!(f, "powering_down"),
            Self::Hibernating => write!(f, "hibernating"),
            Self::Resuming => write!(f, "resuming"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Point-in-time view of a cluster returned by the provider on every read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub id: String,
    pub name: String,
    pub state: ClusterState,
    pub version: String,
    pub region: String,
    pub cloud_provider: String,
    pub properties: BTreeMap<String, String>,
}

/// Connection details for the cluster under test.
///
/// Produced once by provisioning and owned by the orchestrator for the whole run.
/// Only `properties` is annotated afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub region: String,
    pub version: String,
    #[serde(skip)]
    pub kubeconfig: Vec<u8>,
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl ClusterInfo {
    /// Build connection details from a provider snapshot and kubeconfig contents.
    pub fn from_snapshot(snapshot: &ClusterSnapshot, provider: &str, kubeconfig: Vec<u8>) -> Self {
        let mut properties: BTreeMap<String, serde_json::Value> = snapshot
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        properties.insert(
            "state".to_string(),
            serde_json::Value::String(snapshot.state.to_string()),
        );
        properties.insert(
            "cloudProvider".to_string(),
            serde_json::Value::String(snapshot.cloud_provider.clone()),
        );

        Self {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            provider: provider.to_string(),
            region: snapshot.region.clone(),
            version: snapshot.version.clone(),
            kubeconfig,
            properties,
        }
    }

    /// Whether the orchestrator marked the run as passing.
    pub fn is_passing(&self) -> bool {
        self.properties
            .get(properties::PASSING)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

impl std::fmt::Display for ClusterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) - {} {}", self.name, self.id, self.region, self.version)
    }
}

/// Result of one health evaluation. Replaced wholesale on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub ready: bool,
    pub message: String,
    pub conditions: BTreeMap<String, bool>,
}

/// Which lifecycle point a readiness wait belongs to; selects the status
/// values annotated onto the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPhase {
    Install,
    Upgrade,
}

impl HealthPhase {
    pub const fn checking_status(self) -> &'static str {
        match self {
            Self::Install => properties::STATUS_HEALTH_CHECK,
            Self::Upgrade => properties::STATUS_UPGRADE_HEALTH_CHECK,
        }
    }

    pub const fn healthy_status(self) -> &'static str {
        match self {
            Self::Install => properties::STATUS_HEALTHY,
            Self::Upgrade => properties::STATUS_UPGRADE_HEALTHY,
        }
    }

    pub const fn unhealthy_status(self) -> &'static str {
        match self {
            Self::Install => properties::STATUS_UNHEALTHY,
            Self::Upgrade => properties::STATUS_UPGRADE_UNHEALTHY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_state_parse() {
        assert_eq!(ClusterState::parse("ready"), ClusterState::Ready);
        assert_eq!(ClusterState::parse("installing"), ClusterState::Installing);
        assert_eq!(ClusterState::parse("pending_account"), ClusterState::PendingAccount);
        assert_eq!(ClusterState::parse("error"), ClusterState::Error);
        assert_eq!(ClusterState::parse("something-new"), ClusterState::Unknown);
    }

    #[test]
    fn test_cluster_state_display_matches_parse() {
        for state in [
            ClusterState::Pending,
            ClusterState::Installing,
            ClusterState::Ready,
            ClusterState::Error,
            ClusterState::Hibernating,
        ] {
            assert_eq!(ClusterState::parse(&state.to_string()), state);
        }
    }

    #[test]
    fn test_cluster_state_predicates() {
        assert!(ClusterState::Ready.is_ready());
        assert!(!ClusterState::Installing.is_ready());
        assert!(ClusterState::Error.is_error());
        assert!(!ClusterState::Ready.is_error());
    }

    #[test]
    fn test_cluster_info_from_snapshot() {
        let mut props = BTreeMap::new();
        props.insert("JobName".to_string(), "nightly".to_string());
        let snapshot = ClusterSnapshot {
            id: "abc123".to_string(),
            name: "e2e-cluster".to_string(),
            state: ClusterState::Ready,
            version: "4.14.3".to_string(),
            region: "us-east-1".to_string(),
            cloud_provider: "aws".to_string(),
            properties: props,
        };
        let info = ClusterInfo::from_snapshot(&snapshot, "ocm", b"kubeconfig".to_vec());
        assert_eq!(info.id, "abc123");
        assert_eq!(info.provider, "ocm");
        assert_eq!(info.kubeconfig, b"kubeconfig");
        assert_eq!(info.properties["state"], "ready");
        assert_eq!(info.properties["JobName"], "nightly");
        assert!(!info.is_passing());
    }

    #[test]
    fn test_cluster_info_passing_annotation() {
        let mut info = ClusterInfo::default();
        info.properties
            .insert(properties::PASSING.to_string(), serde_json::Value::Bool(true));
        assert!(info.is_passing());
    }

    #[test]
    fn test_health_phase_statuses() {
        assert_eq!(HealthPhase::Install.healthy_status(), "healthy");
        assert_eq!(HealthPhase::Upgrade.healthy_status(), "upgrade-healthy");
        assert_eq!(HealthPhase::Install.checking_status(), "health-check");
        assert_eq!(HealthPhase::Upgrade.unhealthy_status(), "upgrade-unhealthy");
    }
}
