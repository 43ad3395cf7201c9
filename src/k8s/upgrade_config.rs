//! `UpgradeConfig` custom resource of the managed upgrade operator.
//!
//! The operator runs in [`OPERATOR_NAMESPACE`], reconciles a single
//! `UpgradeConfig` and records each attempt in `status.history`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{KeoError, Result};
use crate::upgrade::scheduler::UpgradeScheduler;
use crate::upgrade::{
    HistoryPhase, UpgradeHistoryEntry, UpgradeRequest, UpgradeSource, UpgradeStatusSource,
};

pub const OPERATOR_NAMESPACE: &str = "openshift-managed-upgrade-operator";
pub const UPGRADE_CONFIG_NAME: &str = "osde2e-upgrade-config";
pub const OPERATOR_CONFIGMAP: &str = "managed-upgrade-operator-config";
pub const OPERATOR_CONFIG_KEY: &str = "config.yaml";
pub const RECONCILER_DEPLOYMENT: &str = "managed-upgrade-operator";

/// Minutes the operator waits before force-draining past a disruption budget.
pub const PDB_FORCE_DRAIN_TIMEOUT: i32 = 5;
pub const UPGRADE_TYPE: &str = "OSD";

/// Operator configuration applied for test runs: short drain and scaling
/// grace periods so worker upgrades are not held back.
pub const TESTING_OPERATOR_CONFIG: &str = "\
configManager:
  source: LOCAL
  localConfigName: managed-upgrade-config
  watchInterval: 1
maintenance:
  controlPlaneTime: 90
  ignoredAlerts:
    controlPlaneCriticals:
    - ClusterOperatorDown
    - ClusterOperatorDegraded
upgradeWindow:
  delayTrigger: 5
  timeOut: 120
nodeDrain:
  timeOut: 5
  expectedNodeDrainTime: 8
scale:
  timeOut: 30
healthCheck:
  ignoredCriticals:
  - PrometheusRuleFailures
";

/// `UpgradeConfig` spec: which release to move to and when.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "upgrade.managed.openshift.io",
    version = "v1alpha1",
    kind = "UpgradeConfig",
    namespaced,
    status = "UpgradeConfigStatus",
    printcolumn = r#"{"name":"DESIRED_VERSION","type":"string","jsonPath":".spec.desired.version"}"#,
    printcolumn = r#"{"name":"PHASE","type":"string","jsonPath":".status.history[0].phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfigSpec {
    pub desired: DesiredUpdate,

    /// RFC3339 time at which the operator may start the upgrade.
    pub upgrade_at: String,

    #[serde(rename = "PDBForceDrainTimeout")]
    pub pdb_force_drain_timeout: i32,

    #[serde(rename = "type")]
    pub upgrade_type: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct DesiredUpdate {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub channel: String,
    /// Release image pinned for image-based upgrades.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct UpgradeConfigStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<UpgradeHistory>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHistory {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<UpgradeCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeCondition {
    #[serde(rename = "type", default)]
    pub condition_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn parse_phase(phase: &str) -> HistoryPhase {
    match phase {
        "Upgraded" => HistoryPhase::Upgraded,
        "Failed" => HistoryPhase::Failed,
        _ => HistoryPhase::Pending,
    }
}

/// Select the history entry for `version`, or the newest entry when `version` is `None`.
pub fn history_entry(
    status: &UpgradeConfigStatus,
    version: Option<&str>,
) -> Option<UpgradeHistoryEntry> {
    let history = match version {
        Some(v) => status.history.iter().find(|h| h.version == v),
        None => status.history.first(),
    }?;

    Some(UpgradeHistoryEntry {
        version: history.version.clone(),
        phase: parse_phase(&history.phase),
        start_time: history.start_time,
        condition_message: history
            .conditions
            .first()
            .and_then(|c| c.message.clone())
            .filter(|m| !m.is_empty()),
    })
}

/// Build the `UpgradeConfig` for `request`.
pub fn build_upgrade_config(request: &UpgradeRequest, channel: Option<&str>) -> UpgradeConfig {
    let mut config = UpgradeConfig::new(
        UPGRADE_CONFIG_NAME,
        UpgradeConfigSpec {
            desired: DesiredUpdate {
                version: request.desired_version.clone().unwrap_or_default(),
                channel: channel.unwrap_or_default().to_string(),
                image: request.desired_image.clone(),
            },
            upgrade_at: request.requested_at.to_rfc3339(),
            pdb_force_drain_timeout: PDB_FORCE_DRAIN_TIMEOUT,
            upgrade_type: UPGRADE_TYPE.to_string(),
        },
    );
    config.metadata = ObjectMeta {
        name: Some(UPGRADE_CONFIG_NAME.to_string()),
        namespace: Some(OPERATOR_NAMESPACE.to_string()),
        ..Default::default()
    };
    config
}

/// Whether the live operator configuration already matches the testing profile.
///
/// Compared structurally, so formatting and key order do not count as drift.
/// A live document that is not valid YAML never matches.
pub fn drain_profile_matches(live: &str) -> bool {
    match (
        serde_yaml::from_str::<serde_yaml::Value>(live),
        serde_yaml::from_str::<serde_yaml::Value>(TESTING_OPERATOR_CONFIG),
    ) {
        (Ok(live), Ok(expected)) => live == expected,
        _ => false,
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// Reads upgrade progress from the managed upgrade operator and tunes it for test runs.
pub struct UpgradeConfigClient {
    upgrade_configs: Api<UpgradeConfig>,
    config_maps: Api<ConfigMap>,
    deployments: Api<Deployment>,
}

impl UpgradeConfigClient {
    pub fn new(client: kube::Client) -> Self {
        Self {
            upgrade_configs: Api::namespaced(client.clone(), OPERATOR_NAMESPACE),
            config_maps: Api::namespaced(client.clone(), OPERATOR_NAMESPACE),
            deployments: Api::namespaced(client, OPERATOR_NAMESPACE),
        }
    }
}

#[async_trait]
impl UpgradeStatusSource for UpgradeConfigClient {
    async fn history(&self, version: Option<&str>) -> Result<Option<UpgradeHistoryEntry>> {
        let config = match self.upgrade_configs.get(UPGRADE_CONFIG_NAME).await {
            Ok(config) => config,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(KeoError::kube("Failed to get UpgradeConfig", &e)),
        };
        Ok(config
            .status
            .as_ref()
            .and_then(|status| history_entry(status, version)))
    }

    async fn ensure_drain_override(&self) -> Result<bool> {
        let cm = self
            .config_maps
            .get(OPERATOR_CONFIGMAP)
            .await
            .map_err(|e| KeoError::kube("Failed to get upgrade operator configmap", &e))?;

        let live = cm
            .data
            .as_ref()
            .and_then(|d| d.get(OPERATOR_CONFIG_KEY))
            .ok_or_else(|| {
                KeoError::KubernetesApi(format!(
                    "configmap {OPERATOR_CONFIGMAP} is missing key {OPERATOR_CONFIG_KEY}"
                ))
            })?;

        if drain_profile_matches(live) {
            return Ok(false);
        }

        let data = BTreeMap::from([(
            OPERATOR_CONFIG_KEY.to_string(),
            TESTING_OPERATOR_CONFIG.to_string(),
        )]);
        self.config_maps
            .patch(
                OPERATOR_CONFIGMAP,
                &PatchParams::default(),
                &Patch::Merge(json!({ "data": data })),
            )
            .await
            .map_err(|e| KeoError::kube("Failed to update upgrade operator configmap", &e))?;
        Ok(true)
    }

    async fn scale_reconciler(&self, replicas: i32) -> Result<()> {
        debug!("Scaling {} to {} replicas", RECONCILER_DEPLOYMENT, replicas);
        self.deployments
            .patch(
                RECONCILER_DEPLOYMENT,
                &PatchParams::default(),
                &Patch::Merge(json!({ "spec": { "replicas": replicas } })),
            )
            .await
            .map_err(|e| KeoError::kube("Failed to scale upgrade operator", &e))?;
        Ok(())
    }

    async fn reconciler_replicas(&self) -> Result<i32> {
        let deployment = self
            .deployments
            .get(RECONCILER_DEPLOYMENT)
            .await
            .map_err(|e| KeoError::kube("Failed to get upgrade operator deployment", &e))?;
        Ok(deployment
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0))
    }
}

/// Schedules upgrades by writing an `UpgradeConfig` to the cluster.
pub struct LocalScheduler {
    upgrade_configs: Api<UpgradeConfig>,
}

impl LocalScheduler {
    pub fn new(client: kube::Client) -> Self {
        Self {
            upgrade_configs: Api::namespaced(client, OPERATOR_NAMESPACE),
        }
    }
}

#[async_trait]
impl UpgradeScheduler for LocalScheduler {
    fn source(&self) -> UpgradeSource {
        UpgradeSource::Local
    }

    async fn schedule(&self, request: &UpgradeRequest, channel: Option<&str>) -> Result<()> {
        // A previous run may have left its UpgradeConfig behind.
        match self
            .upgrade_configs
            .delete(UPGRADE_CONFIG_NAME, &DeleteParams::default())
            .await
        {
            Ok(_) => debug!("Deleted existing UpgradeConfig {}", UPGRADE_CONFIG_NAME),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(KeoError::kube("Failed to delete existing UpgradeConfig", &e)),
        }

        let config = build_upgrade_config(request, channel);
        let created = self
            .upgrade_configs
            .create(&PostParams::default(), &config)
            .await
            .map_err(|e| KeoError::kube("Failed to create UpgradeConfig", &e))?;
        info!(
            "Created UpgradeConfig {}/{} for {}",
            OPERATOR_NAMESPACE,
            created.name_any(),
            request.target()
        );
        Ok(())
    }

    async fn has_outstanding(&self) -> Result<bool> {
        match self.upgrade_configs.get(UPGRADE_CONFIG_NAME).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(KeoError::kube("Failed to get UpgradeConfig", &e)),
        }
    }

    async fn reschedule(&self, at: DateTime<Utc>) -> Result<()> {
        self.upgrade_configs
            .patch(
                UPGRADE_CONFIG_NAME,
                &PatchParams::default(),
                &Patch::Merge(json!({ "spec": { "upgradeAt": at.to_rfc3339() } })),
            )
            .await
            .map_err(|e| KeoError::kube("Failed to reschedule UpgradeConfig", &e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> UpgradeConfigStatus {
        serde_json::from_value(json!({
            "history": [
                {
                    "version": "4.14.5",
                    "phase": "Upgrading",
                    "startTime": "2026-01-01T02:00:00Z",
                    "conditions": [
                        {"type": "ControlPlaneUpgraded", "status": "False", "message": "Upgrading control plane"}
                    ]
                },
                {
                    "version": "4.14.3",
                    "phase": "Upgraded",
                    "conditions": []
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_history_entry_by_version() {
        let entry = history_entry(&status(), Some("4.14.3")).unwrap();
        assert_eq!(entry.phase, HistoryPhase::Upgraded);
        assert_eq!(entry.condition_message, None);
    }

    #[test]
    fn test_history_entry_newest() {
        let entry = history_entry(&status(), None).unwrap();
        assert_eq!(entry.version, "4.14.5");
        assert_eq!(entry.phase, HistoryPhase::Pending);
        assert_eq!(
            entry.condition_message.as_deref(),
            Some("Upgrading control plane")
        );
        assert!(entry.start_time.is_some());
    }

    #[test]
    fn test_history_entry_missing() {
        assert!(history_entry(&status(), Some("4.15.0")).is_none());
        assert!(history_entry(&UpgradeConfigStatus::default(), None).is_none());
    }

    #[test]
    fn test_parse_phase() {
        assert_eq!(parse_phase("Failed"), HistoryPhase::Failed);
        assert_eq!(parse_phase("Upgraded"), HistoryPhase::Upgraded);
        assert_eq!(parse_phase("New"), HistoryPhase::Pending);
    }

    #[test]
    fn test_build_upgrade_config() {
        let request = UpgradeRequest::new(
            Some("openshift-v4.14.5".to_string()),
            None,
            UpgradeSource::Local,
        )
        .unwrap();
        let config = build_upgrade_config(&request, Some("fast-4.14"));
        assert_eq!(config.metadata.namespace.as_deref(), Some(OPERATOR_NAMESPACE));
        assert_eq!(config.spec.desired.version, "4.14.5");
        assert_eq!(config.spec.desired.channel, "fast-4.14");

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["spec"]["PDBForceDrainTimeout"], 5);
        assert_eq!(value["spec"]["type"], "OSD");
        assert!(value["spec"]["desired"].get("image").is_none());
    }

    #[test]
    fn test_drain_profile_matches_ignores_formatting() {
        assert!(drain_profile_matches(TESTING_OPERATOR_CONFIG));
        let reordered = "\
scale: {timeOut: 30}
nodeDrain: {expectedNodeDrainTime: 8, timeOut: 5}
upgradeWindow: {timeOut: 120, delayTrigger: 5}
maintenance:
  controlPlaneTime: 90
  ignoredAlerts:
    controlPlaneCriticals: [ClusterOperatorDown, ClusterOperatorDegraded]
configManager: {source: LOCAL, localConfigName: managed-upgrade-config, watchInterval: 1}
healthCheck: {ignoredCriticals: [PrometheusRuleFailures]}
";
        assert!(drain_profile_matches(reordered));
    }

    #[test]
    fn test_drain_profile_drift() {
        let drifted = TESTING_OPERATOR_CONFIG.replace("timeOut: 5", "timeOut: 45");
        assert!(!drain_profile_matches(&drifted));
        assert!(!drain_profile_matches(": not yaml ["));
    }
}
