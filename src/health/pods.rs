//! System pod check.
//!
//! Looks at pods in platform namespaces that are neither running nor completed.
//! Pods owned by a Job are judged by the newest pod of that Job only, so an old
//! failed attempt does not keep the cluster unhealthy. A pod that stays pending
//! for [`PENDING_POD_THRESHOLD`] consecutive checks is treated as a check error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};

use super::{HealthCheck, is_system_namespace};
use crate::error::{KeoError, Result};

/// Consecutive checks a pod may stay pending before the check errors.
pub const PENDING_POD_THRESHOLD: u32 = 10;

/// Pods found by one scan.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PodScan {
    /// `(uid, namespace/name)` of each pending pod.
    pub pending: Vec<(String, String)>,
    /// Pods in an unexpected phase.
    pub failed: Vec<String>,
}

/// Counts how many consecutive scans each pod has been pending.
#[derive(Debug)]
pub struct PendingPodTracker {
    threshold: u32,
    counts: HashMap<String, u32>,
}

impl PendingPodTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            counts: HashMap::new(),
        }
    }

    /// Record the pods pending in this scan. Pods that are no longer pending are forgotten.
    ///
    /// Returns the first pod that reached the threshold.
    pub fn observe(&mut self, pending: &[(String, String)]) -> Option<String> {
        let mut next = HashMap::with_capacity(pending.len());
        let mut exceeded = None;
        for (uid, name) in pending {
            let count = self.counts.get(uid).copied().unwrap_or(0) + 1;
            if count >= self.threshold && exceeded.is_none() {
                exceeded = Some(name.clone());
            }
            next.insert(uid.clone(), count);
        }
        self.counts = next;
        exceeded
    }
}

/// Fails while system pods are pending or in an unexpected phase.
pub struct PodCheck {
    client: kube::Client,
    tracker: Mutex<PendingPodTracker>,
}

impl PodCheck {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            tracker: Mutex::new(PendingPodTracker::new(PENDING_POD_THRESHOLD)),
        }
    }
}

#[async_trait]
impl HealthCheck for PodCheck {
    fn name(&self) -> &'static str {
        "pod"
    }

    async fn check(&self) -> Result<Vec<String>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| KeoError::kube("Failed to list pods", &e))?;
        if pods.items.is_empty() {
            return Err(KeoError::KubernetesApi("pod list is empty".to_string()));
        }

        let scan = scan_pods(&pods.items);
        let exceeded = self
            .tracker
            .lock()
            .map_err(|_| KeoError::KubernetesApi("pending pod tracker poisoned".to_string()))?
            .observe(&scan.pending);
        if let Some(name) = exceeded {
            return Err(KeoError::KubernetesApi(format!(
                "pod {name} is pending beyond normal threshold"
            )));
        }

        let mut failures = scan.failed;
        failures.extend(
            scan.pending
                .into_iter()
                .map(|(_, name)| format!("pod {name} is pending")),
        );
        Ok(failures)
    }
}

fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn qualified_name(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

fn job_name(pod: &Pod) -> Option<&str> {
    let owned_by_job = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == "Job"));
    if !owned_by_job {
        return None;
    }
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get("job-name"))
        .map(String::as_str)
}

/// CronJob pods carry `<cronjob>-<timestamp>` job names up to 52 characters.
fn job_group(job: &str) -> &str {
    if job.len() <= 52
        && let Some(cut) = job.rfind('-')
    {
        return &job[..cut];
    }
    job
}

fn classify(pod: &Pod, scan: &mut PodScan) {
    match phase(pod) {
        "Running" | "Succeeded" => {}
        "Pending" => scan.pending.push((
            pod.metadata.uid.clone().unwrap_or_else(|| qualified_name(pod)),
            qualified_name(pod),
        )),
        other => scan
            .failed
            .push(format!("pod {} in unexpected phase {}", qualified_name(pod), other)),
    }
}

/// Classify system pods that are not running or completed.
pub fn scan_pods(pods: &[Pod]) -> PodScan {
    let mut scan = PodScan::default();
    let mut jobs: BTreeMap<(String, String), Vec<&Pod>> = BTreeMap::new();

    for pod in pods {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        if !is_system_namespace(namespace) {
            continue;
        }
        match job_name(pod) {
            Some(job) => jobs
                .entry((namespace.to_string(), job_group(job).to_string()))
                .or_default()
                .push(pod),
            None => classify(pod, &mut scan),
        }
    }

    for group in jobs.values() {
        if let Some(latest) = group
            .iter()
            .max_by_key(|p| p.metadata.creation_timestamp.clone())
        {
            classify(latest, &mut scan);
        }
    }

    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    fn pod(namespace: &str, name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some(format!("uid-{name}")),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn job_pod(namespace: &str, name: &str, job: &str, phase: &str) -> Pod {
        let mut p = pod(namespace, name, phase);
        p.metadata.labels = Some(BTreeMap::from([("job-name".to_string(), job.to_string())]));
        p.metadata.owner_references = Some(vec![OwnerReference {
            kind: "Job".to_string(),
            name: job.to_string(),
            ..Default::default()
        }]);
        p
    }

    #[test]
    fn test_scan_ignores_tenant_namespaces() {
        let pods = vec![pod("default", "app", "Pending"), pod("openshift-dns", "dns", "Running")];
        assert_eq!(scan_pods(&pods), PodScan::default());
    }

    #[test]
    fn test_scan_reports_pending_and_failed() {
        let pods = vec![
            pod("openshift-monitoring", "prometheus-0", "Pending"),
            pod("kube-system", "etcd", "Failed"),
            pod("openshift-ingress", "router", "Succeeded"),
        ];
        let scan = scan_pods(&pods);
        assert_eq!(
            scan.pending,
            vec![(
                "uid-prometheus-0".to_string(),
                "openshift-monitoring/prometheus-0".to_string()
            )]
        );
        assert_eq!(scan.failed, vec!["pod kube-system/etcd in unexpected phase Failed"]);
    }

    #[test]
    fn test_job_pods_judged_by_latest_only() {
        let mut latest = job_pod("openshift-logging", "collect-2-b", "collect-2000", "Succeeded");
        latest.metadata.creation_timestamp =
            Some(serde_json::from_value(serde_json::json!("2026-01-01T01:00:00Z")).unwrap());
        let mut old = job_pod("openshift-logging", "collect-1-a", "collect-1000", "Failed");
        old.metadata.creation_timestamp =
            Some(serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap());
        assert_eq!(scan_pods(&[latest, old]), PodScan::default());
    }

    #[test]
    fn test_job_group_strips_cronjob_suffix() {
        assert_eq!(job_group("image-pruner-28471520"), "image-pruner");
        assert_eq!(job_group("standalone"), "standalone");
        let long = "a".repeat(60) + "-1";
        assert_eq!(job_group(&long), long);
    }

    #[test]
    fn test_pending_tracker_threshold() {
        let mut tracker = PendingPodTracker::new(3);
        let pending = vec![("uid-a".to_string(), "ns/a".to_string())];
        assert_eq!(tracker.observe(&pending), None);
        assert_eq!(tracker.observe(&pending), None);
        assert_eq!(tracker.observe(&pending), Some("ns/a".to_string()));
    }

    #[test]
    fn test_pending_tracker_forgets_recovered_pods() {
        let mut tracker = PendingPodTracker::new(2);
        let pending = vec![("uid-a".to_string(), "ns/a".to_string())];
        assert_eq!(tracker.observe(&pending), None);
        assert_eq!(tracker.observe(&[]), None);
        assert_eq!(tracker.observe(&pending), None);
    }
}
