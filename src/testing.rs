//! Scripted fakes shared by unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cluster::{ClusterSnapshot, ClusterState, properties};
use crate::error::{KeoError, Result};
use crate::health::{HealthProbe, ProbeOutcome};
use crate::provider::ClusterManager;
use crate::upgrade::scheduler::UpgradeScheduler;
use crate::upgrade::{UpgradeHistoryEntry, UpgradeRequest, UpgradeSource, UpgradeStatusSource};

/// Cluster-management provider returning scripted cluster states.
///
/// States are consumed front to back; the last one repeats.
pub struct FakeProvider {
    states: Mutex<VecDeque<ClusterState>>,
    version: Mutex<String>,
    get_error: Mutex<Option<String>>,
    add_property_fails: AtomicBool,
    upgrade_fails: AtomicBool,
    properties: Mutex<Vec<(String, String)>>,
    get_calls: AtomicU32,
    policy_id: Mutex<Option<String>>,
    upgrades: Mutex<Vec<(String, DateTime<Utc>)>>,
    schedule_updates: Mutex<Vec<(String, DateTime<Utc>)>>,
    deletes: AtomicU32,
    get_delay: Mutex<Option<Duration>>,
}

impl FakeProvider {
    pub fn with_state(state: ClusterState) -> Self {
        Self::with_states(vec![state])
    }

    pub fn with_states(states: Vec<ClusterState>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            version: Mutex::new("4.14.3".to_string()),
            get_error: Mutex::new(None),
            add_property_fails: AtomicBool::new(false),
            upgrade_fails: AtomicBool::new(false),
            properties: Mutex::new(Vec::new()),
            get_calls: AtomicU32::new(0),
            policy_id: Mutex::new(None),
            upgrades: Mutex::new(Vec::new()),
            schedule_updates: Mutex::new(Vec::new()),
            deletes: AtomicU32::new(0),
            get_delay: Mutex::new(None),
        }
    }

    pub fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = version.to_string();
    }

    pub fn fail_get_cluster(&self, message: &str) {
        *self.get_error.lock().unwrap() = Some(message.to_string());
    }

    /// Make every `get_cluster` call take `delay` before answering.
    pub fn delay_get_cluster(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_add_property(&self) {
        self.add_property_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_upgrade(&self) {
        self.upgrade_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_policy_id(&self, id: Option<&str>) {
        *self.policy_id.lock().unwrap() = id.map(String::from);
    }

    /// Every `(key, value)` written through `add_property`, in order.
    pub fn properties(&self) -> Vec<(String, String)> {
        self.properties.lock().unwrap().clone()
    }

    /// Values written to the `Status` property, in order.
    pub fn statuses(&self) -> Vec<String> {
        self.properties()
            .into_iter()
            .filter(|(k, _)| k == properties::STATUS)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn upgrades(&self) -> Vec<(String, DateTime<Utc>)> {
        self.upgrades.lock().unwrap().clone()
    }

    pub fn schedule_updates(&self) -> Vec<(String, DateTime<Utc>)> {
        self.schedule_updates.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    fn next_state(&self) -> ClusterState {
        let mut states = self.states.lock().unwrap();
        if states.len() > 1 {
            states.pop_front().unwrap_or_default()
        } else {
            states.front().copied().unwrap_or_default()
        }
    }
}

#[async_trait]
impl ClusterManager for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.get_error.lock().unwrap().clone() {
            return Err(KeoError::Provider("fake".to_string(), message));
        }
        let mut props = BTreeMap::new();
        for (k, v) in self.properties() {
            props.insert(k, v);
        }
        Ok(ClusterSnapshot {
            id: cluster_id.to_string(),
            name: format!("{cluster_id}-name"),
            state: self.next_state(),
            version: self.version.lock().unwrap().clone(),
            region: "us-east-1".to_string(),
            cloud_provider: "aws".to_string(),
            properties: props,
        })
    }

    async fn add_property(&self, _cluster_id: &str, key: &str, value: &str) -> Result<()> {
        if self.add_property_fails.load(Ordering::SeqCst) {
            return Err(KeoError::Provider("fake".to_string(), "update rejected".to_string()));
        }
        self.properties
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn delete_cluster(&self, _cluster_id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn kubeconfig(&self, _cluster_id: &str) -> Result<Vec<u8>> {
        Ok(b"apiVersion: v1\nkind: Config\n".to_vec())
    }

    async fn upgrade(
        &self,
        _cluster_id: &str,
        version: &str,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        if self.upgrade_fails.load(Ordering::SeqCst) {
            return Err(KeoError::Provider("fake".to_string(), "upgrade rejected".to_string()));
        }
        self.upgrades
            .lock()
            .unwrap()
            .push((version.to_string(), next_run));
        *self.policy_id.lock().unwrap() = Some("policy-1".to_string());
        Ok(())
    }

    async fn get_upgrade_policy_id(&self, _cluster_id: &str) -> Result<Option<String>> {
        Ok(self.policy_id.lock().unwrap().clone())
    }

    async fn update_schedule(
        &self,
        _cluster_id: &str,
        policy_id: &str,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        self.schedule_updates
            .lock()
            .unwrap()
            .push((policy_id.to_string(), next_run));
        Ok(())
    }
}

/// Health probe returning scripted outcomes; the last one repeats.
pub struct ScriptedProbe {
    outcomes: Mutex<VecDeque<ProbeOutcome>>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedProbe {
    pub fn new(outcomes: Vec<ProbeOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    /// Make every health check take `delay` before answering.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap_or(ProbeOutcome::Healthy)
        } else {
            outcomes.front().cloned().unwrap_or(ProbeOutcome::Healthy)
        }
    }
}

/// Upgrade scheduler recording what it was asked to do.
pub struct FakeScheduler {
    source: UpgradeSource,
    outstanding: AtomicBool,
    scheduled: Mutex<Vec<(String, Option<String>)>>,
    rescheduled: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeScheduler {
    pub fn new(source: UpgradeSource) -> Self {
        Self {
            source,
            outstanding: AtomicBool::new(true),
            scheduled: Mutex::new(Vec::new()),
            rescheduled: Mutex::new(Vec::new()),
        }
    }

    pub fn set_outstanding(&self, outstanding: bool) {
        self.outstanding.store(outstanding, Ordering::SeqCst);
    }

    /// `(target, channel)` of every scheduled request.
    pub fn scheduled(&self) -> Vec<(String, Option<String>)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn rescheduled(&self) -> Vec<DateTime<Utc>> {
        self.rescheduled.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpgradeScheduler for FakeScheduler {
    fn source(&self) -> UpgradeSource {
        self.source
    }

    async fn schedule(&self, request: &UpgradeRequest, channel: Option<&str>) -> Result<()> {
        self.scheduled
            .lock()
            .unwrap()
            .push((request.target().to_string(), channel.map(String::from)));
        Ok(())
    }

    async fn has_outstanding(&self) -> Result<bool> {
        Ok(self.outstanding.load(Ordering::SeqCst))
    }

    async fn reschedule(&self, at: DateTime<Utc>) -> Result<()> {
        self.rescheduled.lock().unwrap().push(at);
        Ok(())
    }
}

/// On-cluster upgrade status returning scripted history entries; the last one repeats.
pub struct FakeStatusSource {
    history: Mutex<VecDeque<Option<UpgradeHistoryEntry>>>,
    history_fails: AtomicBool,
    drain_fails: AtomicBool,
    scaling_fails: AtomicBool,
    stuck_replicas: AtomicI32,
    scale_calls: Mutex<Vec<i32>>,
    override_calls: AtomicU32,
    history_delay: Mutex<Option<Duration>>,
    history_error: Mutex<Option<KeoError>>,
}

impl FakeStatusSource {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::from([None])),
            history_fails: AtomicBool::new(false),
            drain_fails: AtomicBool::new(false),
            scaling_fails: AtomicBool::new(false),
            stuck_replicas: AtomicI32::new(0),
            scale_calls: Mutex::new(Vec::new()),
            override_calls: AtomicU32::new(0),
            history_delay: Mutex::new(None),
            history_error: Mutex::new(None),
        }
    }

    pub fn set_history(&self, entry: Option<UpgradeHistoryEntry>) {
        self.set_history_sequence(vec![entry]);
    }

    pub fn set_history_sequence(&self, entries: Vec<Option<UpgradeHistoryEntry>>) {
        *self.history.lock().unwrap() = entries.into();
    }

    pub fn fail_history(&self) {
        self.history_fails.store(true, Ordering::SeqCst);
    }

    /// Fail every history read with `error` instead of the default transient one.
    pub fn fail_history_with(&self, error: KeoError) {
        *self.history_error.lock().unwrap() = Some(error);
        self.history_fails.store(true, Ordering::SeqCst);
    }

    /// Make every history read take `delay` before answering.
    pub fn delay_history(&self, delay: Duration) {
        *self.history_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_drain_override(&self) {
        self.drain_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_scaling(&self) {
        self.scaling_fails.store(true, Ordering::SeqCst);
    }

    /// Report `replicas` ready replicas no matter how the reconciler is scaled.
    pub fn set_replicas_stuck(&self, replicas: i32) {
        self.stuck_replicas.store(replicas, Ordering::SeqCst);
    }

    pub fn scale_calls(&self) -> Vec<i32> {
        self.scale_calls.lock().unwrap().clone()
    }

    pub fn override_calls(&self) -> u32 {
        self.override_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpgradeStatusSource for FakeStatusSource {
    async fn history(&self, _version: Option<&str>) -> Result<Option<UpgradeHistoryEntry>> {
        let delay = *self.history_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.history_fails.load(Ordering::SeqCst) {
            let scripted = self.history_error.lock().unwrap().take();
            return Err(scripted.unwrap_or_else(|| {
                KeoError::KubernetesApi("upgradeconfigs unavailable".to_string())
            }));
        }
        let mut history = self.history.lock().unwrap();
        if history.len() > 1 {
            Ok(history.pop_front().flatten())
        } else {
            Ok(history.front().cloned().flatten())
        }
    }

    async fn ensure_drain_override(&self) -> Result<bool> {
        self.override_calls.fetch_add(1, Ordering::SeqCst);
        if self.drain_fails.load(Ordering::SeqCst) {
            return Err(KeoError::KubernetesApi("configmap not found".to_string()));
        }
        Ok(false)
    }

    async fn scale_reconciler(&self, replicas: i32) -> Result<()> {
        if self.scaling_fails.load(Ordering::SeqCst) {
            return Err(KeoError::KubernetesApi("deployment not found".to_string()));
        }
        self.scale_calls.lock().unwrap().push(replicas);
        Ok(())
    }

    async fn reconciler_replicas(&self) -> Result<i32> {
        Ok(self.stuck_replicas.load(Ordering::SeqCst))
    }
}
