//! Client for an OCM-style clusters-management REST API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::ClusterManager;
use crate::cluster::{ClusterSnapshot, ClusterState};
use crate::error::{KeoError, Result};

const COMPONENT: &str = "provider::ocm";
const CLUSTERS_PATH: &str = "/api/clusters_mgmt/v1/clusters";

#[derive(Deserialize, Debug, Default)]
struct IdRef {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize, Debug, Default)]
struct VersionRef {
    #[serde(default)]
    raw_id: String,
}

#[derive(Deserialize, Debug)]
struct ClusterBody {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    version: VersionRef,
    #[serde(default)]
    region: IdRef,
    #[serde(default)]
    cloud_provider: IdRef,
    #[serde(default)]
    properties: Option<BTreeMap<String, String>>,
}

impl From<ClusterBody> for ClusterSnapshot {
    fn from(body: ClusterBody) -> Self {
        Self {
            id: body.id,
            name: body.name,
            state: ClusterState::parse(&body.state),
            version: body.version.raw_id,
            region: body.region.id,
            cloud_provider: body.cloud_provider.id,
            properties: body.properties.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct CredentialsBody {
    #[serde(default)]
    kubeconfig: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct UpgradePolicyBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    schedule_type: String,
    next_run: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug)]
struct UpgradePolicyList {
    #[serde(default)]
    items: Vec<UpgradePolicyBody>,
}

/// REST client for the clusters-management API.
pub struct OcmClient {
    base_url: String,
    token: SecretString,
    client: reqwest::Client,
}

impl OcmClient {
    /// Create a client for `base_url` (without trailing slash) authenticating with `token`.
    pub fn new(base_url: String, token: SecretString) -> Self {
        Self {
            base_url,
            token,
            client: reqwest::Client::new(),
        }
    }

    fn cluster_url(&self, cluster_id: &str) -> String {
        format!("{}{CLUSTERS_PATH}/{cluster_id}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// Send a request and return the response body when the status matches `expected`.
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        url: &str,
        expected: StatusCode,
    ) -> Result<String> {
        let resp = builder.send().await.map_err(|e| KeoError::http(url, &e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| KeoError::http(url, &e))?;
        if status != expected {
            return Err(KeoError::api(COMPONENT, status.as_u16(), &body));
        }
        Ok(body)
    }

    fn decode<T: serde::de::DeserializeOwned>(url: &str, body: &str) -> Result<T> {
        serde_json::from_str(body).map_err(|e| KeoError::Decode {
            source_name: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ClusterManager for OcmClient {
    fn name(&self) -> &str {
        "ocm"
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot> {
        let url = self.cluster_url(cluster_id);
        let body = self
            .send(self.request(reqwest::Method::GET, &url), &url, StatusCode::OK)
            .await?;
        let cluster: ClusterBody = Self::decode(&url, &body)?;
        Ok(cluster.into())
    }

    async fn add_property(&self, cluster_id: &str, key: &str, value: &str) -> Result<()> {
        // The update replaces the whole properties map.
        let mut properties = self.get_cluster(cluster_id).await?.properties;
        properties.insert(key.to_string(), value.to_string());

        let url = self.cluster_url(cluster_id);
        let builder = self
            .request(reqwest::Method::PATCH, &url)
            .json(&json!({ "properties": properties }));
        self.send(builder, &url, StatusCode::OK).await?;

        debug!("Added property {}={} to cluster {}", key, value, cluster_id);
        Ok(())
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        let url = self.cluster_url(cluster_id);
        self.send(
            self.request(reqwest::Method::DELETE, &url),
            &url,
            StatusCode::NO_CONTENT,
        )
        .await?;
        info!("Deleted cluster {}", cluster_id);
        Ok(())
    }

    async fn kubeconfig(&self, cluster_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/credentials", self.cluster_url(cluster_id));
        let body = self
            .send(self.request(reqwest::Method::GET, &url), &url, StatusCode::OK)
            .await?;
        let credentials: CredentialsBody = Self::decode(&url, &body)?;
        if credentials.kubeconfig.is_empty() {
            return Err(KeoError::Provider(
                COMPONENT.to_string(),
                format!("no kubeconfig available for cluster {cluster_id}"),
            ));
        }
        Ok(credentials.kubeconfig.into_bytes())
    }

    async fn upgrade(
        &self,
        cluster_id: &str,
        version: &str,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        let url = format!("{}/upgrade_policies", self.cluster_url(cluster_id));
        let policy = UpgradePolicyBody {
            id: String::new(),
            version: version.to_string(),
            schedule_type: "manual".to_string(),
            next_run: Some(next_run),
        };
        let builder = self.request(reqwest::Method::POST, &url).json(&policy);
        self.send(builder, &url, StatusCode::CREATED).await?;

        info!(
            "Upgrade to version {} scheduled with provider for {}",
            version,
            next_run.to_rfc3339()
        );
        Ok(())
    }

    async fn get_upgrade_policy_id(&self, cluster_id: &str) -> Result<Option<String>> {
        let url = format!("{}/upgrade_policies", self.cluster_url(cluster_id));
        let body = self
            .send(self.request(reqwest::Method::GET, &url), &url, StatusCode::OK)
            .await?;
        let list: UpgradePolicyList = Self::decode(&url, &body)?;

        let Some(first) = list.items.into_iter().next() else {
            debug!("No upgrade policies currently exist for cluster {}", cluster_id);
            return Ok(None);
        };
        if first.id.is_empty() {
            return Err(KeoError::Provider(
                COMPONENT.to_string(),
                "upgrade policy has no ID".to_string(),
            ));
        }
        Ok(Some(first.id))
    }

    async fn update_schedule(
        &self,
        cluster_id: &str,
        policy_id: &str,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        let url = format!(
            "{}/upgrade_policies/{policy_id}",
            self.cluster_url(cluster_id)
        );
        let builder = self
            .request(reqwest::Method::PATCH, &url)
            .json(&json!({ "next_run": next_run }));
        self.send(builder, &url, StatusCode::OK).await?;

        info!(
            "Updated upgrade schedule for cluster {} to {}",
            cluster_id,
            next_run.to_rfc3339()
        );
        Ok(())
    }
}
