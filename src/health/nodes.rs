//! Node readiness check.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};

use super::HealthCheck;
use crate::error::{KeoError, Result};

/// Fails while any node lacks a `Ready=True` condition.
pub struct NodeCheck {
    client: kube::Client,
}

impl NodeCheck {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthCheck for NodeCheck {
    fn name(&self) -> &'static str {
        "node"
    }

    async fn check(&self) -> Result<Vec<String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| KeoError::kube("Failed to list nodes", &e))?;
        if nodes.items.is_empty() {
            return Err(KeoError::KubernetesApi("node list is empty".to_string()));
        }
        Ok(node_failures(&nodes.items))
    }
}

/// Describe every node that is not ready.
pub fn node_failures(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| !is_node_ready(node))
        .map(|node| {
            format!(
                "node {} is not ready",
                node.metadata.name.as_deref().unwrap_or("<unnamed>")
            )
        })
        .collect()
}

fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}
