//! Kubernetes client builder for clusters under test.
//!
//! The provider hands out an admin kubeconfig per cluster, so the client is
//! built from those bytes rather than from the local environment.

use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::debug;

use crate::error::{KeoError, Result};

/// Build a Kubernetes client from raw kubeconfig bytes.
pub async fn build_kube_client(kubeconfig: &[u8]) -> Result<kube::Client> {
    let text = std::str::from_utf8(kubeconfig)
        .map_err(|e| KeoError::KubernetesApi(format!("Kubeconfig is not valid UTF-8: {e}")))?;

    let parsed = Kubeconfig::from_yaml(text)
        .map_err(|e| KeoError::KubernetesApi(format!("Failed to parse kubeconfig: {e}")))?;

    let config = kube::Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
        .await
        .map_err(|e| KeoError::KubernetesApi(format!("Failed to load kubeconfig: {e}")))?;
    debug!("Built Kubernetes config for API server {}", config.cluster_url);

    kube::Client::try_from(config)
        .map_err(|e| KeoError::kube("Failed to build Kubernetes client from kubeconfig", &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r"
apiVersion: v1
kind: Config
clusters:
- name: test
  cluster:
    server: https://api.test.example.com:6443
    insecure-skip-tls-verify: true
users:
- name: admin
  user:
    token: sha256~abc
contexts:
- name: admin
  context:
    cluster: test
    user: admin
current-context: admin
";

    #[tokio::test]
    async fn test_build_kube_client_from_bytes() {
        assert!(build_kube_client(KUBECONFIG.as_bytes()).await.is_ok());
    }

    #[tokio::test]
    async fn test_build_kube_client_rejects_garbage() {
        assert!(matches!(
            build_kube_client(b"{not yaml: [").await,
            Err(KeoError::KubernetesApi(_))
        ));
    }

    #[tokio::test]
    async fn test_build_kube_client_rejects_non_utf8() {
        assert!(build_kube_client(&[0xff, 0xfe, 0x00]).await.is_err());
    }
}
