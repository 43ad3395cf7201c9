//! Custom error types for keo.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results carrying a [`KeoError`].
pub type Result<T> = std::result::Result<T, KeoError>;

/// Errors that can occur while coordinating a cluster test run.
#[derive(Error, Debug)]
pub enum KeoError {
    #[error("[{0}] {1}")]
    Provider(String, String),

    #[error("[{0}] request unauthorized: {1}")]
    Unauthorized(String, String),

    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("Failed to decode response from {source_name}: {message}")]
    Decode { source_name: String, message: String },

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Unable to resolve an upgrade channel for version {0}")]
    UnresolvableChannel(String),

    #[error("Upgrade not possible: {0}")]
    UpgradeNotPossible(String),

    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("Cluster not ready: {0}")]
    Readiness(#[from] ReadinessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeoError {
    /// Create a provider error from an API response status and body.
    /// Extracts the `reason` field of a JSON error body when one is present.
    pub fn api(component: &str, status: u16, body: &str) -> Self {
        let details = Self::extract_error_details(body, status);
        if status == 401 || status == 403 {
            return Self::Unauthorized(component.to_string(), details);
        }
        if status == 404 {
            return Self::ClusterNotFound(details);
        }
        Self::Provider(component.to_string(), details)
    }

    /// Create an HTTP transport error.
    pub fn http(url: &str, err: &reqwest::Error) -> Self {
        Self::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// Create a Kubernetes API error with context.
    pub fn kube(context: &str, err: &kube::Error) -> Self {
        Self::KubernetesApi(format!("{context}: {err}"))
    }

    /// Extract a single-line error message from a cluster-management API error body.
    fn extract_error_details(body: &str, status: u16) -> String {
        // Pattern: {"kind":"Error","code":"CLUSTERS-MGMT-404","reason":"..."}
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
            && let Some(reason) = value.get("reason").and_then(|r| r.as_str())
        {
            return reason.to_string();
        }

        let trimmed = body.trim();
        if !trimmed.is_empty() && !trimmed.contains('\n') {
            return trimmed.to_string();
        }

        format!("API request failed with status {status}")
    }

    /// Returns true if this error is transient and the caller may simply try again.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider(_, _) | Self::Http { .. } | Self::KubernetesApi(_)
        )
    }
}

/// Typed outcome of a readiness wait that did not end with a ready cluster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("failed fetching cluster {cluster_id} from provider: {message}")]
    ProviderUnavailable { cluster_id: String, message: String },

    #[error("cluster {0} is in error state, check the cloud provider for more details")]
    ClusterErrorState(String),

    #[error("health checks failed to execute {errors} consecutive times, last error: {last_error}")]
    HealthCheckEscalation { errors: u32, last_error: String },

    #[error("cluster not healthy after {waited:?} ({clean_runs}/{needed} clean runs)")]
    Timeout {
        waited: Duration,
        clean_runs: u32,
        needed: u32,
    },

    #[error("readiness wait cancelled")]
    Cancelled,
}
