//! Azure Resource Manager client for AKS.
//!
//! Operations hang off two handles:
//!
//! - [`Subscription`]: resource groups, subscription-wide cluster listing and
//!   service principals (via Microsoft Graph)
//! - [`ResourceGroup`]: managed clusters, agent pools, credential rotation
//!   and kubeconfig retrieval
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐
//! │ Subscription │──▶│ ResourceGroup │
//! └──────┬───────┘   └───────┬───────┘
//!        │                   │ create: CreateGuard
//!        ▼                   ▼
//!   ┌───────────────────────────────┐      ┌─────────────────┐
//!   │ ArmClient (reqwest)           │◀─────│ TokenCredential │
//!   └──────┬─────────────────┬──────┘      └─────────────────┘
//!          │ HTTPS           │ HTTPS
//!   ┌──────▼──────┐   ┌──────▼───────────┐
//!   │ ARM         │   │ Microsoft Graph  │
//!   └─────────────┘   └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use aks_kit_arm::{
//!     AgentPoolProfile, ArmClient, ArmConfig, ManagedClusterSpec, StaticTokenCredential,
//!     Subscription,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credential = Arc::new(StaticTokenCredential::new("eyJ0eXAi..."));
//! let client = ArmClient::new(ArmConfig::default(), credential)?;
//! let subscription = Subscription::new(client, "00000000-0000-0000-0000-000000000000".parse()?);
//!
//! let group = subscription.resource_group("rg-demo".parse()?);
//! let principal = subscription.create_service_principal("aks-demo-sp").await?;
//!
//! let spec = ManagedClusterSpec::new("westeurope", "aks-demo")
//!     .agent_pool(AgentPoolProfile::system("system".parse()?, 3, "Standard_D4s_v5"))
//!     .service_principal(principal.profile());
//! let cluster = group.create_managed_cluster(&"aks-demo".parse()?, &spec).await?;
//! println!("{:?}", cluster.provisioning_state());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::time::Duration;

use aks_kit_core::{CoreError, RetryPolicy};
use serde::Deserialize;

pub mod client;
pub mod cluster;
pub mod credential;
pub mod error;
pub mod graph;
pub mod kubeconfig;
pub mod resource_group;
pub mod subscription;

pub use client::ArmClient;
pub use cluster::{
    AgentPool, AgentPoolMode, AgentPoolProfile, LinuxProfile, ManagedCluster,
    ManagedClusterSpec, ProvisioningState, ServicePrincipalProfile,
};
pub use credential::{AccessToken, AzureCliCredential, StaticTokenCredential, TokenCredential};
pub use error::{ArmError, Result};
pub use graph::{Application, Graph, ServicePrincipal};
pub use kubeconfig::{CredentialKind, KubeconfigDocument};
pub use resource_group::ResourceGroup;
pub use subscription::{ResourceGroupInfo, Subscription};

/// Configuration for the ARM and Graph endpoints and call behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ArmConfig {
    /// Resource manager base URL.
    #[serde(default = "ArmConfig::default_resource_manager_url")]
    pub resource_manager_url: String,

    /// Microsoft Graph base URL.
    #[serde(default = "ArmConfig::default_graph_url")]
    pub graph_url: String,

    /// `api-version` for `Microsoft.ContainerService`.
    #[serde(default = "ArmConfig::default_container_service_api_version")]
    pub container_service_api_version: String,

    /// `api-version` for resource groups.
    #[serde(default = "ArmConfig::default_resource_api_version")]
    pub resource_api_version: String,

    /// `api-version` for `Microsoft.Authorization`.
    #[serde(default = "ArmConfig::default_authorization_api_version")]
    pub authorization_api_version: String,

    /// Per-request timeout in seconds.
    #[serde(default = "ArmConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Attempts for a cluster create racing service principal replication.
    #[serde(default = "ArmConfig::default_create_max_attempts")]
    pub create_max_attempts: u32,

    /// Seconds between those attempts.
    #[serde(default = "ArmConfig::default_create_retry_delay")]
    pub create_retry_delay_seconds: u64,

    /// Seconds between provisioning-state polls.
    #[serde(default = "ArmConfig::default_provisioning_poll")]
    pub provisioning_poll_seconds: u64,
}

impl ArmConfig {
    fn default_resource_manager_url() -> String {
        "https://management.azure.com".to_string()
    }

    fn default_graph_url() -> String {
        "https://graph.microsoft.com".to_string()
    }

    fn default_container_service_api_version() -> String {
        "2024-05-01".to_string()
    }

    fn default_resource_api_version() -> String {
        "2021-04-01".to_string()
    }

    fn default_authorization_api_version() -> String {
        "2022-04-01".to_string()
    }

    const fn default_request_timeout() -> u64 {
        60
    }

    const fn default_create_max_attempts() -> u32 {
        aks_kit_core::consistency::DEFAULT_MAX_ATTEMPTS
    }

    const fn default_create_retry_delay() -> u64 {
        5
    }

    const fn default_provisioning_poll() -> u64 {
        15
    }

    /// Load defaults overlaid with `AKSKIT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn from_env() -> aks_kit_core::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ArmConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> aks_kit_core::Result<Self> {
        fn number<T: std::str::FromStr>(key: &str, value: &str) -> aks_kit_core::Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| CoreError::Config(format!("{key} must be a number, got {value:?}")))
        }

        let mut config = Self::default();
        if let Some(v) = lookup("AKSKIT_RESOURCE_MANAGER_URL") {
            config.resource_manager_url = v;
        }
        if let Some(v) = lookup("AKSKIT_GRAPH_URL") {
            config.graph_url = v;
        }
        if let Some(v) = lookup("AKSKIT_CONTAINER_SERVICE_API_VERSION") {
            config.container_service_api_version = v;
        }
        if let Some(v) = lookup("AKSKIT_REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = number("AKSKIT_REQUEST_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("AKSKIT_CREATE_MAX_ATTEMPTS") {
            config.create_max_attempts = number("AKSKIT_CREATE_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("AKSKIT_CREATE_RETRY_DELAY_SECONDS") {
            config.create_retry_delay_seconds = number("AKSKIT_CREATE_RETRY_DELAY_SECONDS", &v)?;
        }
        if let Some(v) = lookup("AKSKIT_PROVISIONING_POLL_SECONDS") {
            config.provisioning_poll_seconds = number("AKSKIT_PROVISIONING_POLL_SECONDS", &v)?;
        }
        Ok(config)
    }

    /// Token scope for the resource manager.
    #[must_use]
    pub fn resource_manager_scope(&self) -> String {
        format!("{}/.default", self.resource_manager_url.trim_end_matches('/'))
    }

    /// Token scope for Microsoft Graph.
    #[must_use]
    pub fn graph_scope(&self) -> String {
        format!("{}/.default", self.graph_url.trim_end_matches('/'))
    }

    /// Absolute resource manager URL for `path`.
    #[must_use]
    pub fn arm_url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.resource_manager_url.trim_end_matches('/'),
            path,
            api_version
        )
    }

    /// Absolute Graph URL for `path`.
    #[must_use]
    pub fn graph_endpoint(&self, path: &str) -> String {
        format!("{}/v1.0{}", self.graph_url.trim_end_matches('/'), path)
    }

    /// Policy for the cluster create guard.
    #[must_use]
    pub fn create_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.create_max_attempts,
            Duration::from_secs(self.create_retry_delay_seconds),
        )
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get the provisioning poll interval as a `Duration`.
    #[must_use]
    pub fn provisioning_poll(&self) -> Duration {
        Duration::from_secs(self.provisioning_poll_seconds)
    }
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            resource_manager_url: Self::default_resource_manager_url(),
            graph_url: Self::default_graph_url(),
            container_service_api_version: Self::default_container_service_api_version(),
            resource_api_version: Self::default_resource_api_version(),
            authorization_api_version: Self::default_authorization_api_version(),
            request_timeout_seconds: Self::default_request_timeout(),
            create_max_attempts: Self::default_create_max_attempts(),
            create_retry_delay_seconds: Self::default_create_retry_delay(),
            provisioning_poll_seconds: Self::default_provisioning_poll(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config() {
        let config = ArmConfig::default();
        assert_eq!(config.resource_manager_url, "https://management.azure.com");
        assert_eq!(config.create_max_attempts, 20);
        assert_eq!(
            config.create_retry_policy(),
            RetryPolicy::new(20, Duration::from_secs(5))
        );
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn config_urls() {
        let config = ArmConfig::default();
        assert_eq!(
            config.resource_manager_scope(),
            "https://management.azure.com/.default"
        );
        assert_eq!(config.graph_scope(), "https://graph.microsoft.com/.default");
        assert_eq!(
            config.arm_url("/subscriptions/abc/resourcegroups/rg", "2021-04-01"),
            "https://management.azure.com/subscriptions/abc/resourcegroups/rg?api-version=2021-04-01"
        );
        assert_eq!(
            config.graph_endpoint("/applications"),
            "https://graph.microsoft.com/v1.0/applications"
        );
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: ArmConfig =
            serde_json::from_str(r#"{"create_max_attempts": 3, "graph_url": "http://graph"}"#)
                .unwrap();
        assert_eq!(config.create_max_attempts, 3);
        assert_eq!(config.graph_url, "http://graph");
        assert_eq!(config.container_service_api_version, "2024-05-01");
    }

    #[test]
    fn env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("AKSKIT_RESOURCE_MANAGER_URL", "http://localhost:9999/"),
            ("AKSKIT_CREATE_RETRY_DELAY_SECONDS", "1"),
        ]
        .into_iter()
        .collect();
        let config =
            ArmConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.create_retry_policy().delay(), Duration::from_secs(1));
        assert_eq!(
            config.arm_url("/x", "1"),
            "http://localhost:9999/x?api-version=1"
        );
    }

    #[test]
    fn env_overlay_rejects_bad_numbers() {
        let result = ArmConfig::from_lookup(|k| {
            (k == "AKSKIT_CREATE_MAX_ATTEMPTS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
