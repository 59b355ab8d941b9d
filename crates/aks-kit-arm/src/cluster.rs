//! Managed cluster and agent pool models.
//!
//! Request bodies are built from typed specs; responses are kept as the raw
//! server JSON with typed accessors for the fields callers usually need.

use std::collections::BTreeMap;
use std::fmt;

use aks_kit_core::AgentPoolName;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ArmError, Result};

/// Whether a pool may host system pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPoolMode {
    /// Hosts critical system pods; every cluster needs one.
    System,
    /// Application workloads only.
    User,
}

/// One agent pool in a cluster create request, or a standalone pool update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProfile {
    /// Pool name.
    pub name: AgentPoolName,
    /// Node count.
    pub count: u32,
    /// VM SKU, e.g. `Standard_D4s_v5`.
    pub vm_size: String,
    /// OS disk size; the service default when unset.
    #[serde(rename = "osDiskSizeGB", skip_serializing_if = "Option::is_none")]
    pub os_disk_size_gb: Option<u32>,
    /// System or user pool.
    pub mode: AgentPoolMode,
    /// Node OS type.
    pub os_type: String,
    /// Maximum pods per node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<u32>,
    /// Kubernetes version of the pool's nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator_version: Option<String>,
    #[serde(rename = "type")]
    pool_type: &'static str,
}

impl AgentPoolProfile {
    fn new(name: AgentPoolName, count: u32, vm_size: &str, mode: AgentPoolMode) -> Self {
        Self {
            name,
            count,
            vm_size: vm_size.to_string(),
            os_disk_size_gb: None,
            mode,
            os_type: "Linux".to_string(),
            max_pods: None,
            orchestrator_version: None,
            pool_type: "VirtualMachineScaleSets",
        }
    }

    /// A Linux system pool on scale sets.
    #[must_use]
    pub fn system(name: AgentPoolName, count: u32, vm_size: &str) -> Self {
        Self::new(name, count, vm_size, AgentPoolMode::System)
    }

    /// A Linux user pool on scale sets.
    #[must_use]
    pub fn user(name: AgentPoolName, count: u32, vm_size: &str) -> Self {
        Self::new(name, count, vm_size, AgentPoolMode::User)
    }

    /// Set the OS disk size.
    #[must_use]
    pub fn os_disk_size_gb(mut self, size: u32) -> Self {
        self.os_disk_size_gb = Some(size);
        self
    }

    /// Set the maximum pods per node.
    #[must_use]
    pub fn max_pods(mut self, max_pods: u32) -> Self {
        self.max_pods = Some(max_pods);
        self
    }

    /// Body for a standalone agent pool PUT: the profile minus its name,
    /// wrapped in `properties`.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be serialized.
    pub fn to_pool_body(&self) -> Result<Value> {
        let mut properties =
            serde_json::to_value(self).map_err(|e| ArmError::InvalidRequest(e.to_string()))?;
        if let Some(map) = properties.as_object_mut() {
            map.remove("name");
        }
        Ok(json!({ "properties": properties }))
    }
}

/// Service principal a cluster authenticates to Azure with.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipalProfile {
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub secret: String,
}

impl fmt::Debug for ServicePrincipalProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipalProfile")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// SSH access to the cluster's Linux nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxProfile {
    /// Admin user created on every node.
    pub admin_username: String,
    /// OpenSSH public key authorised for that user.
    pub ssh_public_key: String,
}

/// Desired state of a managed cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedClusterSpec {
    /// Azure region.
    pub location: String,
    /// DNS prefix of the API server FQDN.
    pub dns_prefix: String,
    /// Kubernetes version; the service default when unset.
    pub kubernetes_version: Option<String>,
    /// Node pools; at least one system pool is required.
    pub agent_pools: Vec<AgentPoolProfile>,
    /// Node SSH access.
    pub linux_profile: Option<LinuxProfile>,
    /// Service principal; a system-assigned identity is used when unset.
    pub service_principal: Option<ServicePrincipalProfile>,
    /// `azure` or `kubenet`; the service default when unset.
    pub network_plugin: Option<String>,
    /// Kubernetes RBAC.
    pub enable_rbac: bool,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
}

impl ManagedClusterSpec {
    /// Start a spec with no pools.
    #[must_use]
    pub fn new(location: impl Into<String>, dns_prefix: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            dns_prefix: dns_prefix.into(),
            kubernetes_version: None,
            agent_pools: Vec::new(),
            linux_profile: None,
            service_principal: None,
            network_plugin: None,
            enable_rbac: true,
            tags: BTreeMap::new(),
        }
    }

    /// Add an agent pool.
    #[must_use]
    pub fn agent_pool(mut self, pool: AgentPoolProfile) -> Self {
        self.agent_pools.push(pool);
        self
    }

    /// Pin the Kubernetes version.
    #[must_use]
    pub fn kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version = Some(version.into());
        self
    }

    /// Authenticate the cluster with a service principal.
    #[must_use]
    pub fn service_principal(mut self, profile: ServicePrincipalProfile) -> Self {
        self.service_principal = Some(profile);
        self
    }

    /// Allow SSH to the nodes.
    #[must_use]
    pub fn linux_profile(mut self, admin_username: impl Into<String>, ssh_public_key: impl Into<String>) -> Self {
        self.linux_profile = Some(LinuxProfile {
            admin_username: admin_username.into(),
            ssh_public_key: ssh_public_key.into(),
        });
        self
    }

    /// Select the network plugin.
    #[must_use]
    pub fn network_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.network_plugin = Some(plugin.into());
        self
    }

    /// Add a resource tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Check the spec before sending it.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::InvalidRequest` if there is no system pool, a pool
    /// name repeats, or a pool has zero nodes.
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(ArmError::InvalidRequest("location is required".to_string()));
        }
        if self.dns_prefix.trim().is_empty() {
            return Err(ArmError::InvalidRequest("dns prefix is required".to_string()));
        }
        if !self
            .agent_pools
            .iter()
            .any(|p| p.mode == AgentPoolMode::System)
        {
            return Err(ArmError::InvalidRequest(
                "at least one system agent pool is required".to_string(),
            ));
        }
        for (i, pool) in self.agent_pools.iter().enumerate() {
            if pool.count == 0 {
                return Err(ArmError::InvalidRequest(format!(
                    "agent pool {} must have at least one node",
                    pool.name
                )));
            }
            if self.agent_pools[..i].iter().any(|p| p.name == pool.name) {
                return Err(ArmError::InvalidRequest(format!(
                    "agent pool {} is listed twice",
                    pool.name
                )));
            }
        }
        Ok(())
    }

    /// The ARM request body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        let mut properties = json!({
            "dnsPrefix": self.dns_prefix,
            "agentPoolProfiles": self.agent_pools,
            "enableRBAC": self.enable_rbac,
        });

        if let Some(version) = &self.kubernetes_version {
            properties["kubernetesVersion"] = json!(version);
        }
        if let Some(linux) = &self.linux_profile {
            properties["linuxProfile"] = json!({
                "adminUsername": linux.admin_username,
                "ssh": { "publicKeys": [{ "keyData": linux.ssh_public_key }] },
            });
        }
        if let Some(plugin) = &self.network_plugin {
            properties["networkProfile"] = json!({ "networkPlugin": plugin });
        }

        let mut body = json!({
            "location": self.location,
            "tags": self.tags,
        });
        match &self.service_principal {
            Some(sp) => properties["servicePrincipalProfile"] = json!(sp),
            None => body["identity"] = json!({ "type": "SystemAssigned" }),
        }
        body["properties"] = properties;
        body
    }
}

/// Provisioning state reported by the resource manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    /// The last operation finished.
    Succeeded,
    /// The last operation failed.
    Failed,
    /// The last operation was cancelled.
    Canceled,
    /// Any in-flight state (`Creating`, `Updating`, `Deleting`, ...).
    InProgress(String),
}

impl ProvisioningState {
    /// Whether no further transitions are expected without a new operation.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress(_))
    }
}

impl From<&str> for ProvisioningState {
    fn from(value: &str) -> Self {
        match value {
            s if s.eq_ignore_ascii_case("Succeeded") => Self::Succeeded,
            s if s.eq_ignore_ascii_case("Failed") => Self::Failed,
            s if s.eq_ignore_ascii_case("Canceled") => Self::Canceled,
            other => Self::InProgress(other.to_string()),
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("Succeeded"),
            Self::Failed => f.write_str("Failed"),
            Self::Canceled => f.write_str("Canceled"),
            Self::InProgress(s) => f.write_str(s),
        }
    }
}

fn str_at<'a>(raw: &'a Value, pointer: &str) -> Option<&'a str> {
    raw.pointer(pointer).and_then(Value::as_str)
}

/// A managed cluster as returned by the resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagedCluster {
    raw: Value,
}

impl ManagedCluster {
    /// Full ARM resource id.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        str_at(&self.raw, "/id")
    }

    /// Cluster name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        str_at(&self.raw, "/name")
    }

    /// Azure region.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        str_at(&self.raw, "/location")
    }

    /// Current provisioning state, if reported.
    #[must_use]
    pub fn provisioning_state(&self) -> Option<ProvisioningState> {
        str_at(&self.raw, "/properties/provisioningState").map(ProvisioningState::from)
    }

    /// `Running` or `Stopped`.
    #[must_use]
    pub fn power_state(&self) -> Option<&str> {
        str_at(&self.raw, "/properties/powerState/code")
    }

    /// API server FQDN.
    #[must_use]
    pub fn fqdn(&self) -> Option<&str> {
        str_at(&self.raw, "/properties/fqdn")
    }

    /// Kubernetes version.
    #[must_use]
    pub fn kubernetes_version(&self) -> Option<&str> {
        str_at(&self.raw, "/properties/kubernetesVersion")
    }

    /// Client id of the cluster's service principal; `msi` for managed identity.
    #[must_use]
    pub fn service_principal_client_id(&self) -> Option<&str> {
        str_at(&self.raw, "/properties/servicePrincipalProfile/clientId")
    }

    /// Resource group holding the cluster's nodes.
    #[must_use]
    pub fn node_resource_group(&self) -> Option<&str> {
        str_at(&self.raw, "/properties/nodeResourceGroup")
    }

    /// Agent pools embedded in the cluster document.
    #[must_use]
    pub fn agent_pools(&self) -> Vec<AgentPool> {
        self.raw
            .pointer("/properties/agentPoolProfiles")
            .and_then(Value::as_array)
            .map(|pools| {
                pools
                    .iter()
                    .map(|p| AgentPool {
                        raw: json!({ "name": p.get("name"), "properties": p }),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The full server document.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// An agent pool as returned by the resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentPool {
    raw: Value,
}

impl AgentPool {
    /// Pool name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        str_at(&self.raw, "/name")
    }

    /// Node count.
    #[must_use]
    pub fn count(&self) -> Option<u32> {
        self.raw
            .pointer("/properties/count")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
    }

    /// VM SKU.
    #[must_use]
    pub fn vm_size(&self) -> Option<&str> {
        str_at(&self.raw, "/properties/vmSize")
    }

    /// System or user pool.
    #[must_use]
    pub fn mode(&self) -> Option<AgentPoolMode> {
        match str_at(&self.raw, "/properties/mode")? {
            "System" => Some(AgentPoolMode::System),
            "User" => Some(AgentPoolMode::User),
            _ => None,
        }
    }

    /// Current provisioning state, if reported.
    #[must_use]
    pub fn provisioning_state(&self) -> Option<ProvisioningState> {
        str_at(&self.raw, "/properties/provisioningState").map(ProvisioningState::from)
    }

    /// Body for a PUT that keeps every property but the node count, with
    /// read-only fields dropped.
    #[must_use]
    pub fn scaled_body(&self, count: u32) -> Value {
        let mut properties = self
            .raw
            .get("properties")
            .cloned()
            .unwrap_or_else(|| json!({}));
        if let Some(map) = properties.as_object_mut() {
            for read_only in ["provisioningState", "powerState", "nodeImageVersion", "currentOrchestratorVersion"] {
                map.remove(read_only);
            }
            map.insert("count".to_string(), json!(count));
        }
        json!({ "properties": properties })
    }

    /// The full server document.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str) -> AgentPoolName {
        name.parse().unwrap()
    }

    fn spec() -> ManagedClusterSpec {
        ManagedClusterSpec::new("westeurope", "aks-demo")
            .agent_pool(AgentPoolProfile::system(pool("system"), 3, "Standard_D4s_v5").os_disk_size_gb(128))
            .tag("env", "test")
    }

    #[test]
    fn body_uses_managed_identity_without_principal() {
        let body = spec().to_body();
        assert_eq!(body["location"], "westeurope");
        assert_eq!(body["identity"]["type"], "SystemAssigned");
        assert_eq!(body["tags"]["env"], "test");

        let pool = &body["properties"]["agentPoolProfiles"][0];
        assert_eq!(pool["name"], "system");
        assert_eq!(pool["vmSize"], "Standard_D4s_v5");
        assert_eq!(pool["osDiskSizeGB"], 128);
        assert_eq!(pool["mode"], "System");
        assert_eq!(pool["type"], "VirtualMachineScaleSets");
        assert!(pool.get("maxPods").is_none());
        assert!(body["properties"].get("servicePrincipalProfile").is_none());
    }

    #[test]
    fn body_with_principal_and_linux_profile() {
        let body = spec()
            .service_principal(ServicePrincipalProfile {
                client_id: "app-id".to_string(),
                secret: "s3cret".to_string(),
            })
            .linux_profile("azureuser", "ssh-ed25519 AAAA")
            .kubernetes_version("1.29.4")
            .network_plugin("azure")
            .to_body();

        let props = &body["properties"];
        assert!(body.get("identity").is_none());
        assert_eq!(props["servicePrincipalProfile"]["clientId"], "app-id");
        assert_eq!(props["servicePrincipalProfile"]["secret"], "s3cret");
        assert_eq!(props["linuxProfile"]["ssh"]["publicKeys"][0]["keyData"], "ssh-ed25519 AAAA");
        assert_eq!(props["kubernetesVersion"], "1.29.4");
        assert_eq!(props["networkProfile"]["networkPlugin"], "azure");
        assert_eq!(props["enableRBAC"], true);
    }

    #[test]
    fn principal_debug_hides_secret() {
        let profile = ServicePrincipalProfile {
            client_id: "app-id".to_string(),
            secret: "s3cret".to_string(),
        };
        assert!(!format!("{profile:?}").contains("s3cret"));
    }

    #[test]
    fn validation() {
        assert!(spec().validate().is_ok());

        let no_system = ManagedClusterSpec::new("westeurope", "x")
            .agent_pool(AgentPoolProfile::user(pool("user"), 1, "Standard_D2s_v5"));
        assert!(no_system.validate().is_err());

        let duplicate = spec().agent_pool(AgentPoolProfile::user(pool("system"), 1, "Standard_D2s_v5"));
        assert!(duplicate.validate().unwrap_err().to_string().contains("twice"));

        let empty = ManagedClusterSpec::new("westeurope", "x")
            .agent_pool(AgentPoolProfile::system(pool("system"), 0, "Standard_D2s_v5"));
        assert!(empty.validate().is_err());

        let no_location = ManagedClusterSpec::new(" ", "x")
            .agent_pool(AgentPoolProfile::system(pool("system"), 1, "Standard_D2s_v5"));
        assert!(no_location.validate().is_err());
    }

    #[test]
    fn pool_body_drops_name() {
        let body = AgentPoolProfile::user(pool("gpu"), 2, "Standard_NC6s_v3")
            .max_pods(50)
            .to_pool_body()
            .unwrap();
        assert!(body["properties"].get("name").is_none());
        assert_eq!(body["properties"]["count"], 2);
        assert_eq!(body["properties"]["maxPods"], 50);
        assert_eq!(body["properties"]["mode"], "User");
    }

    #[test]
    fn cluster_accessors() {
        let cluster: ManagedCluster = serde_json::from_value(json!({
            "id": "/subscriptions/s/resourcegroups/rg/providers/Microsoft.ContainerService/managedClusters/aks-demo",
            "name": "aks-demo",
            "location": "westeurope",
            "properties": {
                "provisioningState": "Creating",
                "powerState": {"code": "Running"},
                "kubernetesVersion": "1.29.4",
                "fqdn": "aks-demo-abc.hcp.westeurope.azmk8s.io",
                "nodeResourceGroup": "MC_rg_aks-demo_westeurope",
                "servicePrincipalProfile": {"clientId": "app-id"},
                "agentPoolProfiles": [{"name": "system", "count": 3, "mode": "System", "vmSize": "Standard_D4s_v5"}]
            }
        }))
        .unwrap();

        assert_eq!(cluster.name(), Some("aks-demo"));
        assert_eq!(cluster.location(), Some("westeurope"));
        assert_eq!(
            cluster.provisioning_state(),
            Some(ProvisioningState::InProgress("Creating".to_string()))
        );
        assert_eq!(cluster.power_state(), Some("Running"));
        assert_eq!(cluster.kubernetes_version(), Some("1.29.4"));
        assert_eq!(cluster.service_principal_client_id(), Some("app-id"));
        assert_eq!(cluster.node_resource_group(), Some("MC_rg_aks-demo_westeurope"));
        assert!(cluster.fqdn().unwrap().ends_with("azmk8s.io"));

        let pools = cluster.agent_pools();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name(), Some("system"));
        assert_eq!(pools[0].count(), Some(3));
        assert_eq!(pools[0].mode(), Some(AgentPoolMode::System));
    }

    #[test]
    fn provisioning_states() {
        assert_eq!(ProvisioningState::from("Succeeded"), ProvisioningState::Succeeded);
        assert_eq!(ProvisioningState::from("failed"), ProvisioningState::Failed);
        assert!(ProvisioningState::from("Canceled").is_terminal());
        assert!(!ProvisioningState::from("Updating").is_terminal());
        assert_eq!(ProvisioningState::from("Deleting").to_string(), "Deleting");
    }

    #[test]
    fn scaled_body_keeps_settings() {
        let pool: AgentPool = serde_json::from_value(json!({
            "name": "user",
            "properties": {
                "count": 2,
                "vmSize": "Standard_D2s_v5",
                "mode": "User",
                "provisioningState": "Succeeded",
                "nodeImageVersion": "AKSUbuntu-2204gen2containerd-202405.03.0"
            }
        }))
        .unwrap();

        let body = pool.scaled_body(5);
        assert_eq!(body["properties"]["count"], 5);
        assert_eq!(body["properties"]["vmSize"], "Standard_D2s_v5");
        assert!(body["properties"].get("provisioningState").is_none());
        assert!(body["properties"].get("nodeImageVersion").is_none());
    }
}
