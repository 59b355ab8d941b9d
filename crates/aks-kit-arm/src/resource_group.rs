//! Operations scoped to one resource group: clusters, agent pools, cluster
//! credentials and role assignments.

use aks_kit_core::{AgentPoolName, ClusterName, CreateGuard, ResourceGroupName, SubscriptionId};
use serde_json::json;

use crate::client::{ArmClient, Audience};
use crate::cluster::{
    AgentPool, AgentPoolMode, AgentPoolProfile, ManagedCluster, ManagedClusterSpec,
    ProvisioningState, ServicePrincipalProfile,
};
use crate::error::{ArmError, Result};
use crate::kubeconfig::{CredentialKind, CredentialResults, KubeconfigDocument};

/// Built-in `Network Contributor` role.
const NETWORK_CONTRIBUTOR_ROLE_ID: &str = "4d97b98b-1d4f-4787-a291-c67834d212e7";

/// Handle to a resource group. Creating one makes no remote call.
#[derive(Clone)]
pub struct ResourceGroup {
    client: ArmClient,
    subscription: SubscriptionId,
    name: ResourceGroupName,
}

impl ResourceGroup {
    pub(crate) fn new(client: ArmClient, subscription: SubscriptionId, name: ResourceGroupName) -> Self {
        Self {
            client,
            subscription,
            name,
        }
    }

    /// The group's name.
    #[must_use]
    pub fn name(&self) -> &ResourceGroupName {
        &self.name
    }

    /// The subscription the group lives in.
    #[must_use]
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription
    }

    /// ARM id of the group; the scope for role assignments.
    #[must_use]
    pub fn scope(&self) -> String {
        format!("/subscriptions/{}/resourceGroups/{}", self.subscription, self.name)
    }

    fn clusters_path(&self) -> String {
        format!("{}/providers/Microsoft.ContainerService/managedClusters", self.scope())
    }

    fn cluster_url(&self, cluster: &ClusterName, suffix: &str) -> String {
        let config = self.client.config();
        config.arm_url(
            &format!("{}/{cluster}{suffix}", self.clusters_path()),
            &config.container_service_api_version,
        )
    }

    fn pool_url(&self, cluster: &ClusterName, pool: Option<&AgentPoolName>) -> String {
        let suffix = match pool {
            Some(pool) => format!("/agentPools/{pool}"),
            None => "/agentPools".to_string(),
        };
        self.cluster_url(cluster, &suffix)
    }

    // Clusters

    /// Create or update a managed cluster.
    ///
    /// A service principal created moments earlier is often not yet visible
    /// to the resource manager, so failures that mention the service
    /// principal are retried under the configured policy. Any other failure
    /// is returned immediately.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::InvalidRequest` if the spec is invalid, otherwise
    /// the error of the last attempt.
    pub async fn create_managed_cluster(
        &self,
        name: &ClusterName,
        spec: &ManagedClusterSpec,
    ) -> Result<ManagedCluster> {
        spec.validate()?;
        let url = self.cluster_url(name, "");
        let body = spec.to_body();

        let guard = CreateGuard::new(
            self.client.config().create_retry_policy(),
            ArmError::is_service_principal_propagation,
        );
        let cluster: ManagedCluster = guard
            .run(|| self.client.put(Audience::ResourceManager, &url, &body))
            .await?;

        tracing::info!(
            resource_group = %self.name,
            cluster = %name,
            state = ?cluster.provisioning_state(),
            "Managed cluster create accepted"
        );
        Ok(cluster)
    }

    /// Fetch a managed cluster.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::NotFound` if it does not exist.
    pub async fn get_managed_cluster(&self, name: &ClusterName) -> Result<ManagedCluster> {
        self.client
            .get(Audience::ResourceManager, &self.cluster_url(name, ""))
            .await
    }

    /// List the group's managed clusters.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>> {
        let config = self.client.config();
        let url = config.arm_url(&self.clusters_path(), &config.container_service_api_version);
        self.client.list(&url).await
    }

    /// Start deleting a managed cluster. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete_managed_cluster(&self, name: &ClusterName) -> Result<bool> {
        let existed = self
            .client
            .delete(Audience::ResourceManager, &self.cluster_url(name, ""))
            .await?;
        tracing::info!(resource_group = %self.name, cluster = %name, existed, "Managed cluster delete requested");
        Ok(existed)
    }

    /// Poll a cluster until provisioning finishes.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::Provisioning` if it ends `Failed` or `Canceled`, and
    /// `ArmError::Timeout` if it is still in progress after `max_polls` reads.
    pub async fn wait_for_cluster(&self, name: &ClusterName, max_polls: u32) -> Result<ManagedCluster> {
        let interval = self.client.config().provisioning_poll();

        for poll in 1..=max_polls.max(1) {
            let cluster = self.get_managed_cluster(name).await?;
            match cluster.provisioning_state() {
                Some(ProvisioningState::Succeeded) => return Ok(cluster),
                Some(state) if state.is_terminal() => {
                    return Err(ArmError::Provisioning {
                        resource: format!("managed cluster {name}"),
                        state: state.to_string(),
                    });
                }
                state => {
                    tracing::debug!(cluster = %name, poll, state = ?state, "Cluster still provisioning");
                }
            }
            if poll < max_polls {
                tokio::time::sleep(interval).await;
            }
        }

        Err(ArmError::Timeout(format!("managed cluster {name}")))
    }

    /// Replace the service principal a cluster authenticates with.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn reset_service_principal(
        &self,
        cluster: &ClusterName,
        profile: &ServicePrincipalProfile,
    ) -> Result<()> {
        let url = self.cluster_url(cluster, "/resetServicePrincipalProfile");
        self.client
            .post_accepted(Audience::ResourceManager, &url, profile)
            .await?;
        tracing::info!(cluster = %cluster, client_id = %profile.client_id, "Service principal reset requested");
        Ok(())
    }

    /// Fetch the cluster's kubeconfigs.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or a kubeconfig does not decode.
    pub async fn cluster_credentials(
        &self,
        cluster: &ClusterName,
        kind: CredentialKind,
    ) -> Result<Vec<KubeconfigDocument>> {
        let url = self.cluster_url(cluster, &format!("/{}", kind.action()));
        let results: CredentialResults = self
            .client
            .post(Audience::ResourceManager, &url, &json!({}))
            .await?;
        KubeconfigDocument::from_results(results)
    }

    /// The first kubeconfig of [`ResourceGroup::cluster_credentials`].
    ///
    /// # Errors
    ///
    /// Returns `ArmError::InvalidResponse` if the service returned none.
    pub async fn kubeconfig(&self, cluster: &ClusterName, kind: CredentialKind) -> Result<KubeconfigDocument> {
        self.cluster_credentials(cluster, kind)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ArmError::InvalidResponse(format!("no kubeconfig returned for {cluster}")))
    }

    // Agent pools

    /// List a cluster's agent pools.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_agent_pools(&self, cluster: &ClusterName) -> Result<Vec<AgentPool>> {
        self.client.list(&self.pool_url(cluster, None)).await
    }

    /// Fetch one agent pool.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::NotFound` if it does not exist.
    pub async fn get_agent_pool(&self, cluster: &ClusterName, pool: &AgentPoolName) -> Result<AgentPool> {
        self.client
            .get(Audience::ResourceManager, &self.pool_url(cluster, Some(pool)))
            .await
    }

    /// Create an agent pool, or update it to match `profile`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn create_or_update_agent_pool(
        &self,
        cluster: &ClusterName,
        profile: &AgentPoolProfile,
    ) -> Result<AgentPool> {
        if profile.count == 0 && profile.mode == AgentPoolMode::System {
            return Err(ArmError::InvalidRequest(format!(
                "system agent pool {} needs at least one node",
                profile.name
            )));
        }
        let url = self.pool_url(cluster, Some(&profile.name));
        self.client
            .put(Audience::ResourceManager, &url, &profile.to_pool_body()?)
            .await
    }

    /// Change a pool's node count, keeping its other settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool does not exist or the update fails.
    pub async fn scale_agent_pool(
        &self,
        cluster: &ClusterName,
        pool: &AgentPoolName,
        count: u32,
    ) -> Result<AgentPool> {
        let current = self.get_agent_pool(cluster, pool).await?;
        if count == 0 && current.mode() == Some(AgentPoolMode::System) {
            return Err(ArmError::InvalidRequest(format!(
                "system agent pool {pool} cannot scale to zero"
            )));
        }

        let url = self.pool_url(cluster, Some(pool));
        let updated: AgentPool = self
            .client
            .put(Audience::ResourceManager, &url, &current.scaled_body(count))
            .await?;
        tracing::info!(cluster = %cluster, pool = %pool, from = ?current.count(), to = count, "Agent pool scale requested");
        Ok(updated)
    }

    /// Start deleting an agent pool. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete_agent_pool(&self, cluster: &ClusterName, pool: &AgentPoolName) -> Result<bool> {
        self.client
            .delete(Audience::ResourceManager, &self.pool_url(cluster, Some(pool)))
            .await
    }

    // Role assignments

    /// Grant `Network Contributor` on this group to a service principal, so a
    /// cluster using it can manage load balancers and IPs in the group.
    ///
    /// # Errors
    ///
    /// Returns an error if the assignment fails.
    pub async fn assign_network_contributor(&self, principal_object_id: &str) -> Result<()> {
        self.assign_role(principal_object_id, NETWORK_CONTRIBUTOR_ROLE_ID)
            .await
    }

    /// Grant a built-in or custom role on this group to a service principal.
    ///
    /// A principal the authorization service cannot see yet is retried under
    /// the create policy. An existing identical assignment counts as success.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn assign_role(&self, principal_object_id: &str, role_definition_id: &str) -> Result<()> {
        let config = self.client.config();
        let assignment = uuid::Uuid::new_v4();
        let url = config.arm_url(
            &format!(
                "{}/providers/Microsoft.Authorization/roleAssignments/{assignment}",
                self.scope()
            ),
            &config.authorization_api_version,
        );
        let body = json!({
            "properties": {
                "roleDefinitionId": format!(
                    "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{role_definition_id}",
                    self.subscription
                ),
                "principalId": principal_object_id,
                "principalType": "ServicePrincipal",
            }
        });

        let guard = CreateGuard::new(config.create_retry_policy(), ArmError::is_principal_propagation);
        let result: Result<serde_json::Value> = guard
            .run(|| self.client.put(Audience::ResourceManager, &url, &body))
            .await;

        match result {
            Ok(_) => {
                tracing::info!(principal_object_id, role_definition_id, scope = %self.scope(), "Role assigned");
                Ok(())
            }
            Err(e) if e.code() == Some("RoleAssignmentExists") => Ok(()),
            Err(e) => Err(e),
        }
    }
}
