//! Subscription-level operations.

use std::collections::BTreeMap;

use aks_kit_core::{ClusterName, ResourceGroupName, SubscriptionId};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::{ArmClient, Audience};
use crate::cluster::ManagedCluster;
use crate::error::{ArmError, Result};
use crate::graph::{Graph, ServicePrincipal};
use crate::resource_group::ResourceGroup;

/// A resource group as returned by the resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupInfo {
    /// Full ARM id.
    pub id: String,
    /// Group name.
    pub name: String,
    /// Azure region.
    pub location: String,
    /// Resource tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Provisioning state, e.g. `Succeeded` or `Deleting`.
    #[serde(default, rename = "properties", with = "provisioning")]
    pub provisioning_state: Option<String>,
}

mod provisioning {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Properties {
        #[serde(default)]
        provisioning_state: Option<String>,
    }

    pub(super) fn serialize<S: Serializer>(state: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        Properties {
            provisioning_state: state.clone(),
        }
        .serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Properties>::deserialize(deserializer)?.and_then(|p| p.provisioning_state))
    }
}

/// Handle to an Azure subscription.
#[derive(Clone)]
pub struct Subscription {
    client: ArmClient,
    id: SubscriptionId,
}

impl Subscription {
    /// Bind a client to a subscription. Makes no remote call.
    #[must_use]
    pub fn new(client: ArmClient, id: SubscriptionId) -> Self {
        Self { client, id }
    }

    /// The subscription id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Handle to a resource group in this subscription. Makes no remote call.
    #[must_use]
    pub fn resource_group(&self, name: ResourceGroupName) -> ResourceGroup {
        ResourceGroup::new(self.client.clone(), self.id, name)
    }

    /// Graph operations with this subscription's client.
    #[must_use]
    pub fn graph(&self) -> Graph {
        Graph::new(self.client.clone())
    }

    fn group_url(&self, name: Option<&ResourceGroupName>) -> String {
        let config = self.client.config();
        let path = match name {
            Some(name) => format!("/subscriptions/{}/resourcegroups/{name}", self.id),
            None => format!("/subscriptions/{}/resourcegroups", self.id),
        };
        config.arm_url(&path, &config.resource_api_version)
    }

    /// Create a resource group, or update its tags if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn create_resource_group(
        &self,
        name: &ResourceGroupName,
        location: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ResourceGroupInfo> {
        let info: ResourceGroupInfo = self
            .client
            .put(
                Audience::ResourceManager,
                &self.group_url(Some(name)),
                &json!({ "location": location, "tags": tags }),
            )
            .await?;
        tracing::info!(resource_group = %name, location, "Resource group ready");
        Ok(info)
    }

    /// Fetch a resource group.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::NotFound` if it does not exist.
    pub async fn get_resource_group(&self, name: &ResourceGroupName) -> Result<ResourceGroupInfo> {
        self.client
            .get(Audience::ResourceManager, &self.group_url(Some(name)))
            .await
    }

    /// List every resource group in the subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_resource_groups(&self) -> Result<Vec<ResourceGroupInfo>> {
        self.client.list(&self.group_url(None)).await
    }

    /// Start deleting a resource group and everything in it. Returns whether
    /// it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete_resource_group(&self, name: &ResourceGroupName) -> Result<bool> {
        let existed = self
            .client
            .delete(Audience::ResourceManager, &self.group_url(Some(name)))
            .await?;
        tracing::info!(resource_group = %name, existed, "Resource group delete requested");
        Ok(existed)
    }

    /// List managed clusters across every resource group.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>> {
        let config = self.client.config();
        let url = config.arm_url(
            &format!(
                "/subscriptions/{}/providers/Microsoft.ContainerService/managedClusters",
                self.id
            ),
            &config.container_service_api_version,
        );
        self.client.list(&url).await
    }

    /// Create a service principal for a cluster to run as.
    ///
    /// # Errors
    ///
    /// Returns an error if a Graph call fails.
    pub async fn create_service_principal(&self, display_name: &str) -> Result<ServicePrincipal> {
        self.graph().create_service_principal(display_name).await
    }

    /// Give a service principal a new secret and return the updated
    /// principal. Pass its [`ServicePrincipal::profile`] to
    /// [`ResourceGroup::reset_service_principal`] to move a cluster over.
    ///
    /// # Errors
    ///
    /// Returns an error if Graph rejects the request.
    pub async fn rotate_service_principal_secret(
        &self,
        principal: &ServicePrincipal,
    ) -> Result<ServicePrincipal> {
        let (secret, secret_expires_at) = self
            .graph()
            .rotate_secret(&principal.application_object_id)
            .await?;
        Ok(ServicePrincipal {
            secret,
            secret_expires_at,
            ..principal.clone()
        })
    }

    /// Give a cluster's service principal a new secret and switch the
    /// cluster over to it.
    ///
    /// The application is looked up by `application_object_id` when given,
    /// otherwise by the cluster's client id. Either way its app id must be
    /// the cluster's client id before any secret is added.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::InvalidRequest` if the cluster runs as a managed
    /// identity or the application belongs to a different principal, and
    /// any error from Graph or the resource manager.
    pub async fn rotate_cluster_credentials(
        &self,
        group: &ResourceGroupName,
        cluster: &ClusterName,
        application_object_id: Option<&str>,
    ) -> Result<ServicePrincipal> {
        let group = self.resource_group(group.clone());
        let managed = group.get_managed_cluster(cluster).await?;
        let client_id = managed
            .service_principal_client_id()
            .filter(|id| !id.eq_ignore_ascii_case("msi"))
            .ok_or_else(|| {
                ArmError::InvalidRequest(format!("cluster {cluster} does not use a service principal"))
            })?
            .to_string();

        let graph = self.graph();
        let application = match application_object_id {
            Some(object_id) => graph.get_application(object_id).await?,
            None => graph.find_application(&client_id).await?,
        };
        if !application.app_id.eq_ignore_ascii_case(&client_id) {
            return Err(ArmError::InvalidRequest(format!(
                "application {} has app id {}, but cluster {cluster} runs as {client_id}",
                application.object_id, application.app_id
            )));
        }

        let current = ServicePrincipal {
            object_id: graph.service_principal_object_id(&application.app_id).await?,
            app_id: client_id,
            application_object_id: application.object_id,
            secret: String::new(),
            secret_expires_at: None,
        };
        let rotated = self.rotate_service_principal_secret(&current).await?;
        group.reset_service_principal(cluster, &rotated.profile()).await?;
        tracing::info!(
            resource_group = %group.name(),
            cluster = %cluster,
            app_id = %rotated.app_id,
            "Rotated cluster credentials"
        );
        Ok(rotated)
    }
}
