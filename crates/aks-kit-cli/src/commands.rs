//! Subcommand handlers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use aks_kit_arm::{
    AgentPool, AgentPoolProfile, CredentialKind, ManagedCluster, ManagedClusterSpec,
    ResourceGroupInfo, ServicePrincipal, Subscription,
};
use aks_kit_tools::{node_is_ready, Kubectl, ProcessRunner};
use anyhow::Context as _;
use clap::Args;
use serde_json::{json, Value};

use crate::{ClusterCommand, ClusterTarget, Command, GroupCommand, NodepoolCommand};

/// Polls made by `cluster create --wait` before giving up.
const WAIT_MAX_POLLS: u32 = 120;

#[derive(Args, Debug)]
pub(crate) struct CreateClusterArgs {
    #[command(flatten)]
    pub(crate) target: ClusterTarget,

    /// Azure region.
    #[arg(long)]
    pub(crate) location: String,

    /// DNS prefix; defaults to the cluster name.
    #[arg(long)]
    pub(crate) dns_prefix: Option<String>,

    /// Kubernetes version; the service default when unset.
    #[arg(long)]
    pub(crate) kubernetes_version: Option<String>,

    /// Nodes in the system pool.
    #[arg(long, default_value_t = 3)]
    pub(crate) node_count: u32,

    /// VM size of the system pool.
    #[arg(long, default_value = "Standard_D4s_v5")]
    pub(crate) vm_size: String,

    /// Network plugin (`azure` or `kubenet`).
    #[arg(long)]
    pub(crate) network_plugin: Option<String>,

    /// SSH public key file for the node admin user.
    #[arg(long)]
    pub(crate) ssh_key_file: Option<PathBuf>,

    /// Node admin user name.
    #[arg(long, default_value = "azureuser")]
    pub(crate) admin_username: String,

    /// Create a dedicated service principal instead of a managed identity.
    #[arg(long)]
    pub(crate) create_service_principal: bool,

    /// Wait until provisioning finishes.
    #[arg(long)]
    pub(crate) wait: bool,
}

/// Run a subcommand; returns what to print.
pub(crate) async fn run(subscription: &Subscription, command: Command) -> anyhow::Result<Option<Value>> {
    match command {
        Command::Group(cmd) => group(subscription, cmd).await,
        Command::Cluster(cmd) => cluster(subscription, cmd).await,
        Command::Nodepool(cmd) => nodepool(subscription, cmd).await,
        Command::Kubectl { target, admin, args } => {
            kubectl(subscription, &target, admin, &args).await?;
            Ok(None)
        }
    }
}

async fn group(subscription: &Subscription, cmd: GroupCommand) -> anyhow::Result<Option<Value>> {
    let output = match cmd {
        GroupCommand::Create { name, location, tags } => {
            let tags: BTreeMap<_, _> = tags.into_iter().collect();
            let info = subscription.create_resource_group(&name, &location, &tags).await?;
            serde_json::to_value(info)?
        }
        GroupCommand::List => {
            let groups: Vec<ResourceGroupInfo> = subscription.list_resource_groups().await?;
            serde_json::to_value(groups)?
        }
        GroupCommand::Delete { name } => {
            let existed = subscription.delete_resource_group(&name).await?;
            json!({ "name": name, "deleted": existed })
        }
    };
    Ok(Some(output))
}

async fn cluster(subscription: &Subscription, cmd: ClusterCommand) -> anyhow::Result<Option<Value>> {
    let output = match cmd {
        ClusterCommand::Create(args) => create_cluster(subscription, args).await?,
        ClusterCommand::Show { target } => {
            let cluster = subscription
                .resource_group(target.group)
                .get_managed_cluster(&target.name)
                .await?;
            cluster.raw().clone()
        }
        ClusterCommand::List { group } => {
            let clusters = match group {
                Some(group) => subscription.resource_group(group).list_managed_clusters().await?,
                None => subscription.list_managed_clusters().await?,
            };
            Value::Array(clusters.iter().map(summarize_cluster).collect())
        }
        ClusterCommand::Delete { target } => {
            let existed = subscription
                .resource_group(target.group)
                .delete_managed_cluster(&target.name)
                .await?;
            json!({ "name": target.name, "deleted": existed })
        }
        ClusterCommand::Credentials {
            target,
            admin,
            file,
            merge,
        } => {
            let kind = if admin { CredentialKind::Admin } else { CredentialKind::User };
            let doc = subscription
                .resource_group(target.group)
                .kubeconfig(&target.name, kind)
                .await?;
            if let Some(path) = file {
                doc.write_to(&path).await?;
                json!({ "written": path })
            } else if let Some(path) = merge {
                doc.merge_into(&path).await?;
                json!({ "merged": path, "context": doc.current_context()? })
            } else {
                print!("{}", doc.yaml);
                return Ok(None);
            }
        }
        ClusterCommand::RotateCredentials {
            target,
            application_object_id,
        } => {
            let rotated = subscription
                .rotate_cluster_credentials(&target.group, &target.name, application_object_id.as_deref())
                .await?;
            json!({
                "name": target.name,
                "client_id": rotated.app_id,
                "application_object_id": rotated.application_object_id,
                "secret_expires_at": rotated.secret_expires_at,
            })
        }
        ClusterCommand::Nodes { target } => nodes(subscription, &target).await?,
    };
    Ok(Some(output))
}

async fn create_cluster(subscription: &Subscription, args: CreateClusterArgs) -> anyhow::Result<Value> {
    let CreateClusterArgs {
        target,
        location,
        dns_prefix,
        kubernetes_version,
        node_count,
        vm_size,
        network_plugin,
        ssh_key_file,
        admin_username,
        create_service_principal,
        wait,
    } = args;

    let dns_prefix = dns_prefix.unwrap_or_else(|| target.name.to_string());
    let mut spec = ManagedClusterSpec::new(location, dns_prefix)
        .agent_pool(AgentPoolProfile::system("system".parse()?, node_count, &vm_size))
        .tag("created-by", "akskit");
    if let Some(version) = kubernetes_version {
        spec = spec.kubernetes_version(version);
    }
    if let Some(plugin) = network_plugin {
        spec = spec.network_plugin(plugin);
    }
    if let Some(path) = ssh_key_file {
        let key = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        spec = spec.linux_profile(admin_username, key.trim());
    }

    let group = subscription.resource_group(target.group);
    let mut principal = None;
    if create_service_principal {
        let created = subscription
            .create_service_principal(&format!("{}-{}-sp", group.name(), target.name))
            .await?;
        group
            .assign_network_contributor(&created.object_id)
            .await
            .with_context(|| principal_context(&created))?;
        spec = spec.service_principal(created.profile());
        principal = Some(created);
    }

    let mut cluster = group
        .create_managed_cluster(&target.name, &spec)
        .await
        .map_err(|e| match &principal {
            Some(principal) => anyhow::Error::new(e).context(principal_context(principal)),
            None => e.into(),
        })?;
    if wait {
        cluster = group.wait_for_cluster(&target.name, WAIT_MAX_POLLS).await?;
    }

    let mut summary = summarize_cluster(&cluster);
    if let Some(principal) = principal {
        summary["service_principal_app_id"] = json!(principal.app_id);
        summary["application_object_id"] = json!(principal.application_object_id);
    }
    Ok(summary)
}

/// Names a service principal that outlives a failed create, so it can be
/// reused or deleted.
fn principal_context(principal: &ServicePrincipal) -> String {
    format!(
        "service principal app_id={} application_object_id={} was created but the cluster was not",
        principal.app_id, principal.application_object_id
    )
}

async fn nodepool(subscription: &Subscription, cmd: NodepoolCommand) -> anyhow::Result<Option<Value>> {
    let output = match cmd {
        NodepoolCommand::List { target } => {
            let pools = subscription
                .resource_group(target.group)
                .list_agent_pools(&target.name)
                .await?;
            Value::Array(pools.iter().map(summarize_pool).collect())
        }
        NodepoolCommand::Scale { target, pool, count } => {
            let pool = subscription
                .resource_group(target.group)
                .scale_agent_pool(&target.name, &pool, count)
                .await?;
            summarize_pool(&pool)
        }
        NodepoolCommand::Delete { target, pool } => {
            let existed = subscription
                .resource_group(target.group)
                .delete_agent_pool(&target.name, &pool)
                .await?;
            json!({ "name": pool, "deleted": existed })
        }
    };
    Ok(Some(output))
}

/// Fetch a kubeconfig into a private temp file and return a kubectl bound to it.
///
/// The temp file lives as long as the returned guard.
async fn kubectl_for(
    subscription: &Subscription,
    target: &ClusterTarget,
    admin: bool,
) -> anyhow::Result<(Kubectl, tempfile::TempPath)> {
    let kind = if admin { CredentialKind::Admin } else { CredentialKind::User };
    let doc = subscription
        .resource_group(target.group.clone())
        .kubeconfig(&target.name, kind)
        .await?;

    let path = tempfile::Builder::new()
        .prefix("akskit-kubeconfig-")
        .tempfile()?
        .into_temp_path();
    doc.write_to(&path).await?;

    let kubectl = Kubectl::new(Arc::new(ProcessRunner)).with_kubeconfig(path.to_path_buf());
    Ok((kubectl, path))
}

async fn kubectl(
    subscription: &Subscription,
    target: &ClusterTarget,
    admin: bool,
    args: &[String],
) -> anyhow::Result<()> {
    let (kubectl, _kubeconfig) = kubectl_for(subscription, target, admin).await?;
    let out = kubectl.raw(args).await?;
    print!("{out}");
    Ok(())
}

async fn nodes(subscription: &Subscription, target: &ClusterTarget) -> anyhow::Result<Value> {
    let (kubectl, _kubeconfig) = kubectl_for(subscription, target, false).await?;
    let nodes = kubectl.nodes().await?;
    Ok(Value::Array(
        nodes
            .iter()
            .map(|node| {
                json!({
                    "name": node.metadata.name,
                    "ready": node_is_ready(node),
                })
            })
            .collect(),
    ))
}

fn summarize_cluster(cluster: &ManagedCluster) -> Value {
    json!({
        "name": cluster.name(),
        "location": cluster.location(),
        "provisioning_state": cluster.provisioning_state().map(|s| s.to_string()),
        "power_state": cluster.power_state(),
        "kubernetes_version": cluster.kubernetes_version(),
        "fqdn": cluster.fqdn(),
    })
}

fn summarize_pool(pool: &AgentPool) -> Value {
    json!({
        "name": pool.name(),
        "count": pool.count(),
        "vm_size": pool.vm_size(),
        "mode": pool.mode(),
        "provisioning_state": pool.provisioning_state().map(|s| s.to_string()),
    })
}
