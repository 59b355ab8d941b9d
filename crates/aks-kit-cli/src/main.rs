//! aks-kit CLI - manage AKS clusters from the command line.
//!
//! This is the entry point for the `akskit` binary. Results are printed to
//! stdout as JSON; logs go to stderr.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use aks_kit_arm::{
    ArmClient, ArmConfig, AzureCliCredential, StaticTokenCredential, Subscription,
    TokenCredential,
};
use aks_kit_core::{AgentPoolName, ClusterName, ResourceGroupName, SubscriptionId};
use clap::{Args, Parser, Subcommand};

/// aks-kit CLI - manage AKS clusters from the command line.
#[derive(Parser, Debug)]
#[command(name = "akskit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Azure subscription id.
    #[arg(long, env = "AKSKIT_SUBSCRIPTION", global = true)]
    subscription: Option<SubscriptionId>,

    /// Bearer token for the resource manager. Uses the Azure CLI login when unset.
    #[arg(long, env = "AKSKIT_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Tenant to request Azure CLI tokens for.
    #[arg(long, env = "AKSKIT_TENANT", global = true)]
    tenant: Option<String>,

    /// Enable debug logging.
    #[arg(long, default_value = "false", global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resource groups.
    #[command(subcommand)]
    Group(GroupCommand),

    /// Managed clusters.
    #[command(subcommand)]
    Cluster(ClusterCommand),

    /// Agent pools.
    #[command(subcommand)]
    Nodepool(NodepoolCommand),

    /// Run kubectl against a cluster with a freshly fetched kubeconfig.
    Kubectl {
        #[command(flatten)]
        target: ClusterTarget,

        /// Use admin credentials.
        #[arg(long)]
        admin: bool,

        /// Arguments passed to kubectl.
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    /// Create a resource group, or update its tags.
    Create {
        /// Group name.
        #[arg(long)]
        name: ResourceGroupName,

        /// Azure region.
        #[arg(long)]
        location: String,

        /// Tag as `key=value`; repeatable.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },

    /// List resource groups.
    List,

    /// Delete a resource group and everything in it.
    Delete {
        /// Group name.
        #[arg(long)]
        name: ResourceGroupName,
    },
}

/// Which cluster a command addresses.
#[derive(Args, Debug, Clone)]
struct ClusterTarget {
    /// Resource group.
    #[arg(long, short = 'g')]
    group: ResourceGroupName,

    /// Cluster name.
    #[arg(long, short = 'n')]
    name: ClusterName,
}

#[derive(Subcommand, Debug)]
enum ClusterCommand {
    /// Create a managed cluster.
    Create(commands::CreateClusterArgs),

    /// Show a managed cluster.
    Show {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// List managed clusters in a group, or in the whole subscription.
    List {
        /// Resource group.
        #[arg(long, short = 'g')]
        group: Option<ResourceGroupName>,
    },

    /// Delete a managed cluster.
    Delete {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// Fetch a kubeconfig; printed unless written or merged to a file.
    Credentials {
        #[command(flatten)]
        target: ClusterTarget,

        /// Fetch admin credentials.
        #[arg(long)]
        admin: bool,

        /// Write the kubeconfig to this file.
        #[arg(long, conflicts_with = "merge")]
        file: Option<PathBuf>,

        /// Merge the kubeconfig into this file.
        #[arg(long)]
        merge: Option<PathBuf>,
    },

    /// Give the cluster's service principal a new secret and switch the
    /// cluster over to it.
    RotateCredentials {
        #[command(flatten)]
        target: ClusterTarget,

        /// Object id of the principal's application registration; looked up
        /// from the cluster's client id when unset.
        #[arg(long)]
        application_object_id: Option<String>,
    },

    /// Show node readiness through kubectl.
    Nodes {
        #[command(flatten)]
        target: ClusterTarget,
    },
}

#[derive(Subcommand, Debug)]
enum NodepoolCommand {
    /// List a cluster's agent pools.
    List {
        #[command(flatten)]
        target: ClusterTarget,
    },

    /// Change an agent pool's node count.
    Scale {
        #[command(flatten)]
        target: ClusterTarget,

        /// Pool name.
        #[arg(long)]
        pool: AgentPoolName,

        /// New node count.
        #[arg(long)]
        count: u32,
    },

    /// Delete an agent pool.
    Delete {
        #[command(flatten)]
        target: ClusterTarget,

        /// Pool name.
        #[arg(long)]
        pool: AgentPoolName,
    },
}

fn parse_tag(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty tag key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.debug {
        "aks_kit=debug,akskit=debug,warn"
    } else {
        "aks_kit=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ArmConfig::from_env()?;
    tracing::debug!(
        resource_manager_url = %config.resource_manager_url,
        create_max_attempts = config.create_max_attempts,
        "Configuration loaded"
    );

    let credential: Arc<dyn TokenCredential> = match cli.token {
        Some(token) => Arc::new(StaticTokenCredential::new(token)),
        None => {
            let cli_credential = AzureCliCredential::new();
            Arc::new(match cli.tenant {
                Some(tenant) => cli_credential.with_tenant(tenant),
                None => cli_credential,
            })
        }
    };

    let subscription_id = cli
        .subscription
        .ok_or_else(|| anyhow::anyhow!("--subscription or AKSKIT_SUBSCRIPTION is required"))?;
    let client = ArmClient::new(config, credential)?;
    let subscription = Subscription::new(client, subscription_id);

    let output = commands::run(&subscription, cli.command).await?;
    if let Some(output) = output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}
