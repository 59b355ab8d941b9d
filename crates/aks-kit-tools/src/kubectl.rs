//! Thin wrapper over the `kubectl` CLI, bound to one kubeconfig.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;

use crate::error::{Result, ToolError};
use crate::runner::{CommandRunner, Invocation};

/// Runs kubectl against a fixed kubeconfig and, optionally, context.
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
}

impl Kubectl {
    /// Create a wrapper that uses kubectl's default kubeconfig resolution.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "kubectl".to_string(),
            kubeconfig: None,
            context: None,
        }
    }

    /// Pin every call to `path`.
    #[must_use]
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Pin every call to a named context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The kubeconfig this wrapper is bound to, if any.
    #[must_use]
    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    fn command(&self) -> Invocation {
        let mut cmd = Invocation::new(&self.binary);
        if let Some(path) = &self.kubeconfig {
            cmd = cmd.arg("--kubeconfig").arg(path.display().to_string());
        }
        if let Some(context) = &self.context {
            cmd = cmd.arg("--context").arg(context);
        }
        cmd
    }

    /// Run kubectl with arbitrary arguments and return stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl exits unsuccessfully.
    pub async fn raw<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run_checked(&self.command().args(args)).await
    }

    /// `kubectl apply -f -` with `manifest` on stdin.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is rejected.
    pub async fn apply(&self, manifest: &str) -> Result<String> {
        tracing::info!(bytes = manifest.len(), "Applying manifest");
        self.runner
            .run_checked(&self.command().args(["apply", "-f", "-"]).stdin(manifest))
            .await
    }

    /// `kubectl delete -f - --ignore-not-found` with `manifest` on stdin.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl fails for a reason other than absence.
    pub async fn delete(&self, manifest: &str) -> Result<String> {
        self.runner
            .run_checked(
                &self
                    .command()
                    .args(["delete", "-f", "-", "--ignore-not-found"])
                    .stdin(manifest),
            )
            .await
    }

    /// `kubectl get <kind> -o json`, in `namespace` or across all namespaces.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl fails or prints invalid JSON.
    pub async fn get_json(&self, kind: &str, namespace: Option<&str>) -> Result<serde_json::Value> {
        let mut cmd = self.command().args(["get", kind, "-o", "json"]);
        cmd = match namespace {
            Some(ns) => cmd.args(["--namespace", ns]),
            None => cmd.arg("--all-namespaces"),
        };
        let out = self.runner.run_checked(&cmd).await?;
        serde_json::from_str(&out).map_err(|e| ToolError::InvalidOutput {
            program: self.binary.clone(),
            reason: format!("invalid JSON: {e}"),
        })
    }

    /// List the cluster's nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl fails or the output is not a node list.
    pub async fn nodes(&self) -> Result<Vec<Node>> {
        let out = self
            .runner
            .run_checked(&self.command().args(["get", "nodes", "-o", "json"]))
            .await?;
        let list: NodeItems = serde_json::from_str(&out).map_err(|e| ToolError::InvalidOutput {
            program: self.binary.clone(),
            reason: format!("not a node list: {e}"),
        })?;
        Ok(list.items)
    }

    /// Wait for a deployment rollout to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollout fails or times out.
    pub async fn rollout_status(
        &self,
        deployment: &str,
        namespace: &str,
        timeout_seconds: u64,
    ) -> Result<()> {
        self.runner
            .run_checked(&self.command().args([
                "rollout".to_string(),
                "status".to_string(),
                format!("deployment/{deployment}"),
                "--namespace".to_string(),
                namespace.to_string(),
                format!("--timeout={timeout_seconds}s"),
            ]))
            .await?;
        Ok(())
    }
}

// kubectl prints `kind: List` rather than `NodeList`, so only `items` is read.
#[derive(Deserialize)]
struct NodeItems {
    items: Vec<Node>,
}

/// Whether a node reports the `Ready` condition as `True`.
#[must_use]
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}
