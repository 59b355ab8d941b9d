//! Thin wrapper over the `helm` CLI, bound to one kubeconfig and namespace.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Result, ToolError};
use crate::runner::{CommandRunner, Invocation};

/// A release as reported by `helm list -o json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelmRelease {
    /// Release name.
    pub name: String,
    /// Namespace the release lives in.
    pub namespace: String,
    /// Revision number, as printed by helm.
    pub revision: String,
    /// Release status (e.g. `deployed`, `failed`).
    pub status: String,
    /// Chart name and version, e.g. `ingress-nginx-4.10.0`.
    pub chart: String,
    /// Application version of the chart.
    #[serde(default)]
    pub app_version: String,
}

/// Options for [`Helm::upgrade_install`].
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Pin a chart version.
    pub version: Option<String>,
    /// Values merged over the chart defaults.
    pub values: Option<serde_json::Value>,
    /// Wait until resources are ready.
    pub wait: bool,
    /// Timeout passed to helm, in seconds.
    pub timeout_seconds: Option<u64>,
}

/// Runs helm against a fixed kubeconfig and namespace.
#[derive(Clone)]
pub struct Helm {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    kubeconfig: Option<PathBuf>,
    namespace: String,
}

impl Helm {
    /// Create a wrapper operating in `namespace`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, namespace: impl Into<String>) -> Self {
        Self {
            runner,
            binary: "helm".to_string(),
            kubeconfig: None,
            namespace: namespace.into(),
        }
    }

    /// Pin every call to `path`.
    #[must_use]
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// The namespace releases are managed in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn command(&self) -> Invocation {
        let mut cmd = Invocation::new(&self.binary);
        if let Some(path) = &self.kubeconfig {
            cmd = cmd.arg("--kubeconfig").arg(path.display().to_string());
        }
        cmd
    }

    /// `helm repo add <name> <url> --force-update`.
    ///
    /// # Errors
    ///
    /// Returns an error if helm rejects the repository.
    pub async fn repo_add(&self, name: &str, url: &str) -> Result<()> {
        self.runner
            .run_checked(
                &self
                    .command()
                    .args(["repo", "add", name, url, "--force-update"]),
            )
            .await?;
        Ok(())
    }

    /// Install or upgrade `release` from `chart`.
    ///
    /// Values are written to a temporary YAML file that lives until helm
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the values cannot be written or helm fails.
    pub async fn upgrade_install(
        &self,
        release: &str,
        chart: &str,
        options: &InstallOptions,
    ) -> Result<String> {
        let mut cmd = self.command().args([
            "upgrade",
            "--install",
            release,
            chart,
            "--namespace",
            self.namespace.as_str(),
            "--create-namespace",
        ]);

        if let Some(version) = &options.version {
            cmd = cmd.args(["--version", version.as_str()]);
        }
        if options.wait {
            cmd = cmd.arg("--wait");
        }
        if let Some(timeout) = options.timeout_seconds {
            cmd = cmd.arg(format!("--timeout={timeout}s"));
        }

        let values_file = match &options.values {
            Some(values) => {
                let yaml = serde_yaml::to_string(values)
                    .map_err(|e| ToolError::Serialization(format!("helm values: {e}")))?;
                let mut file = tempfile::Builder::new()
                    .prefix("aks-kit-values-")
                    .suffix(".yaml")
                    .tempfile()?;
                file.write_all(yaml.as_bytes())?;
                file.flush()?;
                cmd = cmd.args(["--values".to_string(), file.path().display().to_string()]);
                Some(file)
            }
            None => None,
        };

        tracing::info!(release, chart, namespace = %self.namespace, "Installing Helm release");
        let out = self.runner.run_checked(&cmd).await;
        drop(values_file);
        out
    }

    /// `helm uninstall <release>`.
    ///
    /// # Errors
    ///
    /// Returns an error if helm fails.
    pub async fn uninstall(&self, release: &str) -> Result<()> {
        tracing::info!(release, namespace = %self.namespace, "Uninstalling Helm release");
        self.runner
            .run_checked(
                &self
                    .command()
                    .args(["uninstall", release, "--namespace", self.namespace.as_str()]),
            )
            .await?;
        Ok(())
    }

    /// Releases in the namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if helm fails or prints unexpected JSON.
    pub async fn list(&self) -> Result<Vec<HelmRelease>> {
        let out = self
            .runner
            .run_checked(
                &self
                    .command()
                    .args(["list", "--namespace", self.namespace.as_str(), "--output", "json"]),
            )
            .await?;
        serde_json::from_str(&out).map_err(|e| ToolError::InvalidOutput {
            program: self.binary.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, MockRunner};

    fn helm(runner: &Arc<MockRunner>) -> Helm {
        Helm::new(Arc::clone(runner) as Arc<dyn CommandRunner>, "ingress")
    }

    #[tokio::test]
    async fn upgrade_install_with_values_file() {
        let runner = Arc::new(MockRunner::new());
        let options = InstallOptions {
            version: Some("4.10.0".to_string()),
            values: Some(serde_json::json!({"controller": {"replicaCount": 2}})),
            wait: true,
            timeout_seconds: Some(300),
        };

        helm(&runner)
            .upgrade_install("ingress-nginx", "ingress-nginx/ingress-nginx", &options)
            .await
            .unwrap();

        let args = runner.invocations()[0].args.clone();
        assert_eq!(&args[..3], &["upgrade", "--install", "ingress-nginx"]);
        assert!(args.contains(&"--create-namespace".to_string()));
        assert!(args.contains(&"--wait".to_string()));
        assert!(args.contains(&"--timeout=300s".to_string()));

        let values_at = args.iter().position(|a| a == "--values").unwrap();
        let path = std::path::Path::new(&args[values_at + 1]);
        assert!(path.extension().is_some_and(|e| e == "yaml"));
        // Removed once helm has returned.
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn upgrade_install_without_values() {
        let runner = Arc::new(MockRunner::new());
        helm(&runner)
            .upgrade_install("demo", "oci://registry/demo", &InstallOptions::default())
            .await
            .unwrap();
        let args = &runner.invocations()[0].args;
        assert!(!args.contains(&"--values".to_string()));
        assert!(!args.contains(&"--version".to_string()));
    }

    #[tokio::test]
    async fn list_parses_releases() {
        let runner = Arc::new(MockRunner::with_responses(vec![CommandOutput::ok(
            r#"[{"name":"ingress-nginx","namespace":"ingress","revision":"3","updated":"2024-05-01 10:00:00","status":"deployed","chart":"ingress-nginx-4.10.0","app_version":"1.10.0"}]"#,
        )]));

        let releases = helm(&runner).list().await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].status, "deployed");
        assert_eq!(releases[0].revision, "3");
    }

    #[tokio::test]
    async fn uninstall_failure() {
        let runner = Arc::new(MockRunner::with_responses(vec![CommandOutput::failed(
            1,
            "Error: uninstall: Release not loaded: demo: release: not found",
        )]));
        let err = helm(&runner).uninstall("demo").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
