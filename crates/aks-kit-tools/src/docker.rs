//! Thin wrapper over the `docker` CLI.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, ToolError};
use crate::runner::{CommandRunner, Invocation};

/// Runs docker commands through a [`CommandRunner`].
#[derive(Clone)]
pub struct Docker {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl Docker {
    /// Create a wrapper that invokes `docker` from `PATH`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "docker".to_string(),
        }
    }

    /// Use a different docker binary (e.g. `podman`).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    /// Server version reported by the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if docker is missing or the daemon is unreachable.
    pub async fn version(&self) -> Result<String> {
        let out = self
            .runner
            .run_checked(
                &self
                    .command()
                    .args(["version", "--format", "{{.Server.Version}}"]),
            )
            .await?;
        let version = out.trim();
        if version.is_empty() {
            return Err(ToolError::InvalidOutput {
                program: self.binary.clone(),
                reason: "empty server version".to_string(),
            });
        }
        Ok(version.to_string())
    }

    /// Log in to a registry. The password is passed on stdin.
    ///
    /// # Errors
    ///
    /// Returns an error if the login is rejected.
    pub async fn login(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        tracing::info!(registry, username, "Logging in to container registry");
        self.runner
            .run_checked(
                &self
                    .command()
                    .args(["login", registry, "--username", username, "--password-stdin"])
                    .stdin(password),
            )
            .await?;
        Ok(())
    }

    /// Build an image from `context`, tagging it `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the build fails.
    pub async fn build(&self, context: &Path, tag: &str, dockerfile: Option<&Path>) -> Result<()> {
        let mut cmd = self.command().args(["build", "--tag", tag]);
        if let Some(file) = dockerfile {
            cmd = cmd.arg("--file").arg(file.display().to_string());
        }
        cmd = cmd.arg(context.display().to_string());

        tracing::info!(tag, context = %context.display(), "Building image");
        self.runner.run_checked(&cmd).await?;
        Ok(())
    }

    /// Add `target` as another tag of `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` does not exist.
    pub async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.runner
            .run_checked(&self.command().args(["tag", source, target]))
            .await?;
        Ok(())
    }

    /// Push an image to its registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the push fails.
    pub async fn push(&self, image: &str) -> Result<()> {
        tracing::info!(image, "Pushing image");
        self.runner
            .run_checked(&self.command().args(["push", image]))
            .await?;
        Ok(())
    }
}
