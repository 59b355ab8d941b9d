//! Cluster kubeconfigs returned by the resource manager.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::Deserialize;

use crate::error::{ArmError, Result};

/// Which credential set to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialKind {
    /// Azure AD user credentials.
    #[default]
    User,
    /// Cluster admin credentials, bypassing Azure AD.
    Admin,
}

impl CredentialKind {
    /// Resource manager action that returns this kind.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::User => "listClusterUserCredential",
            Self::Admin => "listClusterAdminCredential",
        }
    }
}

/// Response of the `listCluster*Credential` actions.
#[derive(Debug, Deserialize)]
pub(crate) struct CredentialResults {
    #[serde(default)]
    pub(crate) kubeconfigs: Vec<RawKubeconfig>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawKubeconfig {
    pub(crate) name: String,
    pub(crate) value: String,
}

/// A decoded kubeconfig file.
#[derive(Clone)]
pub struct KubeconfigDocument {
    /// Name the service gave it, e.g. `clusterUser`.
    pub name: String,
    /// YAML text.
    pub yaml: String,
}

impl std::fmt::Debug for KubeconfigDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeconfigDocument")
            .field("name", &self.name)
            .field("yaml", &"<redacted>")
            .finish()
    }
}

impl KubeconfigDocument {
    /// Decode a base64 kubeconfig as returned by the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not base64 or not UTF-8.
    pub fn decode(name: impl Into<String>, encoded: &str) -> Result<Self> {
        let name = name.into();
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ArmError::Kubeconfig(format!("{name} is not base64: {e}")))?;
        let yaml = String::from_utf8(bytes)
            .map_err(|e| ArmError::Kubeconfig(format!("{name} is not UTF-8: {e}")))?;
        Ok(Self { name, yaml })
    }

    pub(crate) fn from_results(results: CredentialResults) -> Result<Vec<Self>> {
        results
            .kubeconfigs
            .iter()
            .map(|raw| Self::decode(raw.name.clone(), &raw.value))
            .collect()
    }

    /// Parse into a structured kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is not a kubeconfig.
    pub fn parse(&self) -> Result<Kubeconfig> {
        Kubeconfig::from_yaml(&self.yaml).map_err(|e| ArmError::Kubeconfig(e.to_string()))
    }

    /// The context the file selects.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is not a kubeconfig.
    pub fn current_context(&self) -> Result<Option<String>> {
        Ok(self.parse()?.current_context)
    }

    /// Write the file as-is, readable by the owner only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        write_private(path, &self.yaml).await
    }

    /// Merge into an existing kubeconfig, creating it if needed.
    ///
    /// Clusters, users and contexts from this document replace same-named
    /// entries; the current context switches to this document's.
    ///
    /// # Errors
    ///
    /// Returns an error if either file does not parse or the result cannot be
    /// written.
    pub async fn merge_into(&self, path: &Path) -> Result<()> {
        let incoming = self.parse()?;
        let current_context = incoming.current_context.clone();

        let merged = match tokio::fs::read_to_string(path).await {
            Ok(existing) if !existing.trim().is_empty() => {
                let existing = Kubeconfig::from_yaml(&existing).map_err(|e| {
                    ArmError::Kubeconfig(format!("{}: {e}", path.display()))
                })?;
                let mut merged = incoming
                    .merge(existing)
                    .map_err(|e| ArmError::Kubeconfig(e.to_string()))?;
                if current_context.is_some() {
                    merged.current_context = current_context;
                }
                merged
            }
            Ok(_) => incoming,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => incoming,
            Err(e) => return Err(e.into()),
        };

        let yaml = serde_yaml::to_string(&merged)
            .map_err(|e| ArmError::Kubeconfig(format!("failed to serialize kubeconfig: {e}")))?;
        write_private(path, &yaml).await?;
        tracing::info!(path = %path.display(), name = %self.name, "Merged kubeconfig");
        Ok(())
    }

    /// Build a Kubernetes client for the document's current context.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig is unusable.
    pub async fn client(&self) -> Result<kube::Client> {
        let config = kube::Config::from_custom_kubeconfig(self.parse()?, &KubeConfigOptions::default())
            .await
            .map_err(|e| ArmError::Kubeconfig(e.to_string()))?;
        kube::Client::try_from(config).map_err(|e| ArmError::Kubeconfig(e.to_string()))
    }
}

/// Write `contents` to a fresh owner-only file beside `path`, then rename it
/// into place. The secret never lands in a file with wider permissions, even
/// when `path` already exists as one.
async fn write_private(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            tokio::fs::create_dir_all(parent).await?;
            parent.to_path_buf()
        }
        None => PathBuf::from("."),
    };
    let path = path.to_path_buf();
    let contents = contents.to_owned();

    tokio::task::spawn_blocking(move || -> Result<()> {
        // NamedTempFile is created 0600 on unix.
        let mut file = tempfile::Builder::new()
            .prefix(".akskit-kubeconfig-")
            .tempfile_in(&dir)?;
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| ArmError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| ArmError::Kubeconfig(format!("kubeconfig write task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kubeconfig_yaml(cluster: &str) -> String {
        format!(
            r"apiVersion: v1
kind: Config
clusters:
- name: {cluster}
  cluster:
    server: https://{cluster}.hcp.westeurope.azmk8s.io:443
contexts:
- name: {cluster}
  context:
    cluster: {cluster}
    user: clusterUser_rg_{cluster}
current-context: {cluster}
users:
- name: clusterUser_rg_{cluster}
  user:
    token: secret-{cluster}
"
        )
    }

    fn document(cluster: &str) -> KubeconfigDocument {
        let encoded = STANDARD.encode(kubeconfig_yaml(cluster));
        KubeconfigDocument::decode("clusterUser", &encoded).unwrap()
    }

    #[test]
    fn actions() {
        assert_eq!(CredentialKind::User.action(), "listClusterUserCredential");
        assert_eq!(CredentialKind::Admin.action(), "listClusterAdminCredential");
    }

    #[test]
    fn decode_and_parse() {
        let doc = document("aks-demo");
        assert_eq!(doc.name, "clusterUser");
        assert_eq!(doc.current_context().unwrap().as_deref(), Some("aks-demo"));

        let parsed = doc.parse().unwrap();
        assert_eq!(parsed.clusters.len(), 1);
        assert!(!format!("{doc:?}").contains("secret-aks-demo"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(KubeconfigDocument::decode("x", "not base64!!").is_err());
    }

    #[test]
    fn from_results_decodes_all() {
        let results: CredentialResults = serde_json::from_value(serde_json::json!({
            "kubeconfigs": [
                {"name": "clusterUser", "value": STANDARD.encode(kubeconfig_yaml("a"))},
                {"name": "clusterAdmin", "value": STANDARD.encode(kubeconfig_yaml("b"))}
            ]
        }))
        .unwrap();
        let docs = KubeconfigDocument::from_results(results).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].name, "clusterAdmin");
    }

    #[tokio::test]
    async fn write_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config");
        document("aks-demo").write_to(&path).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("aks-demo"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_replaces_world_readable_file() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "stale").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let stale_inode = std::fs::metadata(&path).unwrap().ino();

        document("aks-demo").write_to(&path).await.unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        // A new inode means the 0644 file was replaced, never written to.
        assert_ne!(meta.ino(), stale_inode);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("secret-aks-demo"));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name() != "config")
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn merge_tightens_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, kubeconfig_yaml("first")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        document("second").merge_into(&path).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn merge_keeps_existing_and_switches_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");

        document("first").merge_into(&path).await.unwrap();
        document("second").merge_into(&path).await.unwrap();

        let merged = Kubeconfig::read_from(&path).unwrap();
        let names: Vec<_> = merged.clusters.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"first"));
        assert!(names.contains(&"second"));
        assert_eq!(merged.current_context.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn merge_replaces_same_named_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        tokio::fs::write(&path, kubeconfig_yaml("aks-demo").replace("secret-aks-demo", "stale"))
            .await
            .unwrap();

        document("aks-demo").merge_into(&path).await.unwrap();

        let merged = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(merged.contains("secret-aks-demo"));
        assert!(!merged.contains("stale"));
    }
}
