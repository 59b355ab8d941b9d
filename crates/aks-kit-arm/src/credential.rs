//! Bearer token sources.
//!
//! Tokens are always handed to the client explicitly; nothing here reads
//! ambient credentials except [`AzureCliCredential`], which delegates to an
//! `az` login the user already has.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use aks_kit_tools::{CommandRunner, Invocation, ProcessRunner};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::{ArmError, Result};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// A bearer token and its expiry.
#[derive(Clone)]
pub struct AccessToken {
    /// The raw bearer token.
    pub token: String,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token expires within the refresh margin.
    #[must_use]
    pub fn is_expiring(&self) -> bool {
        self.expires_at - Duration::minutes(EXPIRY_MARGIN_MINUTES) <= Utc::now()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer tokens for a scope.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Get a token valid for `scope` (e.g. `https://management.azure.com/.default`).
    ///
    /// # Errors
    ///
    /// Returns `ArmError::Credential` if no token can be produced.
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

/// A caller-supplied token used for every scope.
#[derive(Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    /// Wrap an already acquired bearer token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticTokenCredential(<redacted>)")
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
        if self.token.is_empty() {
            return Err(ArmError::Credential("empty static token".to_string()));
        }
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: DateTime::<Utc>::MAX_UTC,
        })
    }
}

/// Output of `az account get-access-token -o json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzTokenResponse {
    access_token: String,
    /// Local wall-clock time, e.g. `2024-05-01 13:45:00.000000`.
    expires_on: Option<String>,
    /// Unix seconds; only printed by newer CLI versions.
    #[serde(rename = "expires_on")]
    expires_on_unix: Option<i64>,
}

/// Tokens obtained from the Azure CLI, cached per scope.
pub struct AzureCliCredential {
    runner: Arc<dyn CommandRunner>,
    tenant: Option<String>,
    cache: RwLock<HashMap<String, AccessToken>>,
}

impl AzureCliCredential {
    /// Use the `az` binary on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ProcessRunner))
    }

    /// Use a custom command runner.
    #[must_use]
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            tenant: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Request tokens for a specific tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    async fn fetch(&self, scope: &str) -> Result<AccessToken> {
        let mut cmd = Invocation::new("az").args([
            "account",
            "get-access-token",
            "--scope",
            scope,
            "--output",
            "json",
        ]);
        if let Some(tenant) = &self.tenant {
            cmd = cmd.args(["--tenant", tenant.as_str()]);
        }

        let out = self.runner.run_checked(&cmd).await.map_err(|e| {
            ArmError::Credential(format!("az account get-access-token failed: {e}"))
        })?;
        parse_az_token(&out)
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        {
            let cache = self.cache.read();
            if let Some(token) = cache.get(scope) {
                if !token.is_expiring() {
                    return Ok(token.clone());
                }
            }
        }

        tracing::debug!(scope, "Fetching token from Azure CLI");
        let token = self.fetch(scope).await?;
        self.cache.write().insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

fn parse_az_token(out: &str) -> Result<AccessToken> {
    let raw: AzTokenResponse = serde_json::from_str(out)
        .map_err(|e| ArmError::Credential(format!("unexpected az output: {e}")))?;

    let expires_at = if let Some(secs) = raw.expires_on_unix {
        DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| ArmError::Credential(format!("invalid expires_on {secs}")))?
    } else if let Some(local) = raw.expires_on.as_deref() {
        let naive = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
            .map_err(|e| ArmError::Credential(format!("invalid expiresOn {local:?}: {e}")))?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| ArmError::Credential(format!("ambiguous expiresOn {local:?}")))?
            .with_timezone(&Utc)
    } else {
        return Err(ArmError::Credential("az output has no expiry".to_string()));
    };

    Ok(AccessToken {
        token: raw.access_token,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aks_kit_tools::{CommandOutput, MockRunner};

    fn az_output(token: &str, expires_in: Duration) -> CommandOutput {
        let expires = Utc::now() + expires_in;
        CommandOutput::ok(
            serde_json::json!({
                "accessToken": token,
                "expiresOn": expires.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                "expires_on": expires.timestamp(),
                "subscription": "00000000-0000-0000-0000-000000000000",
                "tenant": "11111111-1111-1111-1111-111111111111",
                "tokenType": "Bearer"
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn static_token_never_expires() {
        let cred = StaticTokenCredential::new("abc");
        let token = cred.get_token("https://management.azure.com/.default").await.unwrap();
        assert_eq!(token.token, "abc");
        assert!(!token.is_expiring());
        assert!(!format!("{cred:?}").contains("abc"));
    }

    #[tokio::test]
    async fn static_token_rejects_empty() {
        let err = StaticTokenCredential::new("")
            .get_token("scope")
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Credential(_)));
    }

    #[tokio::test]
    async fn az_token_is_cached_per_scope() {
        let runner = Arc::new(MockRunner::with_responses(vec![
            az_output("arm-token", Duration::hours(1)),
            az_output("graph-token", Duration::hours(1)),
        ]));
        let cred = AzureCliCredential::with_runner(Arc::clone(&runner) as Arc<dyn CommandRunner>);

        let arm = "https://management.azure.com/.default";
        let graph = "https://graph.microsoft.com/.default";
        assert_eq!(cred.get_token(arm).await.unwrap().token, "arm-token");
        assert_eq!(cred.get_token(arm).await.unwrap().token, "arm-token");
        assert_eq!(cred.get_token(graph).await.unwrap().token, "graph-token");

        let calls = runner.invocations();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].args.contains(&arm.to_string()));
    }

    #[tokio::test]
    async fn az_token_refreshes_when_expiring() {
        let runner = Arc::new(MockRunner::with_responses(vec![
            az_output("old", Duration::minutes(2)),
            az_output("new", Duration::hours(1)),
        ]));
        let cred = AzureCliCredential::with_runner(Arc::clone(&runner) as Arc<dyn CommandRunner>);

        assert_eq!(cred.get_token("s").await.unwrap().token, "old");
        assert_eq!(cred.get_token("s").await.unwrap().token, "new");
    }

    #[tokio::test]
    async fn az_failure_is_credential_error() {
        let runner = Arc::new(MockRunner::with_responses(vec![CommandOutput::failed(
            1,
            "ERROR: Please run 'az login' to setup account.",
        )]));
        let cred = AzureCliCredential::with_runner(runner).with_tenant("contoso");
        let err = cred.get_token("s").await.unwrap_err();
        assert!(err.to_string().contains("az login"));
    }

    #[test]
    fn parse_local_expiry_only() {
        let token = parse_az_token(
            r#"{"accessToken": "t", "expiresOn": "2099-01-01 00:00:00.000000"}"#,
        )
        .unwrap();
        assert_eq!(token.token, "t");
        assert!(!token.is_expiring());
    }

    #[test]
    fn parse_without_expiry_fails() {
        assert!(parse_az_token(r#"{"accessToken": "t"}"#).is_err());
    }
}
