//! HTTP transport shared by every resource manager and Graph call.

use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::credential::TokenCredential;
use crate::error::{ArmError, Result};
use crate::ArmConfig;

/// Which service a request is for; decides the token scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Audience {
    ResourceManager,
    Graph,
}

/// Error document returned by both ARM and Graph.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// One page of an ARM list response.
#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct Page<T> {
    #[serde(default)]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

/// Authenticated client for the resource manager and Graph.
///
/// Cheap to clone; clones share the connection pool and credential.
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    config: Arc<ArmConfig>,
    credential: Arc<dyn TokenCredential>,
}

impl ArmClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ArmConfig, credential: Arc<dyn TokenCredential>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(std::time::Duration::from_secs(10))
            .user_agent(concat!("aks-kit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArmError::InvalidRequest(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(http, config, credential))
    }

    /// Create a client around an existing reqwest client.
    #[must_use]
    pub fn with_client(
        http: reqwest::Client,
        config: ArmConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        Self {
            http,
            config: Arc::new(config),
            credential,
        }
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    async fn send(
        &self,
        audience: Audience,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let scope = match audience {
            Audience::ResourceManager => self.config.resource_manager_scope(),
            Audience::Graph => self.config.graph_scope(),
        };
        let token = self.credential.get_token(&scope).await?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.token))
            .map_err(|_| ArmError::Credential("token contains invalid characters".to_string()))?;
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, bearer)
            .header("x-ms-client-request-id", &request_id);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!(
            method = %method,
            url,
            status = status.as_u16(),
            request_id = %request_id,
            "Azure request completed"
        );

        if status.is_success() {
            return Ok(response);
        }
        Err(Self::error_from_response(status, response).await)
    }

    async fn error_from_response(status: StatusCode, response: reqwest::Response) -> ArmError {
        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => (envelope.error.code, envelope.error.message),
            Err(_) => (
                status
                    .canonical_reason()
                    .unwrap_or("UnknownError")
                    .replace(' ', ""),
                text,
            ),
        };

        if status == StatusCode::NOT_FOUND {
            return ArmError::NotFound(format!("{code}: {message}"));
        }
        ArmError::Api {
            status: status.as_u16(),
            code,
            message,
        }
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let text = response.text().await?;
        // Some POST actions answer 200 with no body at all.
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ArmError::InvalidResponse(e.to_string()))
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, audience: Audience, url: &str) -> Result<T> {
        let response = self.send(audience, Method::GET, url, None).await?;
        Self::json(response).await
    }

    pub(crate) async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        audience: Audience,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let body = to_value(body)?;
        let response = self.send(audience, Method::PUT, url, Some(&body)).await?;
        Self::json(response).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        audience: Audience,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let body = to_value(body)?;
        let response = self.send(audience, Method::POST, url, Some(&body)).await?;
        Self::json(response).await
    }

    /// POST that only cares about success, e.g. long-running actions that
    /// answer `202 Accepted`.
    pub(crate) async fn post_accepted<B: Serialize + ?Sized>(
        &self,
        audience: Audience,
        url: &str,
        body: &B,
    ) -> Result<()> {
        let body = to_value(body)?;
        self.send(audience, Method::POST, url, Some(&body)).await?;
        Ok(())
    }

    /// DELETE; a missing resource counts as deleted. Returns whether it existed.
    pub(crate) async fn delete(&self, audience: Audience, url: &str) -> Result<bool> {
        match self.send(audience, Method::DELETE, url, None).await {
            Ok(response) => Ok(response.status() != StatusCode::NO_CONTENT),
            Err(ArmError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// GET every page of a list, following `nextLink`.
    pub(crate) async fn list<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());
        let mut pages = 0_u32;

        while let Some(url) = next {
            let page: Page<T> = self.get(Audience::ResourceManager, &url).await?;
            items.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
            pages += 1;
        }

        tracing::debug!(pages, count = items.len(), "Listed resources");
        Ok(items)
    }
}

fn to_value<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| ArmError::InvalidRequest(e.to_string()))
}
