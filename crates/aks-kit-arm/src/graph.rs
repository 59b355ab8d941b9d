//! Service principals through Microsoft Graph.
//!
//! A principal for AKS is three objects: an application registration, the
//! service principal bound to it, and a client secret on the application.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::client::{ArmClient, Audience};
use crate::cluster::ServicePrincipalProfile;
use crate::error::{ArmError, Result};

/// Lifetime of generated client secrets.
const SECRET_LIFETIME_DAYS: i64 = 365;

/// An application registration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Object id; owns the client secrets.
    #[serde(rename = "id")]
    pub object_id: String,
    /// Application (client) id.
    pub app_id: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryObject {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordCredential {
    secret_text: Option<String>,
    end_date_time: Option<DateTime<Utc>>,
}

/// A freshly created service principal and its secret.
#[derive(Clone)]
pub struct ServicePrincipal {
    /// Application (client) id; what a cluster authenticates as.
    pub app_id: String,
    /// Object id of the service principal; what role assignments target.
    pub object_id: String,
    /// Object id of the application registration; owns the secrets.
    pub application_object_id: String,
    /// Client secret.
    pub secret: String,
    /// When the secret stops working.
    pub secret_expires_at: Option<DateTime<Utc>>,
}

impl ServicePrincipal {
    /// The profile to put on a cluster create or credential reset.
    #[must_use]
    pub fn profile(&self) -> ServicePrincipalProfile {
        ServicePrincipalProfile {
            client_id: self.app_id.clone(),
            secret: self.secret.clone(),
        }
    }
}

impl fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("app_id", &self.app_id)
            .field("object_id", &self.object_id)
            .field("application_object_id", &self.application_object_id)
            .field("secret", &"<redacted>")
            .field("secret_expires_at", &self.secret_expires_at)
            .finish()
    }
}

/// Graph operations on application registrations and service principals.
#[derive(Clone)]
pub struct Graph {
    client: ArmClient,
}

impl Graph {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: ArmClient) -> Self {
        Self { client }
    }

    /// Register an application, create its service principal and give it a
    /// client secret.
    ///
    /// The principal is not usable by the resource manager until it has
    /// replicated, which is what the cluster create guard waits out.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three Graph calls fails. When the
    /// application was registered but a later call failed, the application
    /// is deleted before the error is returned.
    pub async fn create_service_principal(&self, display_name: &str) -> Result<ServicePrincipal> {
        if display_name.trim().is_empty() {
            return Err(ArmError::InvalidRequest(
                "service principal display name is required".to_string(),
            ));
        }
        let config = self.client.config();

        let app: Application = self
            .client
            .post(
                Audience::Graph,
                &config.graph_endpoint("/applications"),
                &json!({ "displayName": display_name, "signInAudience": "AzureADMyOrg" }),
            )
            .await?;

        // Nothing references the registration until the cluster is created,
        // so a failure from here on would leave it orphaned.
        let completed = self.complete_principal(&app, display_name).await;
        let (principal, (secret, secret_expires_at)) = match completed {
            Ok(created) => created,
            Err(e) => {
                self.discard_application(&app).await;
                return Err(e);
            }
        };

        tracing::info!(
            display_name,
            app_id = %app.app_id,
            object_id = %principal.id,
            "Created service principal"
        );

        Ok(ServicePrincipal {
            app_id: app.app_id,
            object_id: principal.id,
            application_object_id: app.object_id,
            secret,
            secret_expires_at,
        })
    }

    async fn complete_principal(
        &self,
        app: &Application,
        display_name: &str,
    ) -> Result<(DirectoryObject, (String, Option<DateTime<Utc>>))> {
        let principal: DirectoryObject = self
            .client
            .post(
                Audience::Graph,
                &self.client.config().graph_endpoint("/servicePrincipals"),
                &json!({ "appId": app.app_id }),
            )
            .await?;
        let secret = self.add_password(&app.object_id, display_name).await?;
        Ok((principal, secret))
    }

    async fn discard_application(&self, app: &Application) {
        match self.delete_application(&app.object_id).await {
            Ok(_) => tracing::info!(
                app_id = %app.app_id,
                application_object_id = %app.object_id,
                "Deleted partially created application"
            ),
            Err(e) => tracing::warn!(
                app_id = %app.app_id,
                application_object_id = %app.object_id,
                error = %e,
                "Failed to delete partially created application; remove it by hand"
            ),
        }
    }

    /// Fetch an application registration by object id.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::NotFound` if it does not exist.
    pub async fn get_application(&self, application_object_id: &str) -> Result<Application> {
        let url = self
            .client
            .config()
            .graph_endpoint(&format!("/applications/{application_object_id}"));
        self.client.get(Audience::Graph, &url).await
    }

    /// Fetch an application registration by application (client) id.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::NotFound` if it does not exist.
    pub async fn find_application(&self, app_id: &str) -> Result<Application> {
        let url = self
            .client
            .config()
            .graph_endpoint(&format!("/applications(appId='{app_id}')"));
        self.client.get(Audience::Graph, &url).await
    }

    /// Object id of the service principal bound to an application.
    ///
    /// # Errors
    ///
    /// Returns `ArmError::NotFound` if the application has none.
    pub async fn service_principal_object_id(&self, app_id: &str) -> Result<String> {
        let url = self
            .client
            .config()
            .graph_endpoint(&format!("/servicePrincipals(appId='{app_id}')"));
        let principal: DirectoryObject = self.client.get(Audience::Graph, &url).await?;
        Ok(principal.id)
    }

    /// Add a new client secret to an application and return it.
    ///
    /// Existing secrets stay valid until they expire or are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if Graph rejects the request.
    pub async fn rotate_secret(
        &self,
        application_object_id: &str,
    ) -> Result<(String, Option<DateTime<Utc>>)> {
        let rotated = self.add_password(application_object_id, "aks-kit rotation").await?;
        tracing::info!(application_object_id, "Rotated service principal secret");
        Ok(rotated)
    }

    /// Delete an application registration; its service principal goes with it.
    ///
    /// Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if Graph rejects the request.
    pub async fn delete_application(&self, application_object_id: &str) -> Result<bool> {
        let url = self
            .client
            .config()
            .graph_endpoint(&format!("/applications/{application_object_id}"));
        self.client.delete(Audience::Graph, &url).await
    }

    async fn add_password(
        &self,
        application_object_id: &str,
        display_name: &str,
    ) -> Result<(String, Option<DateTime<Utc>>)> {
        let end = Utc::now() + Duration::days(SECRET_LIFETIME_DAYS);
        let url = self
            .client
            .config()
            .graph_endpoint(&format!("/applications/{application_object_id}/addPassword"));

        let credential: PasswordCredential = self
            .client
            .post(
                Audience::Graph,
                &url,
                &json!({
                    "passwordCredential": {
                        "displayName": display_name,
                        "endDateTime": end.to_rfc3339(),
                    }
                }),
            )
            .await?;

        let secret = credential
            .secret_text
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ArmError::InvalidResponse("addPassword returned no secretText".to_string()))?;
        Ok((secret, credential.end_date_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::StaticTokenCredential;
    use crate::ArmConfig;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn graph(server: &MockServer) -> Graph {
        let config = ArmConfig {
            resource_manager_url: server.uri(),
            graph_url: server.uri(),
            ..ArmConfig::default()
        };
        let client =
            ArmClient::new(config, Arc::new(StaticTokenCredential::new("token"))).unwrap();
        Graph::new(client)
    }

    async fn mount_add_password(server: &MockServer, app_object_id: &str, secret: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/v1.0/applications/{app_object_id}/addPassword")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keyId": "k1",
                "secretText": secret,
                "endDateTime": "2030-01-01T00:00:00Z"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn creates_application_principal_and_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/applications"))
            .and(body_partial_json(json!({"displayName": "aks-demo-sp"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "app-object", "appId": "app-id", "displayName": "aks-demo-sp"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/servicePrincipals"))
            .and(body_partial_json(json!({"appId": "app-id"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "sp-object"})))
            .expect(1)
            .mount(&server)
            .await;
        mount_add_password(&server, "app-object", "s3cret").await;

        let sp = graph(&server)
            .create_service_principal("aks-demo-sp")
            .await
            .unwrap();

        assert_eq!(sp.app_id, "app-id");
        assert_eq!(sp.object_id, "sp-object");
        assert_eq!(sp.application_object_id, "app-object");
        assert_eq!(sp.secret, "s3cret");
        assert!(sp.secret_expires_at.is_some());
        assert_eq!(sp.profile().client_id, "app-id");
        assert!(!format!("{sp:?}").contains("s3cret"));
    }

    #[tokio::test]
    async fn rotate_adds_password() {
        let server = MockServer::start().await;
        mount_add_password(&server, "app-object", "n3w").await;

        let (secret, expires) = graph(&server).rotate_secret("app-object").await.unwrap();
        assert_eq!(secret, "n3w");
        assert_eq!(expires.unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn missing_secret_text_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keyId": "k1"})))
            .mount(&server)
            .await;

        let err = graph(&server).rotate_secret("app-object").await.unwrap_err();
        assert!(matches!(err, ArmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn graph_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/applications"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "Authorization_RequestDenied", "message": "Insufficient privileges"}
            })))
            .mount(&server)
            .await;

        let err = graph(&server).create_service_principal("x").await.unwrap_err();
        assert_eq!(err.code(), Some("Authorization_RequestDenied"));
        assert!(graph(&server).create_service_principal(" ").await.is_err());
    }

    #[tokio::test]
    async fn failed_principal_create_deletes_application() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/applications"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "app-object", "appId": "app-id"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/servicePrincipals"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"code": "InternalServerError", "message": "boom"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1.0/applications/app-object"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let err = graph(&server).create_service_principal("aks-demo-sp").await.unwrap_err();
        assert_eq!(err.code(), Some("InternalServerError"));
    }

    #[tokio::test]
    async fn failed_secret_keeps_original_error_when_cleanup_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/applications"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "app-object", "appId": "app-id"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/servicePrincipals"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "sp-object"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/applications/app-object/addPassword"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keyId": "k1"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1.0/applications/app-object"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "Authorization_RequestDenied", "message": "no"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = graph(&server).create_service_principal("aks-demo-sp").await.unwrap_err();
        assert!(matches!(err, ArmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn looks_up_applications_and_principals() {
        let server = MockServer::start().await;
        let body = json!({"id": "app-object", "appId": "app-id", "displayName": "aks-demo-sp"});
        Mock::given(method("GET"))
            .and(path("/v1.0/applications/app-object"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/applications(appId='app-id')"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/servicePrincipals(appId='app-id')"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sp-object"})))
            .mount(&server)
            .await;

        let graph = graph(&server);
        let by_object = graph.get_application("app-object").await.unwrap();
        let by_app_id = graph.find_application("app-id").await.unwrap();
        assert_eq!(by_object, by_app_id);
        assert_eq!(by_object.app_id, "app-id");
        assert_eq!(graph.service_principal_object_id("app-id").await.unwrap(), "sp-object");
    }

    #[tokio::test]
    async fn delete_application_tolerates_missing() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1.0/applications/app-object"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "Request_ResourceNotFound", "message": "gone"}
            })))
            .mount(&server)
            .await;

        assert!(!graph(&server).delete_application("app-object").await.unwrap());
    }
}
