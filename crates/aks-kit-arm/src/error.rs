//! Error types for Azure Resource Manager and Graph calls.

use aks_kit_core::mentions_service_principal;
use thiserror::Error;

/// A result type using `ArmError`.
pub type Result<T> = std::result::Result<T, ArmError>;

/// Errors that can occur while talking to Azure or handling its responses.
#[derive(Debug, Error)]
pub enum ArmError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error document.
    #[error("{code}: {message} (HTTP {status})")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Service error code, e.g. `ServicePrincipalNotFound`.
        code: String,
        /// Human readable message from the service.
        message: String,
    },

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A bearer token could not be obtained.
    #[error("credential error: {0}")]
    Credential(String),

    /// A response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A request could not be built from the caller's input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A resource reached a failed terminal provisioning state.
    #[error("{resource} provisioning ended in state {state}")]
    Provisioning {
        /// The resource being provisioned.
        resource: String,
        /// The terminal state it reached.
        state: String,
    },

    /// Waiting for a resource gave up.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// A kubeconfig could not be parsed, merged or turned into a client.
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// An identifier in a response or argument was malformed.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] aks_kit_core::IdError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] aks_kit_core::CoreError),

    /// An external tool (e.g. the Azure CLI) failed.
    #[error("tool error: {0}")]
    Tool(#[from] aks_kit_tools::ToolError),

    /// Local file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArmError {
    /// The HTTP status behind this error, if it came from a response.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The service error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether a cluster create failed because its service principal has not
    /// replicated to the resource manager yet.
    #[must_use]
    pub fn is_service_principal_propagation(&self) -> bool {
        mentions_service_principal(self)
    }

    /// Whether a role assignment failed because the principal is not visible
    /// to the authorization service yet.
    #[must_use]
    pub fn is_principal_propagation(&self) -> bool {
        self.code() == Some("PrincipalNotFound")
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: &str, message: &str) -> ArmError {
        ArmError::Api {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn service_principal_propagation_detection() {
        let err = api(
            400,
            "ServicePrincipalNotFound",
            "Service principal clientID: 1234 not found in Active Directory tenant 5678",
        );
        assert!(err.is_service_principal_propagation());

        let err = api(400, "BadRequest", "The service principal secret is invalid");
        assert!(err.is_service_principal_propagation());

        let err = api(409, "QuotaExceeded", "Operation could not be completed as it results in exceeding approved Total Regional Cores quota");
        assert!(!err.is_service_principal_propagation());
    }

    #[test]
    fn principal_propagation_uses_code() {
        assert!(api(400, "PrincipalNotFound", "Principal abc does not exist").is_principal_propagation());
        assert!(!api(403, "AuthorizationFailed", "no").is_principal_propagation());
    }

    #[test]
    fn retriable_statuses() {
        assert!(api(429, "TooManyRequests", "slow down").is_retriable());
        assert!(api(503, "ServiceUnavailable", "later").is_retriable());
        assert!(!api(400, "InvalidParameter", "bad").is_retriable());
        assert!(!ArmError::NotFound("x".into()).is_retriable());
    }

    #[test]
    fn status_and_code() {
        let err = api(409, "Conflict", "busy");
        assert_eq!(err.status_code(), Some(409));
        assert_eq!(err.code(), Some("Conflict"));
        assert_eq!(ArmError::NotFound("x".into()).status_code(), Some(404));
        assert_eq!(ArmError::Credential("x".into()).code(), None);
    }

    #[test]
    fn api_display_keeps_code_and_message() {
        let err = api(400, "InvalidParameter", "dnsPrefix is invalid");
        assert_eq!(err.to_string(), "InvalidParameter: dnsPrefix is invalid (HTTP 400)");
    }
}
