//! Identifier types for Azure resources.
//!
//! Names are validated against the resource manager's naming rules up front so
//! that a typo fails locally instead of after a round trip.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An Azure subscription identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(uuid::Uuid);

impl SubscriptionId {
    /// Create a new `SubscriptionId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for SubscriptionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s.trim()).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SubscriptionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.0.to_string()
    }
}

/// Declares a validated string newtype for a resource name.
macro_rules! resource_name {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $validate:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a name.
            ///
            /// # Errors
            ///
            /// Returns an error if the name breaks the naming rules.
            pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
                let name = name.into();
                $validate(&name).map_err(|reason| IdError::InvalidName {
                    kind: $kind,
                    name: name.clone(),
                    reason,
                })?;
                Ok(Self(name))
            }

            /// Borrow the name.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> Self {
                name.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

resource_name!(
    /// A resource group name: up to 90 characters, no trailing period.
    ResourceGroupName,
    "resource group",
    validate_resource_group
);

resource_name!(
    /// A managed cluster name: up to 63 characters, alphanumeric at both ends.
    ClusterName,
    "cluster",
    validate_cluster
);

resource_name!(
    /// An agent pool name: up to 12 lowercase alphanumerics, starting with a letter.
    AgentPoolName,
    "agent pool",
    validate_agent_pool
);

fn check_length(name: &str, max: usize) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("must not be empty");
    }
    if name.chars().count() > max {
        return Err("too long");
    }
    Ok(())
}

fn validate_resource_group(name: &str) -> Result<(), &'static str> {
    check_length(name, 90)?;
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')'))
    {
        return Err("allowed characters are alphanumerics, '-', '_', '.', '(' and ')'");
    }
    if name.ends_with('.') {
        return Err("must not end with a period");
    }
    Ok(())
}

fn validate_cluster(name: &str) -> Result<(), &'static str> {
    check_length(name, 63)?;
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err("allowed characters are alphanumerics, '-' and '_'");
    }
    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
        return Err("must start and end with an alphanumeric character");
    }
    Ok(())
}

fn validate_agent_pool(name: &str) -> Result<(), &'static str> {
    check_length(name, 12)?;
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err("allowed characters are lowercase letters and digits");
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err("must start with a lowercase letter");
    }
    Ok(())
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// A resource name breaks the naming rules.
    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        /// Which kind of resource the name was for.
        kind: &'static str,
        /// The rejected name.
        name: String,
        /// The rule that was broken.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_id_roundtrip() {
        let uuid = uuid::Uuid::new_v4();
        let id = SubscriptionId::from_uuid(uuid);
        let parsed = SubscriptionId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn subscription_id_invalid() {
        let result = SubscriptionId::from_str("not-a-subscription");
        assert!(matches!(result, Err(IdError::InvalidUuid)));
    }

    #[test]
    fn subscription_id_serde_json() {
        let id = SubscriptionId::from_uuid(uuid::Uuid::new_v4());
        let json = serde_json::to_string(&id).unwrap();
        let parsed: SubscriptionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn resource_group_rules() {
        assert!(ResourceGroupName::new("my-rg_01.(prod)").is_ok());
        assert!(ResourceGroupName::new("").is_err());
        assert!(ResourceGroupName::new("trailing.").is_err());
        assert!(ResourceGroupName::new("has space").is_err());
        assert!(ResourceGroupName::new("a".repeat(91)).is_err());
    }

    #[test]
    fn cluster_rules() {
        assert!(ClusterName::new("aks-demo_1").is_ok());
        assert!(ClusterName::new("-leading").is_err());
        assert!(ClusterName::new("trailing_").is_err());
        assert!(ClusterName::new("a".repeat(64)).is_err());
    }

    #[test]
    fn agent_pool_rules() {
        assert!(AgentPoolName::new("nodepool1").is_ok());
        assert!(AgentPoolName::new("1pool").is_err());
        assert!(AgentPoolName::new("UpperCase").is_err());
        assert!(AgentPoolName::new("waytoolongname").is_err());
    }

    #[test]
    fn invalid_name_reports_kind() {
        let err = ClusterName::new("bad name").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cluster"));
        assert!(message.contains("bad name"));
    }

    #[test]
    fn name_serde_rejects_invalid() {
        let parsed: Result<AgentPoolName, _> = serde_json::from_str("\"Bad\"");
        assert!(parsed.is_err());
        let ok: AgentPoolName = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(ok.as_str(), "system");
    }
}
