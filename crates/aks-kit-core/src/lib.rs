//! Core types and utilities for aks-kit.
//!
//! - **Identifiers**: validated subscription ids and resource names
//! - **Consistency guard**: retries a create call while a freshly created
//!   service principal propagates to the resource manager
//! - **Error types**: shared error definitions
//!
//! # Example
//!
//! ```
//! use aks_kit_core::{ClusterName, ResourceGroupName};
//!
//! let group = ResourceGroupName::new("rg-demo").unwrap();
//! let cluster = ClusterName::new("aks-demo").unwrap();
//! assert_eq!(group.as_str(), "rg-demo");
//! assert_eq!(cluster.to_string(), "aks-demo");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod consistency;
pub mod error;
pub mod ids;

pub use consistency::{mentions_service_principal, CreateGuard, RetryPolicy};
pub use error::{CoreError, Result};
pub use ids::{AgentPoolName, ClusterName, IdError, ResourceGroupName, SubscriptionId};
