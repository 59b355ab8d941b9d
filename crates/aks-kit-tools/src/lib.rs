//! Wrappers around the container tooling an AKS workflow shells out to.
//!
//! Every wrapper takes an `Arc<dyn CommandRunner>`, so the same code runs
//! real processes in production and canned outputs in tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use aks_kit_tools::{Kubectl, ProcessRunner};
//!
//! # async fn example() -> aks_kit_tools::Result<()> {
//! let kubectl = Kubectl::new(Arc::new(ProcessRunner)).with_kubeconfig("/tmp/aks.kubeconfig");
//! for node in kubectl.nodes().await? {
//!     println!("{:?} ready={}", node.metadata.name, aks_kit_tools::kubectl::node_is_ready(&node));
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod docker;
pub mod error;
pub mod helm;
pub mod kubectl;
pub mod runner;

pub use docker::Docker;
pub use error::{Result, ToolError};
pub use helm::{Helm, HelmRelease, InstallOptions};
pub use kubectl::{node_is_ready, Kubectl};
pub use runner::{CommandOutput, CommandRunner, Invocation, ProcessRunner};

#[cfg(any(test, feature = "test-utils"))]
pub use runner::MockRunner;
