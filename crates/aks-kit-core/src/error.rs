//! Common error types for aks-kit.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors shared across the aks-kit crates.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An invalid identifier or resource name was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A configuration value could not be used.
    #[error("configuration error: {0}")]
    Config(String),
}
