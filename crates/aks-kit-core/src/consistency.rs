//! Retry guard for create calls that depend on a just-created identity.
//!
//! Creating a managed cluster with a service principal that was registered a
//! few seconds earlier regularly fails because the principal has not yet
//! replicated from the identity directory to the resource manager. The
//! [`CreateGuard`] re-issues such a call with a fixed delay until it succeeds,
//! fails for another reason, or runs out of attempts.
//!
//! The guard never invents errors: whatever the last attempt returned is what
//! the caller sees, so exhaustion and a first-attempt failure carry the same
//! message shape.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use aks_kit_core::consistency::{mentions_service_principal, CreateGuard, RetryPolicy};
//!
//! # async fn example() -> Result<(), String> {
//! let guard = CreateGuard::new(
//!     RetryPolicy::new(3, Duration::from_millis(10)),
//!     mentions_service_principal::<String>,
//! );
//! let cluster = guard.run(|| async { Ok::<_, String>("created") }).await?;
//! assert_eq!(cluster, "created");
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Attempts made before the last error is surfaced.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Pause between two attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Attempt ceiling and constant inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. A ceiling of zero is treated as one attempt.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Total number of calls the guard may make.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Delay slept between a transient failure and the next attempt.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// Recognise the resource manager's "principal not visible yet" failures.
///
/// Matches `service principal` or `ServicePrincipal` anywhere in the error's
/// display text, ignoring case.
pub fn mentions_service_principal<E: Display + ?Sized>(error: &E) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("service principal") || message.contains("serviceprincipal")
}

/// Re-runs a create call while it fails with a transient error.
#[derive(Debug, Clone)]
pub struct CreateGuard<C> {
    policy: RetryPolicy,
    is_transient: C,
}

impl<C> CreateGuard<C> {
    /// Build a guard from a policy and a transient-error predicate.
    #[must_use]
    pub const fn new(policy: RetryPolicy, is_transient: C) -> Self {
        Self {
            policy,
            is_transient,
        }
    }

    /// The policy this guard runs with.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Drive `attempt` to completion.
    ///
    /// Returns the first success. A non-transient error is returned right
    /// away; a transient one is retried after the policy delay until the
    /// attempt ceiling is reached, at which point that last error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt, unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<T, E>
    where
        C: Fn(&E) -> bool,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut made = 1;

        loop {
            let error = match attempt().await {
                Ok(resource) => {
                    if made > 1 {
                        tracing::debug!(attempts = made, "Create succeeded after retrying");
                    }
                    return Ok(resource);
                }
                Err(error) => error,
            };

            if !(self.is_transient)(&error) {
                return Err(error);
            }

            if made >= max_attempts {
                tracing::warn!(
                    attempts = made,
                    error = %error,
                    "Create still failing after final attempt"
                );
                return Err(error);
            }

            tracing::info!(
                attempt = made,
                max_attempts,
                delay_ms = u64::try_from(self.policy.delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Create hit identity propagation delay, retrying"
            );
            tokio::time::sleep(self.policy.delay).await;
            made += 1;
        }
    }
}

/// Run `attempt` under the default policy, retrying service-principal lag.
///
/// # Errors
///
/// Returns the error of the final attempt, unchanged.
pub async fn create_with_principal_retry<T, E, F, Fut>(attempt: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    CreateGuard::new(RetryPolicy::default(), mentions_service_principal::<E>)
        .run(attempt)
        .await
}
