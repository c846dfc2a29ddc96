use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Interceptor, Invocation};
use crate::address::Address;
use crate::directory::Directory;
use crate::envelope::{CallEnvelope, ResultEnvelope};
use crate::error::{Error, PolicyError, Result};
use crate::options::check_attempts;

/// Retries a failing call, failing over to every other instance published
/// under the same identifier.
///
/// A failure is a retryable error or a result carrying a retryable middleware
/// fault. After the first failure the directory is consulted once; each
/// subsequent failure appends all known addresses missing from the chain, so
/// the next attempt goes to the last one appended.
pub struct RetryWithFailover {
    identifier: String,
    attempts: usize,
    directory: Arc<dyn Directory>,
}

impl RetryWithFailover {
    /// Allow up to `attempts` deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] unless `attempts` is within
    /// `1..=MAX_ATTEMPTS`.
    pub fn new(
        identifier: impl Into<String>,
        attempts: usize,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        check_attempts("attempts", attempts)?;
        Ok(Self {
            identifier: identifier.into(),
            attempts,
            directory,
        })
    }

    async fn known_instances(&self) -> Vec<Address> {
        self.directory
            .lookup_all(&self.identifier)
            .await
            .unwrap_or_else(|err| {
                warn!("Directory lookup for {} failed: {}", self.identifier, err);
                Vec::new()
            })
    }
}

impl fmt::Debug for RetryWithFailover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryWithFailover")
            .field("identifier", &self.identifier)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// The retryable middleware fault a result carries, as an error.
fn retryable_fault(result: &ResultEnvelope) -> Option<Error> {
    result
        .middleware_fault_ref()
        .filter(|fault| fault.kind.is_retryable())
        .map(|fault| Error::from(fault.clone()))
}

#[async_trait]
impl Interceptor for RetryWithFailover {
    async fn intercept(
        &self,
        next: &dyn Invocation,
        call: &mut CallEnvelope,
    ) -> Result<Option<ResultEnvelope>> {
        let mut known: Option<Vec<Address>> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = next.invoke(call).await;
            let cause = match outcome {
                Err(err) if err.is_retryable() => err,
                Ok(Some(result)) => match retryable_fault(&result) {
                    Some(cause) => cause,
                    None => return Ok(Some(result)),
                },
                other => return other,
            };
            debug!("Attempt {} on {} failed: {}", attempt, call.target(), cause);

            if attempt >= self.attempts {
                return Err(PolicyError::Exhausted {
                    attempts: attempt,
                    cause: Box::new(cause),
                }
                .into());
            }

            if known.is_none() {
                known = Some(self.known_instances().await);
            }
            let missing: Vec<Address> = known
                .iter()
                .flatten()
                .filter(|address| !call.contains(address))
                .copied()
                .collect();
            if missing.is_empty() {
                return Err(PolicyError::NoAlternates {
                    attempts: attempt,
                    cause: Box::new(cause),
                }
                .into());
            }
            for address in missing {
                call.push_alternate(address);
            }
        }
    }
}
