use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Interceptor, Invocation};
use crate::address::Address;
use crate::directory::Directory;
use crate::envelope::{CallEnvelope, ResultEnvelope};
use crate::error::{Error, PolicyError, Result};
use crate::options::ProxyOptions;

/// Client retry policy driven by [`ProxyOptions`].
///
/// Only retryable errors trigger retries; result envelopes pass through
/// untouched, whatever they carry. Retries against the registered address
/// come first, then one new alternate per attempt. The first registered retry
/// is immediate; each later one waits `delay × retries so far`.
pub struct StagedRetry {
    identifier: String,
    options: ProxyOptions,
    directory: Option<Arc<dyn Directory>>,
}

enum Attempt {
    Done(Result<Option<ResultEnvelope>>),
    Failed(Error),
}

impl StagedRetry {
    /// Create the policy. A directory is needed when `retry_on_other` is set.
    pub fn new(
        identifier: impl Into<String>,
        options: ProxyOptions,
        directory: Option<Arc<dyn Directory>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            options,
            directory,
        }
    }

    /// Options in force.
    #[must_use]
    pub const fn options(&self) -> &ProxyOptions {
        &self.options
    }

    async fn alternates(&self, call: &CallEnvelope) -> Vec<Address> {
        let Some(directory) = &self.directory else {
            return Vec::new();
        };
        match directory.lookup_all(&self.identifier).await {
            Ok(known) => known
                .into_iter()
                .filter(|address| !call.contains(address))
                .collect(),
            Err(err) => {
                warn!("Directory lookup for {} failed: {}", self.identifier, err);
                Vec::new()
            }
        }
    }
}

impl fmt::Debug for StagedRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedRetry")
            .field("identifier", &self.identifier)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

async fn attempt(next: &dyn Invocation, call: &mut CallEnvelope) -> Attempt {
    match next.invoke(call).await {
        Err(err) if err.is_retryable() => {
            debug!("Attempt on {} failed: {}", call.target(), err);
            Attempt::Failed(err)
        }
        other => Attempt::Done(other),
    }
}

#[async_trait]
impl Interceptor for StagedRetry {
    async fn intercept(
        &self,
        next: &dyn Invocation,
        call: &mut CallEnvelope,
    ) -> Result<Option<ResultEnvelope>> {
        let mut cause = match attempt(next, call).await {
            Attempt::Done(outcome) => return outcome,
            Attempt::Failed(err) => err,
        };
        if !self.options.retries() {
            return Err(PolicyError::RetryDisabled {
                cause: Box::new(cause),
            }
            .into());
        }

        let mut attempts = 1;
        if self.options.retry_on_registered {
            for retry in 0..self.options.attempts_on_registered {
                #[allow(clippy::cast_possible_truncation)]
                let delay = self.options.delay_on_registered * retry as u32;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempts += 1;
                match attempt(next, call).await {
                    Attempt::Done(outcome) => return outcome,
                    Attempt::Failed(err) => cause = err,
                }
            }
        }

        if self.options.retry_on_other {
            let mut alternates = self.alternates(call).await.into_iter();
            for _ in 0..self.options.attempts_on_other {
                let Some(alternate) = alternates.next() else {
                    return Err(PolicyError::NoAlternates {
                        attempts,
                        cause: Box::new(cause),
                    }
                    .into());
                };
                call.push_alternate(alternate);
                attempts += 1;
                match attempt(next, call).await {
                    Attempt::Done(outcome) => return outcome,
                    Attempt::Failed(err) => cause = err,
                }
            }
        }

        Err(PolicyError::Exhausted {
            attempts,
            cause: Box::new(cause),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryEntry, MemoryDirectory};
    use crate::fault::{MiddlewareFault, MiddlewareFaultKind};
    use crate::interceptor::testing::Scripted;
    use assert_matches::assert_matches;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn addr(id: i32) -> Address {
        Address::new(id, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    }

    async fn directory_with(addresses: &[Address]) -> Arc<dyn Directory> {
        let directory = MemoryDirectory::new();
        for address in addresses {
            directory
                .bind(DirectoryEntry::new("calc", *address))
                .await
                .unwrap();
        }
        Arc::new(directory)
    }

    fn call() -> CallEnvelope {
        CallEnvelope::new("sum", vec![], None, true, addr(1))
    }

    #[tokio::test]
    async fn test_defaults_disable_retries() {
        let staged = StagedRetry::new("calc", ProxyOptions::default(), None);
        let next = Scripted::down(&[addr(1)]);

        assert_matches!(
            staged.intercept(&next, &mut call()).await,
            Err(Error::Policy(PolicyError::RetryDisabled { .. }))
        );
        assert_eq!(next.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_registered_phase_then_exhausted() {
        let options =
            ProxyOptions::default().with_retry_on_registered(3, Duration::from_millis(10));
        let staged = StagedRetry::new("calc", options, None);
        let next = Scripted::down(&[addr(1)]);

        let started = std::time::Instant::now();
        assert_matches!(
            staged.intercept(&next, &mut call()).await,
            Err(Error::Policy(PolicyError::Exhausted { attempts: 4, .. }))
        );
        assert_eq!(next.seen(), vec![addr(1); 4]);
        // 0 + 10 + 20 ms between the retries
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_first_registered_retry_is_immediate() {
        let options = ProxyOptions::default().with_retry_on_registered(1, Duration::from_millis(100));
        let staged = StagedRetry::new("calc", options, None);
        let next = Scripted::down(&[addr(1)]);

        let started = std::time::Instant::now();
        assert_matches!(
            staged.intercept(&next, &mut call()).await,
            Err(Error::Policy(PolicyError::Exhausted { attempts: 2, .. }))
        );
        assert_eq!(next.seen().len(), 2);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_other_phase_walks_alternates() {
        let options = ProxyOptions::default().with_retry_on_other(5);
        let directory = directory_with(&[addr(1), addr(2), addr(3)]).await;
        let staged = StagedRetry::new("calc", options, Some(directory));
        let next = Scripted::down(&[addr(1), addr(2)]);
        let mut call = call();

        let result = staged.intercept(&next, &mut call).await.unwrap().unwrap();

        assert_eq!(result.served_by(), addr(3));
        assert_eq!(next.seen(), vec![addr(1), addr(2), addr(3)]);
        assert_eq!(call.address_chain(), vec![addr(1), addr(2), addr(3)]);
    }

    #[tokio::test]
    async fn test_other_phase_runs_out_of_alternates() {
        let options = ProxyOptions::default().with_retry_on_other(5);
        let directory = directory_with(&[addr(1), addr(2)]).await;
        let staged = StagedRetry::new("calc", options, Some(directory));
        let next = Scripted::down(&[addr(1), addr(2)]);

        assert_matches!(
            staged.intercept(&next, &mut call()).await,
            Err(Error::Policy(PolicyError::NoAlternates { attempts: 2, .. }))
        );
    }

    struct Refusing;

    #[async_trait]
    impl Invocation for Refusing {
        async fn invoke(&self, call: &mut CallEnvelope) -> Result<Option<ResultEnvelope>> {
            let fault = MiddlewareFault::new(MiddlewareFaultKind::CapacityBlocked, "busy");
            Ok(Some(ResultEnvelope::middleware_fault(call, fault, call.target())))
        }
    }

    #[tokio::test]
    async fn test_fault_results_pass_through() {
        let options = ProxyOptions::default().with_retry_on_registered(5, Duration::ZERO);
        let staged = StagedRetry::new("calc", options, None);

        let result = staged.intercept(&Refusing, &mut call()).await.unwrap().unwrap();
        assert_eq!(
            result.middleware_fault_ref().unwrap().kind,
            MiddlewareFaultKind::CapacityBlocked
        );
    }
}
