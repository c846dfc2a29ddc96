//! Interceptor chains wrapping the delivery of a call envelope.
//!
//! An [`Interceptor`] receives the envelope together with the rest of the
//! chain as an [`Invocation`] and decides how often, and against which
//! address, to continue. Chains are fixed when they are built.

mod admission;
mod failover;
mod qos;
mod staged;

pub use admission::AdmissionControl;
pub use failover::RetryWithFailover;
pub use qos::{InFlightGuard, LATENCY_WINDOW, QosObserver, QosSnapshot};
pub use staged::StagedRetry;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::envelope::{CallEnvelope, ResultEnvelope};
use crate::error::Result;

/// The remainder of a chain.
///
/// Returns `Ok(None)` when the call expects no result.
#[async_trait]
pub trait Invocation: Send + Sync {
    /// Deliver the envelope.
    async fn invoke(&self, call: &mut CallEnvelope) -> Result<Option<ResultEnvelope>>;
}

/// A policy wrapped around the rest of a chain.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Handle one call, usually by invoking `next` one or more times.
    async fn intercept(
        &self,
        next: &dyn Invocation,
        call: &mut CallEnvelope,
    ) -> Result<Option<ResultEnvelope>>;
}

/// Interceptors in order, outermost first, ending in a terminal invocation.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    terminal: Arc<dyn Invocation>,
}

impl InterceptorChain {
    /// Build a chain. `interceptors[0]` sees the call first.
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>, terminal: Arc<dyn Invocation>) -> Self {
        Self {
            interceptors: interceptors.into(),
            terminal,
        }
    }

    /// Number of interceptors before the terminal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether calls go straight to the terminal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Invocation for InterceptorChain {
    async fn invoke(&self, call: &mut CallEnvelope) -> Result<Option<ResultEnvelope>> {
        Next {
            rest: &self.interceptors,
            terminal: self.terminal.as_ref(),
        }
        .invoke(call)
        .await
    }
}

struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    terminal: &'a dyn Invocation,
}

#[async_trait]
impl<'a> Invocation for Next<'a> {
    async fn invoke(&self, call: &mut CallEnvelope) -> Result<Option<ResultEnvelope>> {
        match self.rest.split_first() {
            Some((first, rest)) => {
                let next = Next {
                    rest,
                    terminal: self.terminal,
                };
                first.intercept(&next, call).await
            }
            None => self.terminal.invoke(call).await,
        }
    }
}
