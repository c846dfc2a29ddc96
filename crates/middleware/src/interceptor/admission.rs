use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{Interceptor, Invocation, QosObserver};
use crate::address::Address;
use crate::directory::Directory;
use crate::envelope::{CallEnvelope, ResultEnvelope};
use crate::error::Result;
use crate::fault::{MiddlewareFault, MiddlewareFaultKind};
use crate::options::{AdmissionMode, AdmissionOptions};

/// Server-side limit on calls executing concurrently in one dispatcher.
///
/// Admitted calls are observed by a [`QosObserver`]. What happens to a call
/// arriving at the limit depends on the [`AdmissionMode`]. In
/// [`AdmissionMode::ForwardAtMax`] the call is re-sent through `forwarder` to
/// the first instance published under the same identifier that is not yet in
/// its address chain, and the forwarded result is returned as is.
pub struct AdmissionControl {
    identifier: String,
    address: Address,
    options: AdmissionOptions,
    directory: Arc<dyn Directory>,
    forwarder: Arc<dyn Invocation>,
    observer: Arc<QosObserver>,
    queue: Option<Semaphore>,
}

impl AdmissionControl {
    /// Create admission control for the dispatcher bound at `address`.
    pub fn new(
        identifier: impl Into<String>,
        address: Address,
        options: AdmissionOptions,
        directory: Arc<dyn Directory>,
        forwarder: Arc<dyn Invocation>,
    ) -> Self {
        let queue = (options.mode == AdmissionMode::QueueAtMax)
            .then(|| Semaphore::new(options.max_in_flight.min(Semaphore::MAX_PERMITS)));

        Self {
            identifier: identifier.into(),
            address,
            options,
            directory,
            forwarder,
            observer: Arc::new(QosObserver::new()),
            queue,
        }
    }

    /// Counters of admitted calls.
    #[must_use]
    pub fn observer(&self) -> Arc<QosObserver> {
        Arc::clone(&self.observer)
    }

    /// Settings in force.
    #[must_use]
    pub const fn options(&self) -> AdmissionOptions {
        self.options
    }

    fn refuse(
        &self,
        call: &CallEnvelope,
        kind: MiddlewareFaultKind,
        message: String,
    ) -> Option<ResultEnvelope> {
        debug!("Refusing {} at {}: {}", call.method_name(), self.address, message);
        call.expects_result().then(|| {
            ResultEnvelope::middleware_fault(call, MiddlewareFault::new(kind, message), self.address)
        })
    }

    async fn forward(&self, call: &mut CallEnvelope) -> Option<ResultEnvelope> {
        let known = match self.directory.lookup_all(&self.identifier).await {
            Ok(known) => known,
            Err(err) => {
                warn!("Directory lookup for {} failed: {}", self.identifier, err);
                Vec::new()
            }
        };

        let Some(alternate) = known.into_iter().find(|address| !call.contains(address)) else {
            return self.refuse(
                call,
                MiddlewareFaultKind::ForwardUnavailable,
                format!("{} is at capacity and has no alternate", self.identifier),
            );
        };

        debug!("Forwarding {} from {} to {}", call.method_name(), self.address, alternate);
        call.push_alternate(alternate);
        match self.forwarder.invoke(call).await {
            Ok(result) => result,
            Err(err) => self.refuse(
                call,
                MiddlewareFaultKind::ForwardUnavailable,
                format!("forward to {alternate} failed: {err}"),
            ),
        }
    }
}

impl fmt::Debug for AdmissionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionControl")
            .field("identifier", &self.identifier)
            .field("address", &self.address)
            .field("options", &self.options)
            .field("observer", &self.observer.snapshot())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Interceptor for AdmissionControl {
    async fn intercept(
        &self,
        next: &dyn Invocation,
        call: &mut CallEnvelope,
    ) -> Result<Option<ResultEnvelope>> {
        match self.options.mode {
            AdmissionMode::NeverBlock => {
                let _guard = self.observer.enter();
                next.invoke(call).await
            }
            AdmissionMode::QueueAtMax => {
                let permit = match &self.queue {
                    Some(queue) => queue.acquire().await.ok(),
                    None => None,
                };
                if permit.is_none() {
                    return Ok(self.refuse(
                        call,
                        MiddlewareFaultKind::CapacityBlocked,
                        "admission queue closed".to_string(),
                    ));
                }
                let _guard = self.observer.enter();
                next.invoke(call).await
            }
            AdmissionMode::BlockAtMax => match self.observer.try_enter(self.options.max_in_flight) {
                Some(_guard) => next.invoke(call).await,
                None => Ok(self.refuse(
                    call,
                    MiddlewareFaultKind::CapacityBlocked,
                    format!(
                        "{} calls in flight, limit is {}",
                        self.observer.in_flight(),
                        self.options.max_in_flight
                    ),
                )),
            },
            AdmissionMode::ForwardAtMax => {
                match self.observer.try_enter(self.options.max_in_flight) {
                    Some(_guard) => next.invoke(call).await,
                    None => Ok(self.forward(call).await),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryEntry, MemoryDirectory};
    use crate::error::Error;
    use crate::interceptor::testing::Scripted;
    use crate::value::TypedValue;
    use courier_transport::TransportError;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(id: i32) -> Address {
        Address::new(id, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000 + u16::try_from(id).unwrap())
    }

    /// Blocks every call until `open` is called once per call.
    struct Gate {
        permits: Semaphore,
    }

    impl Gate {
        fn closed() -> Self {
            Self {
                permits: Semaphore::new(0),
            }
        }

        fn open(&self) {
            self.permits.add_permits(1);
        }
    }

    #[async_trait]
    impl Invocation for Gate {
        async fn invoke(&self, call: &mut CallEnvelope) -> Result<Option<ResultEnvelope>> {
            self.permits
                .acquire()
                .await
                .map_err(|_| Error::Transport(TransportError::Closed))?
                .forget();
            Ok(Some(ResultEnvelope::returned(
                call,
                TypedValue::unit(),
                call.target(),
            )))
        }
    }

    async fn directory_with(addresses: &[Address]) -> Arc<MemoryDirectory> {
        let directory = Arc::new(MemoryDirectory::new());
        for address in addresses {
            directory
                .bind(DirectoryEntry::new("calc", *address))
                .await
                .unwrap();
        }
        directory
    }

    fn admission(
        options: AdmissionOptions,
        directory: Arc<MemoryDirectory>,
        forwarder: Arc<dyn Invocation>,
    ) -> AdmissionControl {
        AdmissionControl::new("calc", addr(1), options, directory, forwarder)
    }

    fn call() -> CallEnvelope {
        CallEnvelope::new("sum", vec![], None, true, addr(1))
    }

    #[tokio::test]
    async fn test_block_at_max_refuses_second_call() {
        let control = admission(
            AdmissionOptions::block_at(1),
            directory_with(&[addr(1)]).await,
            Arc::new(Scripted::default()),
        );
        let gate = Gate::closed();
        let (mut first, mut second) = (call(), call());

        let (slow, refused) = tokio::join!(control.intercept(&gate, &mut first), async {
            let refused = control.intercept(&gate, &mut second).await;
            gate.open();
            refused
        });

        assert!(slow.unwrap().unwrap().result().is_some());
        let refused = refused.unwrap().unwrap();
        assert_eq!(
            refused.middleware_fault_ref().unwrap().kind,
            MiddlewareFaultKind::CapacityBlocked
        );
        assert_eq!(control.observer().snapshot().invocations, 1);
    }

    #[tokio::test]
    async fn test_forward_at_max_uses_alternate() {
        let forwarder = Arc::new(Scripted::default());
        let control = admission(
            AdmissionOptions::forward_at(1),
            directory_with(&[addr(1), addr(2)]).await,
            Arc::clone(&forwarder) as Arc<dyn Invocation>,
        );
        let gate = Gate::closed();
        let (mut first, mut second) = (call(), call());

        let (_, forwarded) = tokio::join!(control.intercept(&gate, &mut first), async {
            let forwarded = control.intercept(&gate, &mut second).await;
            gate.open();
            forwarded
        });

        let forwarded = forwarded.unwrap().unwrap();
        assert_eq!(forwarded.served_by(), addr(2));
        assert_eq!(second.address_chain(), vec![addr(1), addr(2)]);
        assert_eq!(forwarder.seen(), vec![addr(2)]);
    }

    #[tokio::test]
    async fn test_forward_without_alternate_is_unavailable() {
        let control = admission(
            AdmissionOptions::forward_at(1),
            directory_with(&[addr(1)]).await,
            Arc::new(Scripted::default()),
        );
        let gate = Gate::closed();
        let (mut first, mut second) = (call(), call());

        let (_, refused) = tokio::join!(control.intercept(&gate, &mut first), async {
            let refused = control.intercept(&gate, &mut second).await;
            gate.open();
            refused
        });

        assert_eq!(
            refused.unwrap().unwrap().middleware_fault_ref().unwrap().kind,
            MiddlewareFaultKind::ForwardUnavailable
        );
    }

    #[tokio::test]
    async fn test_failed_forward_is_unavailable() {
        let control = admission(
            AdmissionOptions::forward_at(1),
            directory_with(&[addr(1), addr(2)]).await,
            Arc::new(Scripted::down(&[addr(2)])),
        );
        let gate = Gate::closed();
        let (mut first, mut second) = (call(), call());

        let (_, refused) = tokio::join!(control.intercept(&gate, &mut first), async {
            let refused = control.intercept(&gate, &mut second).await;
            gate.open();
            refused
        });

        assert_eq!(
            refused.unwrap().unwrap().middleware_fault_ref().unwrap().kind,
            MiddlewareFaultKind::ForwardUnavailable
        );
    }

    #[tokio::test]
    async fn test_queue_at_max_admits_in_turn() {
        let control = admission(
            AdmissionOptions::queue_at(1),
            directory_with(&[addr(1)]).await,
            Arc::new(Scripted::default()),
        );
        let gate = Gate::closed();
        let (mut first, mut second) = (call(), call());

        let (a, b, ()) = tokio::join!(
            control.intercept(&gate, &mut first),
            control.intercept(&gate, &mut second),
            async {
                tokio::task::yield_now().await;
                assert_eq!(control.observer().in_flight(), 1);
                gate.open();
                gate.open();
            }
        );

        assert!(a.unwrap().unwrap().result().is_some());
        assert!(b.unwrap().unwrap().result().is_some());
        assert_eq!(control.observer().snapshot().invocations, 2);
    }

    #[tokio::test]
    async fn test_refusal_without_result_is_silent() {
        let control = admission(
            AdmissionOptions::block_at(1),
            directory_with(&[addr(1)]).await,
            Arc::new(Scripted::default()),
        );
        let gate = Gate::closed();
        let mut first = call();
        let mut fire = CallEnvelope::new("sum", vec![], None, false, addr(1));

        let (_, refused) = tokio::join!(control.intercept(&gate, &mut first), async {
            let refused = control.intercept(&gate, &mut fire).await;
            gate.open();
            refused
        });

        assert!(refused.unwrap().is_none());
    }
}
