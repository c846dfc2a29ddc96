//! Server core: accepts exchanges and routes call envelopes to dispatchers.
//!
//! Dispatchers are bound while the invoker is idle. Starting it freezes the
//! bindings into a read-only routing table and spawns one accept loop per
//! listening endpoint. Each accepted exchange is served on its own task, so a
//! failing exchange never affects the loop or other calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use courier_transport::{Listener, ServerConnection, Transport};

use crate::address::Address;
use crate::codec;
use crate::directory::Directory;
use crate::envelope::{CallEnvelope, ResultEnvelope};
use crate::error::{LifecycleError, Result};
use crate::fault::{MiddlewareFault, MiddlewareFaultKind};
use crate::interceptor::{AdmissionControl, Interceptor, Invocation, QosSnapshot};
use crate::requestor::Requestor;
use crate::session::SessionMessage;
use crate::skeleton::Dispatcher;

/// Configuration for the invoker.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// How long an accept loop waits before checking whether to stop.
    pub poll_interval: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl InvokerConfig {
    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Clone)]
struct Registration {
    dispatcher: Arc<dyn Dispatcher>,
    admission: Arc<AdmissionControl>,
}

type Routes = HashMap<Address, Registration>;

#[derive(Default)]
struct InvokerState {
    registrations: Routes,
    listeners: HashMap<SocketAddr, Arc<dyn Listener>>,
    loops: Vec<JoinHandle<()>>,
}

/// Hosts dispatchers and serves calls addressed to them.
pub struct Invoker {
    transport: Arc<dyn Transport>,
    directory: Arc<dyn Directory>,
    config: InvokerConfig,
    state: Mutex<InvokerState>,
    running: Arc<AtomicBool>,
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Invoker {
    /// Create an idle invoker.
    ///
    /// `directory` is consulted by dispatchers that forward calls at capacity.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        config: InvokerConfig,
    ) -> Self {
        Self {
            transport,
            directory,
            config,
            state: Mutex::new(InvokerState::default()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether accept loops are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Bind a dispatcher at its address, listening on its endpoint if no
    /// other dispatcher does yet.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Running`] while running,
    /// [`LifecycleError::AlreadyBound`] if the address is taken, or a
    /// transport error if the endpoint cannot be bound.
    pub async fn bind(&self, dispatcher: Arc<dyn Dispatcher>) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.is_running() {
            return Err(LifecycleError::Running.into());
        }

        let address = dispatcher.address();
        if state.registrations.contains_key(&address) {
            return Err(LifecycleError::AlreadyBound(address).into());
        }

        let endpoint = address.endpoint();
        if !state.listeners.contains_key(&endpoint) {
            let listener = self.transport.listen(endpoint).await?;
            info!("Listening on {}", listener.local_addr());
            state.listeners.insert(endpoint, listener);
        }

        let forwarder: Arc<dyn Invocation> = Arc::new(Requestor::new(Arc::clone(&self.transport)));
        let admission = Arc::new(AdmissionControl::new(
            dispatcher.identifier(),
            address,
            dispatcher.admission(),
            Arc::clone(&self.directory),
            forwarder,
        ));

        debug!("Bound {} at {}", dispatcher.identifier(), address);
        state.registrations.insert(
            address,
            Registration {
                dispatcher,
                admission,
            },
        );
        Ok(())
    }

    /// Remove the dispatcher bound at `address`, closing its endpoint if it
    /// was the last one there.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Running`] while running or
    /// [`LifecycleError::NotBound`] if nothing is bound at `address`.
    pub async fn unbind(&self, address: &Address) -> Result<Arc<dyn Dispatcher>> {
        let mut state = self.state.lock().await;
        if self.is_running() {
            return Err(LifecycleError::Running.into());
        }

        let registration = state
            .registrations
            .remove(address)
            .ok_or(LifecycleError::NotBound(*address))?;

        let endpoint = address.endpoint();
        if !state
            .registrations
            .keys()
            .any(|other| other.endpoint() == endpoint)
        {
            state.listeners.remove(&endpoint);
            info!("Closed {}", endpoint);
        }

        debug!("Unbound {}", address);
        Ok(registration.dispatcher)
    }

    /// Start serving.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyRunning`] if already started.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.is_running() {
            return Err(LifecycleError::AlreadyRunning.into());
        }

        let routes = Arc::new(state.registrations.clone());
        self.running.store(true, Ordering::Release);

        let loops = state
            .listeners
            .values()
            .map(|listener| {
                listener.set_accept_timeout(self.config.poll_interval);
                tokio::spawn(accept_loop(
                    Arc::clone(listener),
                    Arc::clone(&routes),
                    Arc::clone(&self.running),
                    self.config.poll_interval,
                ))
            })
            .collect();
        state.loops = loops;

        info!(
            "Invoker started with {} dispatchers on {} endpoints",
            routes.len(),
            state.listeners.len()
        );
        Ok(())
    }

    /// Stop accepting and wait for the accept loops to exit. Calls already
    /// dispatched run to completion.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] if not started.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !self.is_running() {
            return Err(LifecycleError::NotRunning.into());
        }

        self.running.store(false, Ordering::Release);
        for handle in state.loops.drain(..) {
            if let Err(err) = handle.await {
                error!("Accept loop failed: {}", err);
            }
        }

        info!("Invoker stopped");
        Ok(())
    }

    /// Addresses with a bound dispatcher.
    pub async fn bound_addresses(&self) -> Vec<Address> {
        self.state
            .lock()
            .await
            .registrations
            .keys()
            .copied()
            .collect()
    }

    /// Endpoints being listened on.
    pub async fn local_endpoints(&self) -> Vec<SocketAddr> {
        self.state
            .lock()
            .await
            .listeners
            .values()
            .map(|listener| listener.local_addr())
            .collect()
    }

    /// Call counters of the dispatcher at `address`.
    pub async fn statistics(&self, address: &Address) -> Option<QosSnapshot> {
        self.state
            .lock()
            .await
            .registrations
            .get(address)
            .map(|registration| registration.admission.observer().snapshot())
    }
}

impl Drop for Invoker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

async fn accept_loop(
    listener: Arc<dyn Listener>,
    routes: Arc<Routes>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let endpoint = listener.local_addr();
    debug!("Accept loop on {} started", endpoint);

    while running.load(Ordering::Acquire) {
        match listener.accept().await {
            Ok(connection) => {
                let routes = Arc::clone(&routes);
                tokio::spawn(async move {
                    let peer = connection.peer();
                    if let Err(err) = serve(connection, routes).await {
                        warn!("Exchange with {} failed: {}", peer, err);
                    }
                });
            }
            Err(err) if err.is_accept_timeout() => {}
            Err(err) => {
                error!("Accept on {} failed: {}", endpoint, err);
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    debug!("Accept loop on {} stopped", endpoint);
}

#[instrument(skip_all, fields(peer = %connection.peer()))]
async fn serve(mut connection: Box<dyn ServerConnection>, routes: Arc<Routes>) -> Result<()> {
    let request = connection.receive().await?;
    let mut call = codec::open(&request)?.into_call()?;
    let target = call.target();

    let result = match routes.get(&target) {
        Some(registration) => {
            let dispatch = Dispatch {
                dispatcher: registration.dispatcher.as_ref(),
            };
            registration.admission.intercept(&dispatch, &mut call).await?
        }
        None => not_bound(&call, target),
    };

    match result {
        Some(result) => {
            connection
                .send(codec::seal(&SessionMessage::result(result))?)
                .await?;
        }
        None => connection.disconnect().await?,
    }
    Ok(())
}

fn not_bound(call: &CallEnvelope, target: Address) -> Option<ResultEnvelope> {
    warn!("No dispatcher bound at {}", target);
    call.expects_result().then(|| {
        ResultEnvelope::middleware_fault(
            call,
            MiddlewareFault::new(
                MiddlewareFaultKind::NotBound,
                format!("no object bound at {target}"),
            ),
            target,
        )
    })
}

/// Terminal invocation handing the call to a dispatcher.
struct Dispatch<'a> {
    dispatcher: &'a dyn Dispatcher,
}

#[async_trait]
impl<'a> Invocation for Dispatch<'a> {
    async fn invoke(&self, call: &mut CallEnvelope) -> Result<Option<ResultEnvelope>> {
        Ok(self.dispatcher.process_call(call).await)
    }
}
