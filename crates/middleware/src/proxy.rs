//! Client-side callers forwarding method calls to remote dispatchers.
//!
//! A [`Caller`] is bound to one address. Each call becomes a
//! [`CallEnvelope`] seeded with that address and is driven through the
//! caller's interceptor chain, which always ends in a [`StagedRetry`] and the
//! transport round trip.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use courier_transport::Transport;

use crate::address::Address;
use crate::directory::Directory;
use crate::envelope::{AccessorCall, CallEnvelope, Outcome};
use crate::error::{Error, Result};
use crate::interceptor::{Interceptor, InterceptorChain, Invocation, RetryWithFailover, StagedRetry};
use crate::options::ProxyOptions;
use crate::requestor::Requestor;
use crate::skeleton::{CHECK_CONNECTION, CONNECTED};
use crate::value::{Typed, TypedValue, Value};

/// One method call, built up before it is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    method: String,
    args: Vec<TypedValue>,
    secondary: Option<AccessorCall>,
    expects_result: bool,
}

impl Call {
    /// Call `method` with no arguments, waiting for its result.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            secondary: None,
            expects_result: true,
        }
    }

    /// Append an argument, declared with its natural type.
    #[must_use]
    pub fn arg<T: Typed>(mut self, value: T) -> Self {
        self.args.push(TypedValue::of(value));
        self
    }

    /// Append an argument with an explicit declared type.
    #[must_use]
    pub fn typed_arg(mut self, value: TypedValue) -> Self {
        self.args.push(value);
        self
    }

    /// Run the method on the instance returned by `accessor(args)`.
    #[must_use]
    pub fn on_instance(mut self, accessor: impl Into<String>, args: Vec<TypedValue>) -> Self {
        self.secondary = Some(AccessorCall {
            name: accessor.into(),
            args,
        });
        self
    }

    /// Send without waiting for a result.
    #[must_use]
    pub const fn no_result(mut self) -> Self {
        self.expects_result = false;
        self
    }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    fn into_envelope(self, origin: Address) -> CallEnvelope {
        CallEnvelope::new(
            self.method,
            self.args,
            self.secondary,
            self.expects_result,
            origin,
        )
    }
}

/// What a successful call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    value: Option<TypedValue>,
    served_by: Option<Address>,
    address_chain: Vec<Address>,
}

impl Reply {
    /// Returned value; `None` for calls sent without waiting.
    #[must_use]
    pub const fn value(&self) -> Option<&TypedValue> {
        self.value.as_ref()
    }

    /// Consume into the returned value.
    #[must_use]
    pub fn into_value(self) -> Option<TypedValue> {
        self.value
    }

    /// Dispatcher that produced the result.
    #[must_use]
    pub const fn served_by(&self) -> Option<Address> {
        self.served_by
    }

    /// Addresses the call was sent to, in order.
    #[must_use]
    pub fn address_chain(&self) -> &[Address] {
        &self.address_chain
    }
}

struct CallerInner {
    identifier: String,
    bound: RwLock<Address>,
    options: ProxyOptions,
    chain: InterceptorChain,
}

/// Handle for calling one remote object. Clones share the binding.
#[derive(Clone)]
pub struct Caller {
    inner: Arc<CallerInner>,
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("identifier", &self.inner.identifier)
            .field("address", &self.address())
            .field("options", &self.inner.options)
            .field("chain", &self.inner.chain)
            .finish()
    }
}

impl Caller {
    /// Start building a caller for the object published as `identifier` at
    /// `address`.
    pub fn builder(
        identifier: impl Into<String>,
        address: Address,
        transport: Arc<dyn Transport>,
    ) -> CallerBuilder {
        CallerBuilder {
            identifier: identifier.into(),
            address,
            transport,
            options: ProxyOptions::default(),
            directory: None,
            interceptors: Vec::new(),
            failover: None,
        }
    }

    /// Service identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Address calls are currently sent to.
    #[must_use]
    pub fn address(&self) -> Address {
        *self.inner.bound.read()
    }

    /// Retry options.
    #[must_use]
    pub fn options(&self) -> &ProxyOptions {
        &self.inner.options
    }

    /// Send future calls to `address`.
    pub fn rebind(&self, address: Address) {
        *self.inner.bound.write() = address;
    }

    /// Send a call and report where it was served.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Method`] if the remote method raised a fault,
    /// [`Error::Middleware`] or [`Error::Capacity`] if the dispatcher refused
    /// the call, and [`Error::Policy`] or [`Error::Transport`] if it could not
    /// be delivered.
    #[instrument(skip_all, fields(identifier = %self.inner.identifier, method = call.method()))]
    pub async fn call(&self, call: Call) -> Result<Reply> {
        let origin = self.address();
        let mut envelope = call.into_envelope(origin);
        let result = self.inner.chain.invoke(&mut envelope).await?;

        let Some(result) = result else {
            return Ok(Reply {
                value: None,
                served_by: None,
                address_chain: envelope.address_chain(),
            });
        };

        let served_by = result.served_by();
        let value = match result.into_outcome() {
            Outcome::Returned(value) => value,
            Outcome::MethodFault(fault) => return Err(Error::Method(fault)),
            Outcome::MiddlewareFault(fault) => return Err(fault.into()),
        };

        if self.inner.options.update_reference && served_by != origin {
            info!("Rebinding {} from {} to {}", self.inner.identifier, origin, served_by);
            self.rebind(served_by);
        }

        Ok(Reply {
            value: Some(value),
            served_by: Some(served_by),
            address_chain: envelope.address_chain(),
        })
    }

    /// Send a call and return its raw value.
    ///
    /// # Errors
    ///
    /// See [`Caller::call`].
    pub async fn invoke(&self, call: Call) -> Result<Option<Value>> {
        let reply = self.call(call).await?;
        Ok(reply.into_value().map(TypedValue::into_value))
    }

    /// Send a call and convert its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReply`] if the value is not a `T`, otherwise see
    /// [`Caller::call`].
    pub async fn invoke_as<T: Typed>(&self, call: Call) -> Result<T> {
        let method = call.method().to_string();
        let value = self.invoke(call).await?.unwrap_or(Value::Unit);
        T::from_value(value)
            .ok_or_else(|| Error::InvalidReply(format!("{method} did not return a {}", T::TYPE)))
    }

    /// Send a call on a spawned task, reporting through the continuations.
    pub fn invoke_detached<S, F>(&self, call: Call, on_success: S, on_failure: F) -> JoinHandle<()>
    where
        S: FnOnce(Option<Value>) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        let caller = self.clone();
        tokio::spawn(async move {
            match caller.invoke(call).await {
                Ok(value) => on_success(value),
                Err(err) => on_failure(err),
            }
        })
    }

    /// Whether the remote object answers.
    pub async fn check_connection(&self) -> bool {
        matches!(
            self.invoke_as::<String>(Call::new(CHECK_CONNECTION)).await,
            Ok(reply) if reply == CONNECTED
        )
    }
}

/// Builder for [`Caller`].
pub struct CallerBuilder {
    identifier: String,
    address: Address,
    transport: Arc<dyn Transport>,
    options: ProxyOptions,
    directory: Option<Arc<dyn Directory>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    failover: Option<usize>,
}

impl CallerBuilder {
    /// Set retry options.
    #[must_use]
    pub const fn options(mut self, options: ProxyOptions) -> Self {
        self.options = options;
        self
    }

    /// Directory used to find alternate instances.
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Add an interceptor; earlier ones see calls first.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Install [`RetryWithFailover`] with `attempts` deliveries.
    #[must_use]
    pub const fn failover(mut self, attempts: usize) -> Self {
        self.failover = Some(attempts);
        self
    }

    /// Build the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the options are out of range or
    /// failover is requested without a directory.
    pub fn build(self) -> Result<Caller> {
        self.options.validate()?;
        let needs_directory = self.options.retry_on_other || self.failover.is_some();
        if needs_directory && self.directory.is_none() {
            return Err(Error::InvalidOptions(
                "failing over to other instances requires a directory".to_string(),
            ));
        }

        let mut interceptors = self.interceptors;
        interceptors.push(Arc::new(StagedRetry::new(
            self.identifier.clone(),
            self.options,
            self.directory.clone(),
        )));
        if let (Some(attempts), Some(directory)) = (self.failover, self.directory) {
            interceptors.push(Arc::new(RetryWithFailover::new(
                self.identifier.clone(),
                attempts,
                directory,
            )?));
        }

        let terminal: Arc<dyn Invocation> = Arc::new(Requestor::new(self.transport));
        Ok(Caller {
            inner: Arc::new(CallerInner {
                identifier: self.identifier,
                bound: RwLock::new(self.address),
                options: self.options,
                chain: InterceptorChain::new(interceptors, terminal),
            }),
        })
    }
}
