//! Server-side dispatch of call envelopes onto local objects.
//!
//! A [`Skeleton`] wraps one bound object of a [`Service`] type. Processing a
//! call runs in up to two steps:
//! 1. if the call names an accessor, the accessor runs on the bound object and
//!    yields the instance the call executes on;
//! 2. the method resolves by name and declared argument types and runs on that
//!    instance.
//!
//! Resolution failures become middleware faults, faults raised by a method or
//! accessor body become method faults. Calls that expect no result produce no
//! result envelope, whatever happened.

mod instances;
mod table;

pub use instances::InstanceRegistry;
pub use table::{
    AccessorFuture, AccessorHandler, MethodFuture, MethodHandler, MethodTable, Signature,
};

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::address::Address;
use crate::envelope::{AccessorCall, CallEnvelope, Outcome, ResultEnvelope};
use crate::error::{Error, Result};
use crate::fault::{MethodFault, MiddlewareFault, MiddlewareFaultKind};
use crate::options::AdmissionOptions;
use crate::value::{Value, ValueType};

/// Method every dispatcher answers.
pub const CHECK_CONNECTION: &str = "check_connection";

/// Reply of [`CHECK_CONNECTION`].
pub const CONNECTED: &str = "connected";

/// Accessor (per-call) or method (identified) creating a fresh instance.
pub const CREATE_INSTANCE: &str = "create_instance";

/// Method dropping an identified instance.
pub const DESTROY_INSTANCE: &str = "destroy_instance";

/// Accessor resolving an identified instance by id.
pub const INSTANCE_ACCESSOR: &str = "instance";

/// How calls find the instance they run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstancePolicy {
    /// Every call runs on the bound object.
    Singleton,
    /// Callers go through the `create_instance()` accessor, getting a fresh
    /// instance per call.
    PerCall,
    /// Callers create instances with `create_instance() -> int`, address them
    /// through the `instance(int)` accessor and release them with
    /// `destroy_instance(int)`.
    Identified,
}

/// A type whose objects can be bound behind a [`Skeleton`].
pub trait Service: Send + Sync + Sized + 'static {
    /// Identifier shared by every bound instance of this service.
    const IDENTIFIER: &'static str;

    /// Instance lifecycle.
    const POLICY: InstancePolicy = InstancePolicy::Singleton;

    /// Register methods and accessors.
    fn methods(table: &mut MethodTable<Self>);
}

/// Object-safe view of a skeleton used by the invoker.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Service identifier.
    fn identifier(&self) -> &str;

    /// Address this dispatcher is bound at.
    fn address(&self) -> Address;

    /// Admission control settings.
    fn admission(&self) -> AdmissionOptions;

    /// Execute a call. Returns `None` when the call expects no result.
    async fn process_call(&self, call: &CallEnvelope) -> Option<ResultEnvelope>;
}

/// Dispatcher over one bound object of service `S`.
pub struct Skeleton<S: Service> {
    address: Address,
    object: Arc<S>,
    table: MethodTable<S>,
    admission: AdmissionOptions,
}

impl<S: Service> fmt::Debug for Skeleton<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Skeleton")
            .field("identifier", &S::IDENTIFIER)
            .field("address", &self.address)
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

impl<S: Service> Skeleton<S> {
    /// Bind `object` at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidService`] if the service misses an entry its
    /// instance policy requires.
    pub fn new(address: Address, object: S) -> Result<Self> {
        Self::from_shared(address, Arc::new(object))
    }

    /// Bind an already shared object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidService`] if the service misses an entry its
    /// instance policy requires.
    pub fn from_shared(address: Address, object: Arc<S>) -> Result<Self> {
        let mut table = MethodTable::new();
        table.method0(CHECK_CONNECTION, |_: Arc<S>| async {
            Ok(CONNECTED.to_string())
        });
        S::methods(&mut table);
        check_policy::<S>(&table)?;

        Ok(Self {
            address,
            object,
            table,
            admission: AdmissionOptions::default(),
        })
    }

    /// Replace the admission control settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the options are out of range.
    pub fn with_admission(mut self, admission: AdmissionOptions) -> Result<Self> {
        admission.validate()?;
        self.admission = admission;
        Ok(self)
    }

    /// The bound object.
    #[must_use]
    pub const fn object(&self) -> &Arc<S> {
        &self.object
    }

    /// The dispatch table.
    #[must_use]
    pub const fn table(&self) -> &MethodTable<S> {
        &self.table
    }

    async fn resolve_instance(&self, accessor: &AccessorCall) -> std::result::Result<Arc<S>, Outcome> {
        let signature = Signature::new(accessor.name.clone(), accessor.arg_types());
        let Some(handler) = self.table.find_accessor(&signature) else {
            return Err(middleware_fault(
                MiddlewareFaultKind::NoSuchAccessor,
                format!("{} has no accessor {signature}", S::IDENTIFIER),
            ));
        };

        let handler = Arc::clone(handler);
        let object = Arc::clone(&self.object);
        let values = raw_values(&accessor.args);
        let attempt = async move {
            match handler(object, values) {
                Ok(future) => future.await.map_err(Outcome::MethodFault),
                Err(reason) => Err(middleware_fault(
                    MiddlewareFaultKind::IllegalArgument,
                    format!("{signature}: {reason}"),
                )),
            }
        };

        AssertUnwindSafe(attempt)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panicked(&accessor.name, &*panic)))
    }

    async fn execute(&self, call: &CallEnvelope) -> Outcome {
        let target = match call.secondary() {
            Some(accessor) => match self.resolve_instance(accessor).await {
                Ok(instance) => instance,
                Err(outcome) => return outcome,
            },
            None => Arc::clone(&self.object),
        };

        let signature = Signature::new(call.method_name(), call.arg_types());
        let Some(handler) = self.table.find_method(&signature) else {
            return middleware_fault(
                MiddlewareFaultKind::NoSuchMethod,
                format!("{} has no method {signature}", S::IDENTIFIER),
            );
        };

        let handler = Arc::clone(handler);
        let values = raw_values(call.args());
        let attempt = async move {
            match handler(target, values) {
                Ok(future) => future
                    .await
                    .map_or_else(Outcome::MethodFault, Outcome::Returned),
                Err(reason) => middleware_fault(
                    MiddlewareFaultKind::IllegalArgument,
                    format!("{signature}: {reason}"),
                ),
            }
        };

        AssertUnwindSafe(attempt)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| panicked(call.method_name(), &*panic))
    }
}

#[async_trait]
impl<S: Service> Dispatcher for Skeleton<S> {
    fn identifier(&self) -> &str {
        S::IDENTIFIER
    }

    fn address(&self) -> Address {
        self.address
    }

    fn admission(&self) -> AdmissionOptions {
        self.admission
    }

    #[instrument(skip_all, fields(address = %self.address, method = call.method_name()))]
    async fn process_call(&self, call: &CallEnvelope) -> Option<ResultEnvelope> {
        let outcome = self.execute(call).await;

        if !call.expects_result() {
            match &outcome {
                Outcome::Returned(_) => {}
                Outcome::MethodFault(fault) => debug!("Discarding method fault: {}", fault),
                Outcome::MiddlewareFault(fault) => debug!("Discarding middleware fault: {}", fault),
            }
            return None;
        }

        Some(ResultEnvelope::new(call.method_name(), outcome, self.address))
    }
}

fn check_policy<S: Service>(table: &MethodTable<S>) -> Result<()> {
    let missing = |what: String| Error::InvalidService {
        identifier: S::IDENTIFIER,
        reason: what,
    };

    match S::POLICY {
        InstancePolicy::Singleton => {}
        InstancePolicy::PerCall => {
            if !table.has_accessor(CREATE_INSTANCE, &[]) {
                return Err(missing(format!("missing accessor {CREATE_INSTANCE}()")));
            }
        }
        InstancePolicy::Identified => {
            if !table.has_method(CREATE_INSTANCE, &[]) {
                return Err(missing(format!("missing method {CREATE_INSTANCE}()")));
            }
            if !table.has_method(DESTROY_INSTANCE, &[ValueType::Int]) {
                return Err(missing(format!("missing method {DESTROY_INSTANCE}(int)")));
            }
            if !table.has_accessor(INSTANCE_ACCESSOR, &[ValueType::Int]) {
                return Err(missing(format!(
                    "missing accessor {INSTANCE_ACCESSOR}(int)"
                )));
            }
        }
    }
    Ok(())
}

fn raw_values(args: &[crate::value::TypedValue]) -> Vec<Value> {
    args.iter().map(|arg| arg.value().clone()).collect()
}

fn middleware_fault(kind: MiddlewareFaultKind, message: String) -> Outcome {
    Outcome::MiddlewareFault(MiddlewareFault::new(kind, message))
}

fn panicked(name: &str, panic: &(dyn Any + Send)) -> Outcome {
    let message = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    warn!("{} panicked: {}", name, message);
    Outcome::MethodFault(MethodFault::new("Panic", format!("{name} panicked: {message}")))
}
