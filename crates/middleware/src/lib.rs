//! Remote invocation middleware.
//!
//! Callers on the client side turn method calls into call envelopes, seal
//! them (bincode, then AES-GCM) and send them through a [`Transport`] to an
//! [`Invoker`], which routes each envelope to the [`Dispatcher`] bound at its
//! target address and sends the result envelope back.
//!
//! Delivery is shaped by interceptors on both sides:
//! - [`StagedRetry`] and [`RetryWithFailover`] retry failed calls on the
//!   caller, optionally moving to other instances found in a [`Directory`];
//! - [`AdmissionControl`] limits calls executing in one dispatcher and
//!   queues, refuses or forwards the rest.
//!
//! [`Transport`]: courier_transport::Transport

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod codec;
pub mod crypto;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod interceptor;
pub mod invoker;
pub mod options;
pub mod proxy;
pub mod requestor;
pub mod session;
pub mod skeleton;
pub mod value;

pub use address::Address;
pub use directory::{Directory, DirectoryEntry, MemoryDirectory};
pub use envelope::{AccessorCall, CallEnvelope, Outcome, ResultEnvelope};
pub use error::{CodecError, DirectoryError, Error, LifecycleError, PolicyError, Result};
pub use fault::{MethodFault, MiddlewareFault, MiddlewareFaultKind};
pub use interceptor::{
    AdmissionControl, Interceptor, InterceptorChain, Invocation, QosObserver, QosSnapshot,
    RetryWithFailover, StagedRetry,
};
pub use invoker::{Invoker, InvokerConfig};
pub use options::{AdmissionMode, AdmissionOptions, ProxyOptions};
pub use proxy::{Call, Caller, CallerBuilder, Reply};
pub use requestor::Requestor;
pub use skeleton::{Dispatcher, InstancePolicy, InstanceRegistry, MethodTable, Service, Skeleton};
pub use value::{Typed, TypedValue, Value, ValueType};
