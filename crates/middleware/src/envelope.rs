//! Call and result envelopes.

use crate::address::Address;
use crate::fault::{MethodFault, MiddlewareFault};
use crate::value::{TypedValue, ValueType};
use serde::{Deserialize, Serialize};

/// Magic string identifying the presentation layer.
pub const PRESENTATION_MAGIC: &str = "phPresentationProtocol";

/// Accessor invoked on the bound object to obtain the instance a call runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessorCall {
    /// Accessor name.
    pub name: String,
    /// Accessor arguments.
    pub args: Vec<TypedValue>,
}

impl AccessorCall {
    /// Declared argument types.
    #[must_use]
    pub fn arg_types(&self) -> Vec<ValueType> {
        self.args.iter().map(TypedValue::declared).collect()
    }
}

/// A request to invoke one method on a remote object.
///
/// The address chain always holds the originally bound address; interceptors
/// may append alternates, and the last entry is where the envelope goes next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    magic: String,
    method_name: String,
    args: Vec<TypedValue>,
    secondary: Option<AccessorCall>,
    expects_result: bool,
    origin: Address,
    alternates: Vec<Address>,
}

impl CallEnvelope {
    /// Create an envelope bound for `origin`.
    pub fn new(
        method_name: impl Into<String>,
        args: Vec<TypedValue>,
        secondary: Option<AccessorCall>,
        expects_result: bool,
        origin: Address,
    ) -> Self {
        Self {
            magic: PRESENTATION_MAGIC.to_string(),
            method_name: method_name.into(),
            args,
            secondary,
            expects_result,
            origin,
            alternates: Vec::new(),
        }
    }

    /// Presentation magic as received.
    #[must_use]
    pub fn magic(&self) -> &str {
        &self.magic
    }

    /// Method name.
    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Arguments.
    #[must_use]
    pub fn args(&self) -> &[TypedValue] {
        &self.args
    }

    /// Declared argument types.
    #[must_use]
    pub fn arg_types(&self) -> Vec<ValueType> {
        self.args.iter().map(TypedValue::declared).collect()
    }

    /// Accessor to run first, if any.
    #[must_use]
    pub const fn secondary(&self) -> Option<&AccessorCall> {
        self.secondary.as_ref()
    }

    /// Whether the call runs on an instance returned by an accessor.
    #[must_use]
    pub const fn needs_secondary_instance(&self) -> bool {
        self.secondary.is_some()
    }

    /// Whether the caller waits for a result.
    #[must_use]
    pub const fn expects_result(&self) -> bool {
        self.expects_result
    }

    /// The originally bound address.
    #[must_use]
    pub const fn origin(&self) -> Address {
        self.origin
    }

    /// Where the envelope goes next.
    #[must_use]
    pub fn target(&self) -> Address {
        self.alternates.last().copied().unwrap_or(self.origin)
    }

    /// All addresses tried or to be tried, in order.
    #[must_use]
    pub fn address_chain(&self) -> Vec<Address> {
        std::iter::once(self.origin)
            .chain(self.alternates.iter().copied())
            .collect()
    }

    /// Number of addresses in the chain.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        1 + self.alternates.len()
    }

    /// Whether `address` already appears in the chain.
    #[must_use]
    pub fn contains(&self, address: &Address) -> bool {
        self.origin == *address || self.alternates.contains(address)
    }

    /// Append an alternate; it becomes the new target.
    pub fn push_alternate(&mut self, address: Address) {
        self.alternates.push(address);
    }
}

/// What a call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The method returned normally.
    Returned(TypedValue),
    /// The method (or accessor) raised a fault.
    MethodFault(MethodFault),
    /// Dispatch failed before or around the method.
    MiddlewareFault(MiddlewareFault),
}

/// The answer to one call envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    magic: String,
    method_name: String,
    outcome: Outcome,
    served_by: Address,
}

impl ResultEnvelope {
    /// Create a result envelope.
    pub fn new(method_name: impl Into<String>, outcome: Outcome, served_by: Address) -> Self {
        Self {
            magic: PRESENTATION_MAGIC.to_string(),
            method_name: method_name.into(),
            outcome,
            served_by,
        }
    }

    /// Result of a normal return.
    #[must_use]
    pub fn returned(call: &CallEnvelope, value: TypedValue, served_by: Address) -> Self {
        Self::new(call.method_name(), Outcome::Returned(value), served_by)
    }

    /// Result carrying a method fault.
    #[must_use]
    pub fn method_fault(call: &CallEnvelope, fault: MethodFault, served_by: Address) -> Self {
        Self::new(call.method_name(), Outcome::MethodFault(fault), served_by)
    }

    /// Result carrying a middleware fault.
    #[must_use]
    pub fn middleware_fault(
        call: &CallEnvelope,
        fault: MiddlewareFault,
        served_by: Address,
    ) -> Self {
        Self::new(call.method_name(), Outcome::MiddlewareFault(fault), served_by)
    }

    /// Presentation magic as received.
    #[must_use]
    pub fn magic(&self) -> &str {
        &self.magic
    }

    /// Name of the method this answers.
    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// The outcome.
    #[must_use]
    pub const fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Consume into the outcome.
    #[must_use]
    pub fn into_outcome(self) -> Outcome {
        self.outcome
    }

    /// Address of the dispatcher that produced this result.
    #[must_use]
    pub const fn served_by(&self) -> Address {
        self.served_by
    }

    /// Returned value, if any.
    #[must_use]
    pub const fn result(&self) -> Option<&TypedValue> {
        match &self.outcome {
            Outcome::Returned(value) => Some(value),
            _ => None,
        }
    }

    /// Method fault, if any.
    #[must_use]
    pub const fn method_fault_ref(&self) -> Option<&MethodFault> {
        match &self.outcome {
            Outcome::MethodFault(fault) => Some(fault),
            _ => None,
        }
    }

    /// Middleware fault, if any.
    #[must_use]
    pub const fn middleware_fault_ref(&self) -> Option<&MiddlewareFault> {
        match &self.outcome {
            Outcome::MiddlewareFault(fault) => Some(fault),
            _ => None,
        }
    }
}
