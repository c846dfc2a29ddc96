//! Faults carried inside result envelopes.
//!
//! The two categories never merge: a [`MethodFault`] is raised by business
//! logic, a [`MiddlewareFault`] by the dispatch machinery around it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fault raised by the invoked method (or accessor) itself.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct MethodFault {
    /// Name of the fault type, preserved across the wire.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl MethodFault {
    /// Create a method fault.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Category of a middleware fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MiddlewareFaultKind {
    /// No method with the requested name and argument types.
    NoSuchMethod,
    /// No accessor with the requested name and argument types.
    NoSuchAccessor,
    /// Arguments do not match the resolved signature.
    IllegalArgument,
    /// No dispatcher is bound at the target address.
    NotBound,
    /// The dispatcher is at its in-flight limit and refused the call.
    CapacityBlocked,
    /// The dispatcher is at its limit and could not forward the call.
    ForwardUnavailable,
}

impl MiddlewareFaultKind {
    /// Faults caused by the shape of the call; retrying elsewhere cannot help.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            Self::NoSuchMethod | Self::NoSuchAccessor | Self::IllegalArgument
        )
    }

    /// Faults raised by admission control.
    #[must_use]
    pub const fn is_capacity(self) -> bool {
        matches!(self, Self::CapacityBlocked | Self::ForwardUnavailable)
    }

    /// Faults another server instance may not hit.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NotBound | Self::CapacityBlocked | Self::ForwardUnavailable
        )
    }
}

impl fmt::Display for MiddlewareFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoSuchMethod => "no such method",
            Self::NoSuchAccessor => "no such accessor",
            Self::IllegalArgument => "illegal argument",
            Self::NotBound => "not bound",
            Self::CapacityBlocked => "capacity blocked",
            Self::ForwardUnavailable => "forward unavailable",
        };
        f.write_str(name)
    }
}

/// Fault raised by the dispatch machinery.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct MiddlewareFault {
    /// Category.
    pub kind: MiddlewareFaultKind,
    /// Human-readable message.
    pub message: String,
}

impl MiddlewareFault {
    /// Create a middleware fault.
    pub fn new(kind: MiddlewareFaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
