//! Error types for the middleware.

use crate::address::Address;
use crate::fault::{MethodFault, MiddlewareFault, MiddlewareFaultKind};
use crate::options::AdmissionMode;
use crate::session::MessageType;
use courier_transport::TransportError;
use thiserror::Error;

/// Result type alias for middleware operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for middleware operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote method raised a fault.
    #[error("Remote method failed: {0}")]
    Method(MethodFault),

    /// Dispatch failed on the remote side.
    #[error("Middleware fault: {0}")]
    Middleware(MiddlewareFault),

    /// The remote dispatcher refused the call because it is at capacity.
    #[error("Dispatcher at capacity ({mode:?}): {message}")]
    Capacity {
        /// Admission mode that refused the call.
        mode: AdmissionMode,
        /// Message from the dispatcher.
        message: String,
    },

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding, decoding or cipher failure.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A retry policy gave up.
    #[error("Retry policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Invoker state transition not allowed.
    #[error("Invoker error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Directory operation failed.
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// A service does not satisfy its declared instance policy.
    #[error("Invalid service {identifier}: {reason}")]
    InvalidService {
        /// Service identifier.
        identifier: &'static str,
        /// What is missing.
        reason: String,
    },

    /// Caller or dispatcher options out of range.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The reply did not have the shape the caller asked for.
    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}

impl Error {
    /// Whether another attempt (here or elsewhere) may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => !err.is_frame_too_large(),
            Self::Codec(_) => true,
            _ => false,
        }
    }
}

impl From<MiddlewareFault> for Error {
    fn from(fault: MiddlewareFault) -> Self {
        match fault.kind {
            MiddlewareFaultKind::CapacityBlocked => Self::Capacity {
                mode: AdmissionMode::BlockAtMax,
                message: fault.message,
            },
            MiddlewareFaultKind::ForwardUnavailable => Self::Capacity {
                mode: AdmissionMode::ForwardAtMax,
                message: fault.message,
            },
            _ => Self::Middleware(fault),
        }
    }
}

/// Codec-related errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    Deserialization(String),

    /// Encryption failed.
    #[error("Failed to encrypt: {0}")]
    Encryption(String),

    /// Decryption failed.
    #[error("Failed to decrypt: {0}")]
    Decryption(String),

    /// A protocol magic string did not match.
    #[error("Unexpected protocol magic: {0}")]
    BadMagic(String),

    /// Unknown session protocol version.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// A call arrived where a result was expected or vice versa.
    #[error("Unexpected message type: {0:?}")]
    UnexpectedMessage(MessageType),
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by retry and failover interceptors.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The first attempt failed and the policy allows no retries.
    #[error("Call failed and retries are disabled: {cause}")]
    RetryDisabled {
        /// Failure of the only attempt.
        cause: Box<Error>,
    },

    /// The attempt budget ran out.
    #[error("Gave up after {attempts} attempts: {cause}")]
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// Failure of the last attempt.
        cause: Box<Error>,
    },

    /// Every known instance has already been tried.
    #[error("No untried instance left after {attempts} attempts: {cause}")]
    NoAlternates {
        /// Attempts made.
        attempts: usize,
        /// Failure of the last attempt.
        cause: Box<Error>,
    },
}

impl PolicyError {
    /// Failure of the last attempt.
    #[must_use]
    pub fn cause(&self) -> &Error {
        match self {
            Self::RetryDisabled { cause }
            | Self::Exhausted { cause, .. }
            | Self::NoAlternates { cause, .. } => cause,
        }
    }
}

/// Invoker lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Registrations cannot change while serving.
    #[error("Invoker is running")]
    Running,

    /// `start` called twice.
    #[error("Invoker is already running")]
    AlreadyRunning,

    /// `stop` called while idle.
    #[error("Invoker is not running")]
    NotRunning,

    /// A dispatcher is already bound at this address.
    #[error("Address {0} already bound")]
    AlreadyBound(Address),

    /// No dispatcher is bound at this address.
    #[error("Address {0} not bound")]
    NotBound(Address),
}

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// An entry with this address already exists.
    #[error("Address {0} already registered")]
    AlreadyBound(Address),

    /// No entry with this address.
    #[error("Address {0} not registered")]
    NotBound(Address),

    /// No entry for this identifier.
    #[error("No object registered as {0}")]
    NotFound(String),

    /// Rebinding may not change the identifier of an address.
    #[error("Address {address} is registered as {existing}, not {requested}")]
    IdentifierMismatch {
        /// The address being rebound.
        address: Address,
        /// Identifier on record.
        existing: String,
        /// Identifier requested.
        requested: String,
    },

    /// A remote directory could not be reached.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}
