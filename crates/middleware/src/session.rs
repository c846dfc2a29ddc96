//! Session-layer message wrapping every envelope on the wire.

use crate::envelope::{CallEnvelope, PRESENTATION_MAGIC, ResultEnvelope};
use crate::error::CodecError;
use serde::{Deserialize, Serialize};

/// Magic string identifying the session layer.
pub const SESSION_MAGIC: &str = "phSessionProtocol";

/// Session protocol version.
pub const SESSION_VERSION: &str = "1.0";

/// Byte order tag of the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Big-endian sender.
    BigEndian,
    /// Little-endian sender.
    LittleEndian,
}

impl ByteOrder {
    /// Byte order of this build.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::BigEndian
        } else {
            Self::LittleEndian
        }
    }
}

/// Kind of envelope carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Carries a [`CallEnvelope`].
    Call,
    /// Carries a [`ResultEnvelope`].
    Result,
}

/// Envelope carried by a session message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// A call.
    Call(CallEnvelope),
    /// A result.
    Result(ResultEnvelope),
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    magic: String,
    version: String,
    byte_order: ByteOrder,
    message_type: MessageType,
    body: Body,
}

impl SessionMessage {
    fn wrap(message_type: MessageType, body: Body) -> Self {
        Self {
            magic: SESSION_MAGIC.to_string(),
            version: SESSION_VERSION.to_string(),
            byte_order: ByteOrder::native(),
            message_type,
            body,
        }
    }

    /// Wrap a call envelope.
    #[must_use]
    pub fn call(envelope: CallEnvelope) -> Self {
        Self::wrap(MessageType::Call, Body::Call(envelope))
    }

    /// Wrap a result envelope.
    #[must_use]
    pub fn result(envelope: ResultEnvelope) -> Self {
        Self::wrap(MessageType::Result, Body::Result(envelope))
    }

    /// Kind of envelope carried.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Sender's byte order.
    #[must_use]
    pub const fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Check both protocol layers of a received message.
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong magic, an unknown version, or a body that
    /// disagrees with the message type.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.magic != SESSION_MAGIC {
            return Err(CodecError::BadMagic(self.magic.clone()));
        }
        if self.version != SESSION_VERSION {
            return Err(CodecError::UnsupportedVersion(self.version.clone()));
        }

        let presentation_magic = match (&self.message_type, &self.body) {
            (MessageType::Call, Body::Call(call)) => call.magic(),
            (MessageType::Result, Body::Result(result)) => result.magic(),
            _ => return Err(CodecError::UnexpectedMessage(self.message_type)),
        };
        if presentation_magic != PRESENTATION_MAGIC {
            return Err(CodecError::BadMagic(presentation_magic.to_string()));
        }

        Ok(())
    }

    /// Unwrap a call envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if this message carries a result.
    pub fn into_call(self) -> Result<CallEnvelope, CodecError> {
        match self.body {
            Body::Call(call) => Ok(call),
            Body::Result(_) => Err(CodecError::UnexpectedMessage(MessageType::Result)),
        }
    }

    /// Unwrap a result envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if this message carries a call.
    pub fn into_result(self) -> Result<ResultEnvelope, CodecError> {
        match self.body {
            Body::Result(result) => Ok(result),
            Body::Call(_) => Err(CodecError::UnexpectedMessage(MessageType::Call)),
        }
    }
}
