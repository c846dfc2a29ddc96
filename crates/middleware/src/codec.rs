//! Serialization and sealing of session messages.
//!
//! `seal` is `encrypt(encode(message))` and `open` is its inverse followed by
//! protocol validation. Failures are fatal for the exchange; nothing here
//! retries.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::crypto;
use crate::error::CodecError;
use crate::session::SessionMessage;

/// Serialize any wire type.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(bincode::serialize(value)?))
}

/// Deserialize any wire type.
///
/// # Errors
///
/// Returns an error if the bytes are not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Deserialization(e.to_string()))
}

/// Encode and encrypt a message for the wire.
///
/// # Errors
///
/// Returns an error if encoding or encryption fails.
pub fn seal(message: &SessionMessage) -> Result<Bytes, CodecError> {
    crypto::encrypt(&encode(message)?)
}

/// Decrypt, decode and validate a message from the wire.
///
/// # Errors
///
/// Returns an error if any layer rejects the bytes.
pub fn open(bytes: &[u8]) -> Result<SessionMessage, CodecError> {
    let plaintext = crypto::decrypt(bytes)?;
    let message: SessionMessage = decode(&plaintext)?;
    message.validate()?;
    Ok(message)
}
