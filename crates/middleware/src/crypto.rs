//! Symmetric cipher layer applied to every serialized message.
//!
//! The key is fixed and shared by every build, so this layer only keeps
//! payloads from travelling in clear text. It is not an authentication
//! mechanism.

use aes_gcm::{
    Aes128Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use bytes::{Bytes, BytesMut};

use crate::error::CodecError;

const KEY: &[u8; 16] = b"8q3-m4*8_qme|rh%";

/// Nonce size of AES-GCM.
pub const NONCE_SIZE: usize = 12;

fn cipher() -> Aes128Gcm {
    Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(KEY))
}

/// Encrypt `data`; the output is `nonce || ciphertext`.
///
/// # Errors
///
/// Returns an error if the cipher rejects the input.
pub fn encrypt(data: &[u8]) -> Result<Bytes, CodecError> {
    let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher()
        .encrypt(&nonce, data)
        .map_err(|e| CodecError::Encryption(e.to_string()))?;

    let mut output = BytesMut::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output.freeze())
}

/// Decrypt output of [`encrypt`].
///
/// # Errors
///
/// Returns an error if the input is truncated or fails authentication.
pub fn decrypt(data: &[u8]) -> Result<Bytes, CodecError> {
    if data.len() < NONCE_SIZE {
        return Err(CodecError::Decryption(format!(
            "input of {} bytes is shorter than the nonce",
            data.len()
        )));
    }

    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    let plaintext = cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| CodecError::Decryption(e.to_string()))?;
    Ok(Bytes::from(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let sealed = encrypt(b"remote call").unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"remote call");
        assert_eq!(decrypt(&sealed).unwrap(), Bytes::from_static(b"remote call"));
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        let a = encrypt(b"same").unwrap();
        let b = encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampering_detected() {
        let mut sealed = encrypt(b"remote call").unwrap().to_vec();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(decrypt(&sealed).is_err());
        assert!(decrypt(&sealed[..4]).is_err());
    }
}
