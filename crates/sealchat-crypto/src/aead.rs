//! Authenticated symmetric encryption: XChaCha20-Poly1305 with detached nonce

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};

use crate::encoding::base64_newtype_serde;
use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE};

/// A 192-bit XChaCha20 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    pub fn generate() -> CryptoResult<Self> {
        let mut bytes = [0u8; NONCE_SIZE];
        crate::fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }
}

base64_newtype_serde!(Nonce, NONCE_SIZE, "nonce");

/// Output of [`auth_encrypt`]: the nonce travels next to the ciphertext, not inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Nonce,
    /// Ciphertext with the 16-byte Poly1305 tag appended
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
pub fn auth_encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> CryptoResult<Sealed> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = Nonce::generate()?;

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::InvalidKey(format!("encryption failed: {e}")))?;

    Ok(Sealed { nonce, ciphertext })
}

/// Decrypt and authenticate. Fails closed: any tampering with the nonce,
/// ciphertext, tag or `aad`, or a wrong key, returns
/// [`CryptoError::AuthenticatedDecrypt`] and no plaintext.
pub fn auth_decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &Nonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticatedDecrypt)
}
