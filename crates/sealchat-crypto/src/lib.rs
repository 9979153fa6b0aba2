//! sealchat-crypto: primitives for the sealchat end-to-end encrypted messaging core
//!
//! Every operation here is a pure function over byte buffers, apart from the
//! ones that draw randomness from the OS.
//!
//! Key hierarchy:
//! ```text
//! Password ──Argon2id(salt, params)──▶ Derived Key (256-bit, never leaves the client)
//!   ├── wraps Identity private key  (X25519)  → nonce(24) ∥ ciphertext+tag
//!   └── wraps Login private key     (Ed25519) → nonce(24) ∥ ciphertext+tag
//!
//! Session Key (256-bit random, one per conversation)
//!   ├── sealed to each participant's Identity public key (X25519 + HKDF + XChaCha20-Poly1305)
//!   └── Message AEAD: XChaCha20-Poly1305 (nonce=random_192bit, AAD={conversationId, senderId})
//! ```

pub mod aead;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod provider;
pub mod seal;
pub mod sign;

pub use aead::{auth_decrypt, auth_encrypt, Nonce, Sealed};
pub use error::{CryptoError, CryptoResult};
pub use hash::hash;
pub use kdf::{derive_key, DerivedKey, KdfParams, KdfSalt};
pub use keys::{
    generate_session_key, unwrap_key, wrap_key, IdentityKeyPair, LoginKeyPair, LoginPublicKey,
    PublicKey, SessionKey, WrappedKey,
};
pub use provider::{CryptoProvider, DefaultCryptoProvider};
pub use seal::{seal, seal_open};
pub use sign::{sign, verify, Signature};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a KDF salt
pub const SALT_SIZE: usize = 16;

/// Size of an X25519 or Ed25519 public key
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature
pub const SIGNATURE_SIZE: usize = 64;

/// Fill `buf` from the OS entropy source.
pub(crate) fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    use rand::RngCore;

    rand::rngs::OsRng.try_fill_bytes(buf).map_err(|e| {
        tracing::error!(error = %e, "OS entropy source failed");
        CryptoError::Entropy
    })
}
