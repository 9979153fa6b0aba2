//! Capability object exposing the primitive layer.
//!
//! Components receive an `Arc<dyn CryptoProvider>` at construction instead of
//! calling the free functions directly, so tests can substitute a double.

use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::aead::{Nonce, Sealed};
use crate::error::CryptoResult;
use crate::kdf::{DerivedKey, KdfParams, KdfSalt};
use crate::keys::{IdentityKeyPair, LoginKeyPair, LoginPublicKey, PublicKey, SessionKey, WrappedKey};
use crate::sign::Signature;
use crate::KEY_SIZE;

pub trait CryptoProvider: Send + Sync {
    fn generate_identity_keypair(&self) -> CryptoResult<IdentityKeyPair>;

    fn generate_login_keypair(&self) -> CryptoResult<LoginKeyPair>;

    fn generate_salt(&self) -> CryptoResult<KdfSalt>;

    fn generate_session_key(&self) -> CryptoResult<SessionKey>;

    fn derive_key(
        &self,
        password: &SecretString,
        salt: &KdfSalt,
        params: &KdfParams,
    ) -> CryptoResult<DerivedKey>;

    fn wrap_key(&self, key: &DerivedKey, private: &[u8]) -> CryptoResult<WrappedKey>;

    fn unwrap_key(&self, key: &DerivedKey, wrapped: &WrappedKey) -> CryptoResult<Zeroizing<Vec<u8>>>;

    fn auth_encrypt(&self, key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8])
        -> CryptoResult<Sealed>;

    fn auth_decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &Nonce,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    fn seal(&self, plaintext: &[u8], recipient: &PublicKey) -> CryptoResult<Vec<u8>>;

    fn seal_open(&self, sealed: &[u8], recipient: &IdentityKeyPair)
        -> CryptoResult<Zeroizing<Vec<u8>>>;

    fn sign(&self, message: &[u8], key: &LoginKeyPair) -> Signature;

    fn verify(&self, message: &[u8], signature: &Signature, public: &LoginPublicKey) -> bool;

    fn hash(&self, data: &[u8], output_len: usize) -> CryptoResult<Vec<u8>>;
}

/// The production provider: XChaCha20-Poly1305, Argon2id, X25519 sealed boxes, Ed25519.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn generate_identity_keypair(&self) -> CryptoResult<IdentityKeyPair> {
        IdentityKeyPair::generate()
    }

    fn generate_login_keypair(&self) -> CryptoResult<LoginKeyPair> {
        LoginKeyPair::generate()
    }

    fn generate_salt(&self) -> CryptoResult<KdfSalt> {
        KdfSalt::generate()
    }

    fn generate_session_key(&self) -> CryptoResult<SessionKey> {
        crate::keys::generate_session_key()
    }

    fn derive_key(
        &self,
        password: &SecretString,
        salt: &KdfSalt,
        params: &KdfParams,
    ) -> CryptoResult<DerivedKey> {
        crate::kdf::derive_key(password, salt, params)
    }

    fn wrap_key(&self, key: &DerivedKey, private: &[u8]) -> CryptoResult<WrappedKey> {
        crate::keys::wrap_key(key, private)
    }

    fn unwrap_key(&self, key: &DerivedKey, wrapped: &WrappedKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
        crate::keys::unwrap_key(key, wrapped)
    }

    fn auth_encrypt(
        &self,
        key: &[u8; KEY_SIZE],
        plaintext: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Sealed> {
        crate::aead::auth_encrypt(key, plaintext, aad)
    }

    fn auth_decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &Nonce,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        crate::aead::auth_decrypt(key, nonce, ciphertext, aad)
    }

    fn seal(&self, plaintext: &[u8], recipient: &PublicKey) -> CryptoResult<Vec<u8>> {
        crate::seal::seal(plaintext, recipient)
    }

    fn seal_open(
        &self,
        sealed: &[u8],
        recipient: &IdentityKeyPair,
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        crate::seal::seal_open(sealed, recipient)
    }

    fn sign(&self, message: &[u8], key: &LoginKeyPair) -> Signature {
        crate::sign::sign(message, key)
    }

    fn verify(&self, message: &[u8], signature: &Signature, public: &LoginPublicKey) -> bool {
        crate::sign::verify(message, signature, public)
    }

    fn hash(&self, data: &[u8], output_len: usize) -> CryptoResult<Vec<u8>> {
        crate::hash::hash(data, output_len)
    }
}
