//! Key material: identity and login key pairs, session keys, key wrapping

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::SigningKey;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, Zeroizing};

use crate::encoding::{base64_newtype_serde, to_base64};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::DerivedKey;
use crate::{KEY_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};

/// A per-conversation 256-bit session key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes = <[u8; KEY_SIZE]>::try_from(bytes).map_err(|_| CryptoError::InvalidLength {
            what: "session key",
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes })
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit session key.
pub fn generate_session_key() -> CryptoResult<SessionKey> {
    let mut bytes = [0u8; KEY_SIZE];
    crate::fill_random(&mut bytes)?;
    Ok(SessionKey::from_bytes(bytes))
}

/// X25519 identity public key, the target of sealed boxes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        to_base64(&self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

base64_newtype_serde!(PublicKey, PUBLIC_KEY_SIZE, "identity public key");

/// Ed25519 login public key, registered with the directory to check challenge signatures.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoginPublicKey([u8; PUBLIC_KEY_SIZE]);

impl LoginPublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for LoginPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoginPublicKey({})", to_base64(&self.0))
    }
}

base64_newtype_serde!(LoginPublicKey, PUBLIC_KEY_SIZE, "login public key");

/// X25519 key pair used to receive sealed session keys.
pub struct IdentityKeyPair {
    public: PublicKey,
    private: [u8; KEY_SIZE],
}

impl IdentityKeyPair {
    pub fn generate() -> CryptoResult<Self> {
        let mut private = [0u8; KEY_SIZE];
        crate::fill_random(&mut private)?;
        let pair = Self::from_private_bytes(&private);
        private.zeroize();
        Ok(pair)
    }

    /// Rebuild the pair from the raw private scalar; the public half is recomputed.
    pub fn from_private_bytes(private: &[u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(*private);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            public: PublicKey(public.to_bytes()),
            private: secret.to_bytes(),
        }
    }

    pub fn from_private_slice(private: &[u8]) -> CryptoResult<Self> {
        let mut bytes =
            <[u8; KEY_SIZE]>::try_from(private).map_err(|_| CryptoError::InvalidLength {
                what: "identity private key",
                expected: KEY_SIZE,
                actual: private.len(),
            })?;
        let pair = Self::from_private_bytes(&bytes);
        bytes.zeroize();
        Ok(pair)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.private
    }

    pub(crate) fn secret(&self) -> StaticSecret {
        StaticSecret::from(self.private)
    }
}

impl Clone for IdentityKeyPair {
    fn clone(&self) -> Self {
        Self {
            public: self.public,
            private: self.private,
        }
    }
}

impl Drop for IdentityKeyPair {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Ed25519 key pair used only to sign authentication challenges.
///
/// The private form is the 64-byte keypair encoding (seed ∥ public key).
#[derive(Clone)]
pub struct LoginKeyPair {
    signing: SigningKey,
}

impl LoginKeyPair {
    pub fn generate() -> CryptoResult<Self> {
        let mut seed = [0u8; KEY_SIZE];
        crate::fill_random(&mut seed)?;
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing })
    }

    pub fn from_keypair_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let mut keypair =
            <[u8; 2 * KEY_SIZE]>::try_from(bytes).map_err(|_| CryptoError::InvalidLength {
                what: "login private key",
                expected: 2 * KEY_SIZE,
                actual: bytes.len(),
            })?;
        let signing = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|_| CryptoError::InvalidKey("login key pair halves do not match".into()));
        keypair.zeroize();
        Ok(Self { signing: signing? })
    }

    pub fn public_key(&self) -> LoginPublicKey {
        LoginPublicKey(self.signing.verifying_key().to_bytes())
    }

    pub fn to_keypair_bytes(&self) -> Zeroizing<[u8; 2 * KEY_SIZE]> {
        Zeroizing::new(self.signing.to_keypair_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl std::fmt::Debug for LoginKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginKeyPair")
            .field("public", &self.public_key())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// A private key encrypted under a [`DerivedKey`]: `[24-byte nonce][ciphertext + 16-byte tag]`.
///
/// Carried on the wire as a single base64 blob.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey(Vec<u8>);

impl WrappedKey {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WrappedKey({} bytes)", self.0.len())
    }
}

impl serde::Serialize for WrappedKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        crate::encoding::base64_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for WrappedKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::encoding::base64_bytes::deserialize(deserializer).map(Self)
    }
}

/// Wrap (encrypt) private key bytes under the password-derived key.
///
/// Uses XChaCha20-Poly1305 with a fresh random nonce per call.
pub fn wrap_key(key: &DerivedKey, private: &[u8]) -> CryptoResult<WrappedKey> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    crate::fill_random(&mut nonce_bytes)?;
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, private)
        .map_err(|e| CryptoError::InvalidKey(format!("key wrapping failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(WrappedKey(result))
}

/// Unwrap (decrypt) private key bytes. A wrong password surfaces only as
/// [`CryptoError::AuthenticatedDecrypt`].
pub fn unwrap_key(key: &DerivedKey, wrapped: &WrappedKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let wrapped = wrapped.as_bytes();
    if wrapped.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::InvalidLength {
            what: "wrapped key",
            expected: NONCE_SIZE + TAG_SIZE,
            actual: wrapped.len(),
        });
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticatedDecrypt)
}
