//! Key derivation: Argon2id password → wrapping key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::encoding::base64_newtype_serde;
use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// Wire name of the only supported KDF.
pub const ARGON2ID: &str = "argon2id";

/// A 256-bit key derived from a password via Argon2id.
///
/// Only ever used to wrap and unwrap private keys. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Per-user random salt. Not secret; stored by the directory next to the wrapped keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfSalt([u8; SALT_SIZE]);

impl KdfSalt {
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn generate() -> CryptoResult<Self> {
        let mut bytes = [0u8; SALT_SIZE];
        crate::fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }
}

base64_newtype_serde!(KdfSalt, SALT_SIZE, "KDF salt");

/// Argon2id parameters. Travel with the wrapped keys so any client can
/// reproduce the derivation.
///
/// Wire form: `{"algorithm":"argon2id","iterations":3,"memory":65536,"parallelism":4}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    /// Time cost / iterations (default: 3)
    #[serde(rename = "iterations")]
    pub time_cost: u32,
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    #[serde(rename = "memory")]
    pub mem_cost_kib: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl KdfParams {
    pub fn argon2id(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            algorithm: ARGON2ID.to_string(),
            time_cost,
            mem_cost_kib,
            parallelism,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::argon2id(65536, 3, 4)
    }
}

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// Intentionally slow. Async callers should run it on a blocking worker.
pub fn derive_key(
    password: &SecretString,
    salt: &KdfSalt,
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    if params.algorithm != ARGON2ID {
        return Err(CryptoError::Derivation(format!(
            "unsupported KDF algorithm: {}",
            params.algorithm
        )));
    }

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Derivation(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt.as_bytes(), &mut key)
        .map_err(|e| CryptoError::Derivation(format!("Argon2id KDF failed: {e}")))?;

    Ok(DerivedKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn fast_params() -> KdfParams {
        KdfParams::argon2id(1024, 1, 1)
    }

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("test-password-123");
        let salt = KdfSalt::from_bytes([1u8; SALT_SIZE]);

        let key1 = derive_key(&password, &salt, &fast_params()).unwrap();
        let key2 = derive_key(&password, &salt, &fast_params()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = KdfSalt::from_bytes([1u8; SALT_SIZE]);

        let key1 = derive_key(&SecretString::from("password-a"), &salt, &fast_params()).unwrap();
        let key2 = derive_key(&SecretString::from("password-b"), &salt, &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");

        let key1 = derive_key(&password, &KdfSalt::from_bytes([1u8; 16]), &fast_params()).unwrap();
        let key2 = derive_key(&password, &KdfSalt::from_bytes([2u8; 16]), &fast_params()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_different_params() {
        let password = SecretString::from("same-password");
        let salt = KdfSalt::from_bytes([3u8; SALT_SIZE]);

        let key1 = derive_key(&password, &salt, &fast_params()).unwrap();
        let key2 = derive_key(&password, &salt, &KdfParams::argon2id(1024, 2, 1)).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_rejects_unknown_algorithm() {
        let params = KdfParams {
            algorithm: "scrypt".into(),
            ..fast_params()
        };
        let err = derive_key(
            &SecretString::from("pw"),
            &KdfSalt::from_bytes([0u8; SALT_SIZE]),
            &params,
        )
        .unwrap_err();
        assert!(matches!(err, CryptoError::Derivation(_)));
    }

    #[test]
    fn test_kdf_rejects_invalid_cost() {
        // Argon2 requires at least 8 KiB per lane
        let params = KdfParams::argon2id(1, 1, 1);
        let err = derive_key(
            &SecretString::from("pw"),
            &KdfSalt::from_bytes([0u8; SALT_SIZE]),
            &params,
        )
        .unwrap_err();
        assert!(matches!(err, CryptoError::Derivation(_)));
    }

    #[test]
    fn test_kdf_params_wire_shape() {
        let json = serde_json::to_value(KdfParams::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "algorithm": "argon2id",
                "iterations": 3,
                "memory": 65536,
                "parallelism": 4
            })
        );
    }

    #[test]
    fn test_salt_generation_is_random() {
        let a = KdfSalt::generate().unwrap();
        let b = KdfSalt::generate().unwrap();
        assert_ne!(a, b);
    }
}
