//! Identity & credential management: key generation, password wrapping, unlock.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use sealchat_core::types::RegisterRequest;
use sealchat_core::{SealchatError, SealchatResult};
use sealchat_crypto::{
    CryptoProvider, DerivedKey, IdentityKeyPair, KdfParams, KdfSalt, LoginKeyPair, WrappedKey,
};

/// The unlocked key pairs of the signed-in user. Never serialized.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub identity: IdentityKeyPair,
    pub login: LoginKeyPair,
}

#[derive(Clone)]
pub struct CredentialManager {
    crypto: Arc<dyn CryptoProvider>,
    default_params: KdfParams,
}

impl CredentialManager {
    pub fn new(crypto: Arc<dyn CryptoProvider>, default_params: KdfParams) -> Self {
        Self {
            crypto,
            default_params,
        }
    }

    pub fn default_params(&self) -> &KdfParams {
        &self.default_params
    }

    /// Generate fresh identity and login key pairs and wrap both under a
    /// password-derived key. Returns the directory payload and the unlocked
    /// pairs; the derived key is dropped (and zeroized) before returning.
    pub async fn register(
        &self,
        username: &str,
        password: &SecretString,
    ) -> SealchatResult<(RegisterRequest, Credentials)> {
        let identity = self.crypto.generate_identity_keypair()?;
        let login = self.crypto.generate_login_keypair()?;
        let kdf_salt = self.crypto.generate_salt()?;
        let kdf_params = self.default_params.clone();

        let key = self.derive_key(password, &kdf_salt, &kdf_params).await?;
        let encrypted_private_key = self.crypto.wrap_key(&key, identity.private_bytes())?;
        let encrypted_login_private_key =
            self.crypto.wrap_key(&key, login.to_keypair_bytes().as_ref())?;

        tracing::debug!(user = %username, "generated registration bundle");

        let request = RegisterRequest {
            username: username.to_string(),
            public_key: *identity.public_key(),
            login_public_key: login.public_key(),
            encrypted_private_key,
            encrypted_login_private_key,
            kdf_salt,
            kdf_params,
        };
        Ok((request, Credentials { identity, login }))
    }

    /// Run Argon2id on the blocking pool so other tasks keep making progress.
    pub async fn derive_key(
        &self,
        password: &SecretString,
        salt: &KdfSalt,
        params: &KdfParams,
    ) -> SealchatResult<DerivedKey> {
        let crypto = Arc::clone(&self.crypto);
        let password = SecretString::from(password.expose_secret());
        let salt = *salt;
        let params = params.clone();

        tokio::task::spawn_blocking(move || crypto.derive_key(&password, &salt, &params))
            .await
            .map_err(|e| SealchatError::Derivation(format!("KDF worker failed: {e}")))?
            .map_err(SealchatError::from)
    }

    /// Re-derive the wrapping key and decrypt one wrapped private key.
    ///
    /// A wrong password is reported only as [`SealchatError::AuthenticatedDecrypt`].
    pub async fn unlock(
        &self,
        password: &SecretString,
        salt: &KdfSalt,
        params: &KdfParams,
        wrapped: &WrappedKey,
    ) -> SealchatResult<Zeroizing<Vec<u8>>> {
        let key = self.derive_key(password, salt, params).await?;
        Ok(self.crypto.unwrap_key(&key, wrapped)?)
    }

    pub fn unwrap_identity(
        &self,
        key: &DerivedKey,
        wrapped: &WrappedKey,
    ) -> SealchatResult<IdentityKeyPair> {
        let private = self.crypto.unwrap_key(key, wrapped)?;
        Ok(IdentityKeyPair::from_private_slice(&private)?)
    }

    pub fn unwrap_login(&self, key: &DerivedKey, wrapped: &WrappedKey) -> SealchatResult<LoginKeyPair> {
        let private = self.crypto.unwrap_key(key, wrapped)?;
        Ok(LoginKeyPair::from_keypair_slice(&private)?)
    }
}
