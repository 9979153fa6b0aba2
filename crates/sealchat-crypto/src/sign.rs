//! Ed25519 detached signatures over authentication challenges

use ed25519_dalek::{Signer, VerifyingKey};

use crate::encoding::base64_newtype_serde;
use crate::keys::{LoginKeyPair, LoginPublicKey};
use crate::SIGNATURE_SIZE;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", crate::encoding::to_base64(&self.0))
    }
}

base64_newtype_serde!(Signature, SIGNATURE_SIZE, "signature");

pub fn sign(message: &[u8], key: &LoginKeyPair) -> Signature {
    Signature(key.signing_key().sign(message).to_bytes())
}

/// Strict verification: rejects malleable signatures and weak public keys.
pub fn verify(message: &[u8], signature: &Signature, public: &LoginPublicKey) -> bool {
    let Ok(verifying) = VerifyingKey::from_bytes(public.as_bytes()) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying.verify_strict(message, &signature).is_ok()
}
