//! Anonymous public-key encryption ("sealed boxes") for one-shot session key delivery.
//!
//! ```text
//! eph = random X25519 secret
//! shared = X25519(eph, recipient_pk)
//! okm = HKDF-SHA256(ikm=shared, salt=eph_pk ∥ recipient_pk, info="sealchat-seal-v1") → key(32) ∥ nonce(24)
//! box = eph_pk(32) ∥ XChaCha20-Poly1305(key, nonce, plaintext)
//! ```
//!
//! The sender is not identifiable and the caller never handles a nonce.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{IdentityKeyPair, PublicKey};
use crate::{KEY_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};

const SEAL_INFO: &[u8] = b"sealchat-seal-v1";

/// Bytes a sealed box adds on top of its plaintext.
pub const SEAL_OVERHEAD: usize = PUBLIC_KEY_SIZE + TAG_SIZE;

/// Seal `plaintext` so that only the holder of `recipient`'s private key can open it.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> CryptoResult<Vec<u8>> {
    let mut eph_bytes = [0u8; KEY_SIZE];
    crate::fill_random(&mut eph_bytes)?;
    let ephemeral = StaticSecret::from(eph_bytes);
    eph_bytes.zeroize();

    let eph_public = x25519_dalek::PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&x25519_dalek::PublicKey::from(*recipient.as_bytes()));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey(
            "recipient public key is a low-order point".into(),
        ));
    }

    let cipher_key = derive_box_key(shared.as_bytes(), eph_public.as_bytes(), recipient.as_bytes())?;
    let cipher = XChaCha20Poly1305::new((&cipher_key.key).into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&cipher_key.nonce), plaintext)
        .map_err(|e| CryptoError::InvalidKey(format!("sealing failed: {e}")))?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    out.extend_from_slice(eph_public.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed box with the recipient's identity key pair.
pub fn seal_open(sealed: &[u8], recipient: &IdentityKeyPair) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::InvalidLength {
            what: "sealed box",
            expected: SEAL_OVERHEAD,
            actual: sealed.len(),
        });
    }

    let (eph_bytes, ciphertext) = sealed.split_at(PUBLIC_KEY_SIZE);
    let mut eph = [0u8; PUBLIC_KEY_SIZE];
    eph.copy_from_slice(eph_bytes);

    let shared = recipient
        .secret()
        .diffie_hellman(&x25519_dalek::PublicKey::from(eph));
    if !shared.was_contributory() {
        return Err(CryptoError::SealOpen);
    }

    let cipher_key = derive_box_key(shared.as_bytes(), &eph, recipient.public_key().as_bytes())?;
    let cipher = XChaCha20Poly1305::new((&cipher_key.key).into());
    cipher
        .decrypt(XNonce::from_slice(&cipher_key.nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::SealOpen)
}

struct BoxKey {
    key: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl Drop for BoxKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

fn derive_box_key(
    shared: &[u8; 32],
    eph_public: &[u8; PUBLIC_KEY_SIZE],
    recipient: &[u8; PUBLIC_KEY_SIZE],
) -> CryptoResult<BoxKey> {
    let mut salt = [0u8; 2 * PUBLIC_KEY_SIZE];
    salt[..PUBLIC_KEY_SIZE].copy_from_slice(eph_public);
    salt[PUBLIC_KEY_SIZE..].copy_from_slice(recipient);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE + NONCE_SIZE]);
    hkdf.expand(SEAL_INFO, &mut okm[..])
        .map_err(|e| CryptoError::Derivation(format!("HKDF expand failed: {e}")))?;

    let mut out = BoxKey {
        key: [0u8; KEY_SIZE],
        nonce: [0u8; NONCE_SIZE],
    };
    out.key.copy_from_slice(&okm[..KEY_SIZE]);
    out.nonce.copy_from_slice(&okm[KEY_SIZE..]);
    Ok(out)
}
