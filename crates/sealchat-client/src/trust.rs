//! Safety numbers and per-conversation verification state.

use std::collections::HashMap;

use sealchat_core::{ConversationId, SealchatResult, UserId};
use sealchat_crypto::{CryptoProvider, PublicKey};

/// Digest bytes fed into the digit rendering (240 bits → 24 groups).
pub const SAFETY_DIGEST_LEN: usize = 30;

const GROUPS_PER_CHUNK: usize = 5;

/// Fingerprint two (id, key) pairs. Both sides get the same string because
/// the pair with the lower id always goes first.
pub fn compute_safety_number(
    crypto: &dyn CryptoProvider,
    my_key: &PublicKey,
    their_key: &PublicKey,
    my_id: &str,
    their_id: &str,
) -> SealchatResult<String> {
    let mine = (my_id, my_key.to_base64());
    let theirs = (their_id, their_key.to_base64());
    let (first, second) = if mine <= theirs {
        (mine, theirs)
    } else {
        (theirs, mine)
    };

    let material = format!("{}{}{}{}", first.0, first.1, second.0, second.1);
    let digest = crypto.hash(material.as_bytes(), SAFETY_DIGEST_LEN)?;
    Ok(render_safety_digits(&digest))
}

/// Read `digest` as a big-endian bit string, cut it into 10-bit groups, print
/// each as 4 zero-padded decimal digits and join five groups per chunk.
/// Trailing bits that do not fill a group are left-aligned into a last one.
pub fn render_safety_digits(digest: &[u8]) -> String {
    let mut groups = Vec::with_capacity(digest.len() * 8 / 10 + 1);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for &byte in digest {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 10 {
            bits -= 10;
            groups.push(format!("{:04}", (buffer >> bits) & 0x3ff));
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        groups.push(format!("{:04}", (buffer << (10 - bits)) & 0x3ff));
    }

    groups
        .chunks(GROUPS_PER_CHUNK)
        .map(|chunk| chunk.concat())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationState {
    #[default]
    Unverified,
    Verified,
    PendingReverification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyObservation {
    FirstSeen,
    Unchanged,
    Changed,
}

/// Cached contact keys plus a tri-state per (conversation, participant).
/// Entries are created lazily; absent means [`VerificationState::Unverified`].
#[derive(Debug, Default)]
pub struct TrustTracker {
    public_keys: HashMap<UserId, PublicKey>,
    states: HashMap<(ConversationId, UserId), VerificationState>,
}

impl TrustTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, conversation_id: ConversationId, user: &str) -> VerificationState {
        self.states
            .get(&(conversation_id, user.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_verified(&self, conversation_id: ConversationId, user: &str) -> bool {
        self.state(conversation_id, user) == VerificationState::Verified
    }

    pub fn needs_reverification(&self, conversation_id: ConversationId, user: &str) -> bool {
        self.state(conversation_id, user) == VerificationState::PendingReverification
    }

    /// Verified also clears any pending reverification.
    pub fn mark_verified(&mut self, conversation_id: ConversationId, user: &str) {
        self.states.insert(
            (conversation_id, user.to_string()),
            VerificationState::Verified,
        );
    }

    pub fn unverify(&mut self, conversation_id: ConversationId, user: &str) {
        self.states.remove(&(conversation_id, user.to_string()));
    }

    pub fn unverify_conversation(&mut self, conversation_id: ConversationId) {
        self.states.retain(|(conv, _), _| *conv != conversation_id);
    }

    pub fn cached_key(&self, user: &str) -> Option<&PublicKey> {
        self.public_keys.get(user)
    }

    /// Which of `candidates` is known to hold `key`, if any.
    pub fn holder_of<'a>(&self, key: &PublicKey, candidates: &'a [UserId]) -> Option<&'a str> {
        candidates
            .iter()
            .find(|user| self.public_keys.get(user.as_str()) == Some(key))
            .map(String::as_str)
    }

    /// `user` now has `new_key`: cache it and demote them to pending
    /// reverification in each of `conversations`.
    pub fn public_key_changed(
        &mut self,
        user: &str,
        new_key: PublicKey,
        conversations: &[ConversationId],
    ) {
        tracing::warn!(user = %user, conversations = conversations.len(), "contact public key changed");
        self.public_keys.insert(user.to_string(), new_key);
        for &conversation_id in conversations {
            self.states.insert(
                (conversation_id, user.to_string()),
                VerificationState::PendingReverification,
            );
        }
    }

    /// Compare a key fetched from the directory with the cache. A differing
    /// key is treated exactly like a pushed key change.
    pub fn observe_key(
        &mut self,
        user: &str,
        key: PublicKey,
        conversations: &[ConversationId],
    ) -> KeyObservation {
        match self.public_keys.get(user) {
            None => {
                self.public_keys.insert(user.to_string(), key);
                KeyObservation::FirstSeen
            }
            Some(cached) if *cached == key => KeyObservation::Unchanged,
            Some(_) => {
                self.public_key_changed(user, key, conversations);
                KeyObservation::Changed
            }
        }
    }

    pub fn forget_conversation(&mut self, conversation_id: ConversationId) {
        self.unverify_conversation(conversation_id);
    }

    pub fn clear(&mut self) {
        self.public_keys.clear();
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sealchat_crypto::DefaultCryptoProvider;

    fn pk(byte: u8) -> PublicKey {
        PublicKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_render_all_zero_digest() {
        let rendered = render_safety_digits(&[0u8; SAFETY_DIGEST_LEN]);
        let chunks: Vec<&str> = rendered.split(' ').collect();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], "00000000000000000000");
        assert_eq!(chunks[4], "0000000000000000");
    }

    #[test]
    fn test_render_all_ones_digest() {
        let rendered = render_safety_digits(&[0xFF; SAFETY_DIGEST_LEN]);
        assert_eq!(
            rendered,
            format!("{0} {0} {0} {0} {1}", "1023".repeat(5), "1023".repeat(4))
        );
    }

    #[test]
    fn test_render_bit_boundaries() {
        let mut digest = [0u8; SAFETY_DIGEST_LEN];
        digest[1] = 0x40;
        assert!(render_safety_digits(&digest).starts_with("0001"));

        // 10101011 11|001101 1110|1111 000100|10 00110100
        assert_eq!(
            render_safety_digits(&[0xAB, 0xCD, 0xEF, 0x12, 0x34]),
            "0687022209640564"
        );
    }

    #[test]
    fn test_render_trailing_bits_left_aligned() {
        assert_eq!(render_safety_digits(&[0xFF]), "1020");
    }

    #[test]
    fn test_safety_number_shape() {
        let crypto = DefaultCryptoProvider;
        let number = compute_safety_number(&crypto, &pk(1), &pk(2), "alice", "bob").unwrap();
        let lengths: Vec<usize> = number.split(' ').map(str::len).collect();
        assert_eq!(lengths, vec![20, 20, 20, 20, 16]);
        assert!(number.chars().all(|c| c.is_ascii_digit() || c == ' '));
    }

    #[test]
    fn test_safety_number_matches_manual_digest() {
        let crypto = DefaultCryptoProvider;
        let material = format!("alice{}bob{}", pk(1).to_base64(), pk(2).to_base64());
        let digest = sealchat_crypto::hash(material.as_bytes(), SAFETY_DIGEST_LEN).unwrap();

        let number = compute_safety_number(&crypto, &pk(2), &pk(1), "bob", "alice").unwrap();
        assert_eq!(number, render_safety_digits(&digest));
    }

    #[test]
    fn test_safety_number_changes_with_key() {
        let crypto = DefaultCryptoProvider;
        let a = compute_safety_number(&crypto, &pk(1), &pk(2), "alice", "bob").unwrap();
        let b = compute_safety_number(&crypto, &pk(1), &pk(3), "alice", "bob").unwrap();
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn prop_safety_number_symmetric(
            a in any::<[u8; 32]>(),
            b in any::<[u8; 32]>(),
            id_a in "[a-z]{1,12}",
            id_b in "[a-z]{1,12}",
        ) {
            let crypto = DefaultCryptoProvider;
            let (ka, kb) = (PublicKey::from_bytes(a), PublicKey::from_bytes(b));
            let ours = compute_safety_number(&crypto, &ka, &kb, &id_a, &id_b).unwrap();
            let theirs = compute_safety_number(&crypto, &kb, &ka, &id_b, &id_a).unwrap();
            prop_assert_eq!(ours, theirs);
        }
    }

    #[test]
    fn test_verification_lifecycle() {
        let mut trust = TrustTracker::new();
        assert_eq!(trust.state(1, "bob"), VerificationState::Unverified);

        trust.mark_verified(1, "bob");
        assert!(trust.is_verified(1, "bob"));
        assert!(!trust.needs_reverification(1, "bob"));

        trust.public_key_changed("bob", pk(9), &[1, 2]);
        for conv in [1, 2] {
            assert!(!trust.is_verified(conv, "bob"));
            assert!(trust.needs_reverification(conv, "bob"));
        }
        assert_eq!(trust.cached_key("bob"), Some(&pk(9)));

        trust.mark_verified(1, "bob");
        assert!(trust.is_verified(1, "bob"));
        assert!(!trust.needs_reverification(1, "bob"));
        assert!(trust.needs_reverification(2, "bob"));
    }

    #[test]
    fn test_observe_key() {
        let mut trust = TrustTracker::new();
        assert_eq!(trust.observe_key("bob", pk(1), &[7]), KeyObservation::FirstSeen);
        trust.mark_verified(7, "bob");
        assert_eq!(trust.observe_key("bob", pk(1), &[7]), KeyObservation::Unchanged);
        assert!(trust.is_verified(7, "bob"));

        assert_eq!(trust.observe_key("bob", pk(2), &[7]), KeyObservation::Changed);
        assert!(trust.needs_reverification(7, "bob"));
    }

    #[test]
    fn test_holder_of_declared_key() {
        let mut tracker = TrustTracker::new();
        tracker.observe_key("alice", pk(1), &[]);
        tracker.observe_key("bob", pk(2), &[]);
        let members = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];

        assert_eq!(tracker.holder_of(&pk(2), &members), Some("bob"));
        assert_eq!(tracker.holder_of(&pk(3), &members), None);
        // Known key, but its holder is not among the candidates
        assert_eq!(tracker.holder_of(&pk(1), &members[1..]), None);
    }

    #[test]
    fn test_clear_and_unverify() {
        let mut trust = TrustTracker::new();
        trust.mark_verified(1, "bob");
        trust.mark_verified(1, "carol");
        trust.mark_verified(2, "bob");

        trust.unverify(1, "carol");
        assert!(!trust.is_verified(1, "carol"));

        trust.unverify_conversation(1);
        assert!(!trust.is_verified(1, "bob"));
        assert!(trust.is_verified(2, "bob"));

        trust.observe_key("bob", pk(1), &[]);
        trust.clear();
        assert!(!trust.is_verified(2, "bob"));
        assert!(trust.cached_key("bob").is_none());
    }
}
