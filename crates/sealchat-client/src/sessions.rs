//! Group session keys: creation, distribution, and rotation on member removal.
//!
//! Each conversation has one symmetric session key, sealed individually to
//! every participant's identity public key. Adding a member re-seals the
//! existing key; removing one generates a fresh key sealed only to the members
//! that remain.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sealchat_core::types::{
    AddParticipantRequest, ConversationResponse, ConversationSummary, CreateConversationRequest,
    RotateSessionKeyRequest, SealedKey,
};
use sealchat_core::{ConversationId, SealchatError, SealchatResult, UserId};
use sealchat_crypto::{CryptoProvider, IdentityKeyPair, PublicKey, SessionKey};

use crate::transport::{AccessToken, Directory};

/// Client-side mirror of a conversation. The directory is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    /// Ordered, duplicate-free
    pub participants: Vec<UserId>,
    /// `None` until the directory has told us (e.g. first seen through a rotation)
    pub created_at: Option<String>,
}

impl Conversation {
    pub fn contains(&self, user: &str) -> bool {
        self.participants.iter().any(|p| p == user)
    }
}

pub struct GroupSessions {
    crypto: Arc<dyn CryptoProvider>,
    conversations: HashMap<ConversationId, Conversation>,
    keys: HashMap<ConversationId, SessionKey>,
    /// Conversations whose key could not be recovered
    lost: HashSet<ConversationId>,
}

impl GroupSessions {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self {
            crypto,
            conversations: HashMap::new(),
            keys: HashMap::new(),
            lost: HashSet::new(),
        }
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// All known conversations, ordered by id.
    pub fn conversations(&self) -> Vec<&Conversation> {
        let mut all: Vec<_> = self.conversations.values().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Ids of every conversation `user` belongs to.
    pub fn conversations_with(&self, user: &str) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self
            .conversations
            .values()
            .filter(|c| c.contains(user))
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn has_key(&self, id: ConversationId) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn is_key_lost(&self, id: ConversationId) -> bool {
        self.lost.contains(&id)
    }

    pub fn session_key(&self, id: ConversationId) -> SealchatResult<&SessionKey> {
        if let Some(key) = self.keys.get(&id) {
            return Ok(key);
        }
        if self.lost.contains(&id) {
            Err(SealchatError::SessionKeyLost(id))
        } else if self.conversations.contains_key(&id) {
            Err(SealchatError::MissingSessionKey(id))
        } else {
            Err(SealchatError::UnknownConversation(id))
        }
    }

    /// Create a conversation with a fresh session key sealed to every
    /// recipient (the caller included). The key is stored only after the
    /// directory accepts the conversation.
    pub async fn create_conversation(
        &mut self,
        directory: &dyn Directory,
        token: &AccessToken,
        recipients: &[(UserId, PublicKey)],
    ) -> SealchatResult<Conversation> {
        let participants = dedup_participants(recipients.iter().map(|(user, _)| user.clone()));
        if participants.is_empty() {
            return Err(SealchatError::MembershipInvariant(
                "a conversation needs at least one participant".into(),
            ));
        }

        let session_key = self.crypto.generate_session_key()?;
        let encrypted_keys = self.seal_for_all(&session_key, recipients)?;

        let ConversationResponse {
            conversation_id,
            participants,
            created_at,
        } = directory
            .create_conversation(
                token,
                &CreateConversationRequest {
                    participants,
                    encrypted_keys,
                },
            )
            .await?;

        let conversation = Conversation {
            id: conversation_id,
            participants: dedup_participants(participants),
            created_at: Some(created_at),
        };
        tracing::info!(
            conversation_id,
            participants = conversation.participants.len(),
            "conversation created"
        );
        self.install_key(conversation.clone(), session_key);
        Ok(conversation)
    }

    /// Seal the existing session key for `user` and register them. No rotation.
    pub async fn add_participant(
        &mut self,
        directory: &dyn Directory,
        token: &AccessToken,
        conversation_id: ConversationId,
        user: &str,
        public_key: &PublicKey,
    ) -> SealchatResult<()> {
        let conversation = self
            .conversations
            .get(&conversation_id)
            .ok_or(SealchatError::UnknownConversation(conversation_id))?;
        if conversation.contains(user) {
            return Err(SealchatError::MembershipInvariant(format!(
                "{user} is already a participant of conversation {conversation_id}"
            )));
        }

        let session_key = self.session_key(conversation_id)?;
        let sealed = self.crypto.seal(session_key.as_bytes(), public_key)?;

        directory
            .add_participant(
                token,
                conversation_id,
                &AddParticipantRequest {
                    user_id: user.to_string(),
                    encrypted_session_key: SealedKey(sealed),
                },
            )
            .await?;

        self.merge_participant(conversation_id, user);
        tracing::info!(conversation_id, user = %user, "participant added");
        Ok(())
    }

    /// Participants left after removing `user`. Fails without side effects if
    /// `user` is not a member or would be the last one out.
    pub fn remaining_after_removal(
        &self,
        conversation_id: ConversationId,
        user: &str,
    ) -> SealchatResult<Vec<UserId>> {
        let conversation = self
            .conversations
            .get(&conversation_id)
            .ok_or(SealchatError::UnknownConversation(conversation_id))?;
        if !conversation.contains(user) {
            return Err(SealchatError::MembershipInvariant(format!(
                "{user} is not a participant of conversation {conversation_id}"
            )));
        }
        let remaining: Vec<UserId> = conversation
            .participants
            .iter()
            .filter(|p| p.as_str() != user)
            .cloned()
            .collect();
        if remaining.is_empty() {
            return Err(SealchatError::MembershipInvariant(format!(
                "cannot remove the last participant of conversation {conversation_id}"
            )));
        }
        Ok(remaining)
    }

    /// Remove `user` and rotate: a brand-new key is sealed to exactly the
    /// remaining participants and submitted as one atomic replace.
    ///
    /// `recipients` must hold a public key for every remaining participant and
    /// nobody else.
    pub async fn remove_participant(
        &mut self,
        directory: &dyn Directory,
        token: &AccessToken,
        conversation_id: ConversationId,
        user: &str,
        recipients: &[(UserId, PublicKey)],
    ) -> SealchatResult<()> {
        let remaining = self.remaining_after_removal(conversation_id, user)?;

        let supplied: HashSet<&str> = recipients.iter().map(|(u, _)| u.as_str()).collect();
        let expected: HashSet<&str> = remaining.iter().map(String::as_str).collect();
        if supplied != expected {
            return Err(SealchatError::MembershipInvariant(
                "rotation recipients must be exactly the remaining participants".into(),
            ));
        }

        let new_key = self.crypto.generate_session_key()?;
        let new_encrypted_keys = self.seal_for_all(&new_key, recipients)?;

        directory
            .rotate_session_key(
                token,
                conversation_id,
                &RotateSessionKeyRequest {
                    participants: remaining.clone(),
                    new_encrypted_keys,
                },
            )
            .await?;

        let created_at = self
            .conversations
            .get(&conversation_id)
            .and_then(|c| c.created_at.clone());
        self.install_key(
            Conversation {
                id: conversation_id,
                participants: remaining,
                created_at,
            },
            new_key,
        );
        tracing::info!(conversation_id, removed = %user, "session key rotated");
        Ok(())
    }

    /// Apply a rotation pushed by another member.
    ///
    /// On success the key and participant list are replaced together. If the
    /// new key cannot be unsealed the stale key is discarded and the
    /// conversation is marked lost.
    pub fn apply_rotation(
        &mut self,
        conversation_id: ConversationId,
        remaining: Vec<UserId>,
        sealed_key: &[u8],
        identity: &IdentityKeyPair,
    ) -> SealchatResult<()> {
        let created_at = self
            .conversations
            .get(&conversation_id)
            .and_then(|c| c.created_at.clone());
        let conversation = Conversation {
            id: conversation_id,
            participants: dedup_participants(remaining),
            created_at,
        };

        match self.unseal(sealed_key, identity) {
            Ok(key) => {
                self.install_key(conversation, key);
                tracing::info!(conversation_id, "applied incoming key rotation");
                Ok(())
            }
            Err(e) => {
                tracing::error!(conversation_id, error = %e, "rotated session key could not be unsealed");
                self.keys.remove(&conversation_id);
                self.lost.insert(conversation_id);
                self.conversations.insert(conversation_id, conversation);
                Err(SealchatError::SessionKeyLost(conversation_id))
            }
        }
    }

    /// Install a conversation listed by the directory, unsealing our copy of its key.
    pub fn install_summary(
        &mut self,
        summary: ConversationSummary,
        identity: &IdentityKeyPair,
    ) -> SealchatResult<()> {
        let conversation = Conversation {
            id: summary.conversation_id,
            participants: dedup_participants(summary.participants),
            created_at: Some(summary.created_at),
        };
        match self.unseal(&summary.encrypted_session_key.0, identity) {
            Ok(key) => {
                self.install_key(conversation, key);
                Ok(())
            }
            Err(e) => {
                let id = conversation.id;
                tracing::error!(conversation_id = id, error = %e, "listed session key could not be unsealed");
                self.keys.remove(&id);
                self.lost.insert(id);
                self.conversations.insert(id, conversation);
                Err(SealchatError::SessionKeyLost(id))
            }
        }
    }

    /// Record a member announced by the directory. Returns `false` when the
    /// conversation is unknown locally.
    pub fn merge_participant(&mut self, conversation_id: ConversationId, user: &str) -> bool {
        match self.conversations.get_mut(&conversation_id) {
            Some(conversation) => {
                if !conversation.contains(user) {
                    conversation.participants.push(user.to_string());
                }
                true
            }
            None => false,
        }
    }

    /// Drop a conversation we were removed from, key included.
    pub fn forget(&mut self, conversation_id: ConversationId) -> Option<Conversation> {
        self.keys.remove(&conversation_id);
        self.lost.remove(&conversation_id);
        self.conversations.remove(&conversation_id)
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.keys.clear();
        self.lost.clear();
    }

    fn install_key(&mut self, conversation: Conversation, key: SessionKey) {
        let id = conversation.id;
        self.lost.remove(&id);
        self.keys.insert(id, key);
        self.conversations.insert(id, conversation);
    }

    fn unseal(&self, sealed: &[u8], identity: &IdentityKeyPair) -> SealchatResult<SessionKey> {
        let opened = self.crypto.seal_open(sealed, identity)?;
        Ok(SessionKey::from_slice(&opened)?)
    }

    fn seal_for_all(
        &self,
        key: &SessionKey,
        recipients: &[(UserId, PublicKey)],
    ) -> SealchatResult<BTreeMap<UserId, SealedKey>> {
        recipients
            .iter()
            .map(|(user, public_key)| -> SealchatResult<(UserId, SealedKey)> {
                let sealed = self.crypto.seal(key.as_bytes(), public_key)?;
                Ok((user.clone(), SealedKey(sealed)))
            })
            .collect()
    }
}

fn dedup_participants(users: impl IntoIterator<Item = UserId>) -> Vec<UserId> {
    let mut seen = HashSet::new();
    users
        .into_iter()
        .filter(|u| seen.insert(u.clone()))
        .collect()
}
