//! Push channel events, decoded into a closed set of variants at the boundary.

use serde::{Deserialize, Serialize};

use sealchat_core::types::{MessageRecord, SealedKey};
use sealchat_core::{ConversationId, SealchatError, SealchatResult, UserId};
use sealchat_crypto::encoding::base64_bytes;
use sealchat_crypto::PublicKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PushEvent {
    NewMessage(MessageRecord),
    ParticipantAdded {
        conversation_id: ConversationId,
        user_id: UserId,
        public_key: PublicKey,
    },
    KeyRotation {
        conversation_id: ConversationId,
        removed_user_id: UserId,
        remaining_participants: Vec<UserId>,
        new_encrypted_session_key: RotatedSessionKey,
    },
    RemovedFromConversation {
        conversation_id: ConversationId,
    },
    PublicKeyChanged {
        contact_id: UserId,
        new_public_key: PublicKey,
    },
}

/// The recipient's copy of a rotated key.
///
/// `cipher` is a sealed box opened with the recipient's identity key alone;
/// `nonce` and `sender_public_key` are accepted for wire compatibility and
/// are not needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedSessionKey {
    pub cipher: SealedKey,
    #[serde(default, with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(default)]
    pub sender_public_key: Option<PublicKey>,
}

impl PushEvent {
    /// Parse one text frame. Anything that does not match a known variant
    /// exactly is a protocol violation.
    pub fn parse(frame: &str) -> SealchatResult<Self> {
        serde_json::from_str(frame)
            .map_err(|e| SealchatError::ProtocolViolation(format!("malformed push event: {e}")))
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::NewMessage(record) => Some(record.conversation_id),
            Self::ParticipantAdded {
                conversation_id, ..
            }
            | Self::KeyRotation {
                conversation_id, ..
            }
            | Self::RemovedFromConversation { conversation_id } => Some(*conversation_id),
            Self::PublicKeyChanged { .. } => None,
        }
    }
}
