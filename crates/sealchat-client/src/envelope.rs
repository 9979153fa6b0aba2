//! Message envelopes: body encrypted under the conversation key with the
//! (conversation, sender) pair bound in as associated data.

use serde::{Deserialize, Serialize};

use sealchat_core::types::{MessageId, MessageRecord, SendMessageRequest};
use sealchat_core::{ConversationId, SealchatResult, UserId};
use sealchat_crypto::encoding::{from_base64, from_base64_array, from_utf8};
use sealchat_crypto::{CryptoError, CryptoProvider, Nonce, SessionKey, NONCE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub conversation_id: ConversationId,
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
    pub associated_data: Vec<u8>,
}

impl MessageEnvelope {
    pub fn to_request(&self) -> SendMessageRequest {
        SendMessageRequest {
            conversation_id: self.conversation_id,
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
            associated_data: self.associated_data.clone(),
        }
    }

    pub fn from_record(record: &MessageRecord) -> Result<Self, DecodeFailure> {
        let malformed = |e: CryptoError| DecodeFailure::MalformedEnvelope(e.to_string());
        Ok(Self {
            conversation_id: record.conversation_id,
            nonce: Nonce::from_bytes(
                from_base64_array::<NONCE_SIZE>(&record.nonce, "nonce").map_err(malformed)?,
            ),
            ciphertext: from_base64(&record.ciphertext).map_err(malformed)?,
            associated_data: from_base64(&record.associated_data).map_err(malformed)?,
        })
    }
}

/// The authenticated context, serialized as `{"conversationId":1,"senderId":"alice"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatedData {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub timestamp: String,
    pub plaintext: String,
}

/// Why a message could not be shown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFailure {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("no session key yet")]
    MissingSessionKey,
    #[error("session key lost")]
    SessionKeyLost,
    #[error("authenticated decryption failed")]
    AuthenticatedDecrypt,
    #[error("associated data does not match the envelope")]
    ContextMismatch,
    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
    #[error("too many messages waiting for a session key")]
    QueueOverflow,
}

/// Placeholder for a message that failed to decode, carrying its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecryptableMessage {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub timestamp: String,
    pub reason: DecodeFailure,
}

impl UndecryptableMessage {
    pub fn from_record(record: &MessageRecord, reason: DecodeFailure) -> Self {
        Self {
            conversation_id: record.conversation_id,
            message_id: record.message_id,
            sender_id: record.sender_id.clone(),
            timestamp: record.timestamp.clone(),
            reason,
        }
    }
}

pub fn encode(
    crypto: &dyn CryptoProvider,
    conversation_id: ConversationId,
    sender_id: &str,
    plaintext: &str,
    key: &SessionKey,
) -> SealchatResult<MessageEnvelope> {
    let associated_data = serde_json::to_vec(&AssociatedData {
        conversation_id,
        sender_id: sender_id.to_string(),
    })
    .map_err(anyhow::Error::from)?;

    let sealed = crypto.auth_encrypt(key.as_bytes(), plaintext.as_bytes(), &associated_data)?;
    Ok(MessageEnvelope {
        conversation_id,
        nonce: sealed.nonce,
        ciphertext: sealed.ciphertext,
        associated_data,
    })
}

/// Authenticate and decrypt `envelope`, then check that the bound context
/// names `expected_sender` and the envelope's own conversation.
pub fn open(
    crypto: &dyn CryptoProvider,
    envelope: &MessageEnvelope,
    expected_sender: &str,
    key: &SessionKey,
) -> Result<String, DecodeFailure> {
    let plaintext = crypto
        .auth_decrypt(
            key.as_bytes(),
            &envelope.nonce,
            &envelope.ciphertext,
            &envelope.associated_data,
        )
        .map_err(|_| DecodeFailure::AuthenticatedDecrypt)?;

    let context: AssociatedData = serde_json::from_slice(&envelope.associated_data)
        .map_err(|e| DecodeFailure::MalformedEnvelope(format!("associated data: {e}")))?;
    if context.conversation_id != envelope.conversation_id || context.sender_id != expected_sender {
        return Err(DecodeFailure::ContextMismatch);
    }

    from_utf8(plaintext).map_err(|_| DecodeFailure::InvalidUtf8)
}

/// Decode a stored message. Failures come back as a placeholder rather than an error.
pub fn decode(
    crypto: &dyn CryptoProvider,
    record: &MessageRecord,
    key: &SessionKey,
) -> Result<DecodedMessage, UndecryptableMessage> {
    let envelope = MessageEnvelope::from_record(record)
        .map_err(|reason| UndecryptableMessage::from_record(record, reason))?;
    let plaintext = open(crypto, &envelope, &record.sender_id, key)
        .map_err(|reason| UndecryptableMessage::from_record(record, reason))?;

    Ok(DecodedMessage {
        conversation_id: record.conversation_id,
        message_id: record.message_id,
        sender_id: record.sender_id.clone(),
        timestamp: record.timestamp.clone(),
        plaintext,
    })
}
