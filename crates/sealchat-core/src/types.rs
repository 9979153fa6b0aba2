//! Wire shapes exchanged with the identity directory. Field names are camelCase
//! and every binary field is base64.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sealchat_crypto::encoding::{base64_bytes, to_base64};
use sealchat_crypto::{KdfParams, KdfSalt, LoginPublicKey, Nonce, PublicKey, Signature, WrappedKey};

pub type ConversationId = u64;

/// Users are addressed by username.
pub type UserId = String;

pub type MessageId = u64;

/// A session key sealed to one participant's identity public key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey(#[serde(with = "base64_bytes")] pub Vec<u8>);

impl std::fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SealedKey({} bytes)", self.0.len())
    }
}

/// Server-issued random bytes, signed once to prove possession of the login key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Challenge(#[serde(with = "base64_bytes")] pub Vec<u8>);

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Challenge({})", to_base64(&self.0))
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────────

/// `POST /auth/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: UserId,
    pub public_key: PublicKey,
    pub login_public_key: LoginPublicKey,
    pub encrypted_private_key: WrappedKey,
    pub encrypted_login_private_key: WrappedKey,
    pub kdf_salt: KdfSalt,
    pub kdf_params: KdfParams,
}

/// Response to register and verify.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_id: UserId,
    pub access_token: String,
}

impl std::fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResponse")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// `POST /auth/challenge`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub username: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge: Challenge,
    pub encrypted_private_key: WrappedKey,
    pub encrypted_login_private_key: WrappedKey,
    pub kdf_salt: KdfSalt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_params: Option<KdfParams>,
}

/// `POST /auth/verify`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub username: UserId,
    pub challenge: Challenge,
    pub signature: Signature,
}

// ── Directory ────────────────────────────────────────────────────────────────

/// `GET /users/{username}/public_key`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: PublicKey,
}

// ── Conversations ────────────────────────────────────────────────────────────

/// `POST /conversations`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participants: Vec<UserId>,
    pub encrypted_keys: BTreeMap<UserId, SealedKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub conversation_id: ConversationId,
    pub participants: Vec<UserId>,
    pub created_at: String,
}

/// `POST /conversations/{id}/participants`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    pub user_id: UserId,
    pub encrypted_session_key: SealedKey,
}

/// `PUT /conversations/{id}/session_key`: atomic replace of membership and key material
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateSessionKeyRequest {
    pub participants: Vec<UserId>,
    pub new_encrypted_keys: BTreeMap<UserId, SealedKey>,
}

/// One entry of `GET /conversations`, carrying the caller's own sealed session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub participants: Vec<UserId>,
    pub created_at: String,
    pub encrypted_session_key: SealedKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// `POST /messages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub nonce: Nonce,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub associated_data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: MessageId,
    pub timestamp: String,
}

/// A stored message as returned by history and the `newMessage` push event.
///
/// Kept as received: base64 fields are decoded later so one malformed record
/// only spoils itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub timestamp: String,
    pub nonce: String,
    pub ciphertext: String,
    pub associated_data: String,
}
