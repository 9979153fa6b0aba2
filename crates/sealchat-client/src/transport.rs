//! The identity directory as seen by the client: one method per endpoint.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use sealchat_core::types::{
    AddParticipantRequest, AuthResponse, ChallengeRequest, ChallengeResponse,
    ConversationListResponse, ConversationResponse, CreateConversationRequest, MessageRecord,
    PublicKeyResponse, RegisterRequest, RotateSessionKeyRequest, SendMessageRequest,
    SendMessageResponse, VerifyRequest,
};
use sealchat_core::{ConversationId, TransportError};

/// Bearer token issued by register/verify.
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for AccessToken {
    fn clone(&self) -> Self {
        Self(SecretString::from(self.expose()))
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// `POST /auth/register`
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, TransportError>;

    /// `POST /auth/challenge`
    async fn request_challenge(
        &self,
        request: &ChallengeRequest,
    ) -> Result<ChallengeResponse, TransportError>;

    /// `POST /auth/verify`
    async fn verify_challenge(&self, request: &VerifyRequest)
        -> Result<AuthResponse, TransportError>;

    /// `GET /users/{username}/public_key`
    async fn fetch_public_key(
        &self,
        token: &AccessToken,
        username: &str,
    ) -> Result<PublicKeyResponse, TransportError>;

    /// `GET /conversations`
    async fn list_conversations(
        &self,
        token: &AccessToken,
    ) -> Result<ConversationListResponse, TransportError>;

    /// `POST /conversations`
    async fn create_conversation(
        &self,
        token: &AccessToken,
        request: &CreateConversationRequest,
    ) -> Result<ConversationResponse, TransportError>;

    /// `POST /conversations/{id}/participants`
    async fn add_participant(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
        request: &AddParticipantRequest,
    ) -> Result<(), TransportError>;

    /// `PUT /conversations/{id}/session_key`
    async fn rotate_session_key(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
        request: &RotateSessionKeyRequest,
    ) -> Result<(), TransportError>;

    /// `POST /messages`
    async fn send_message(
        &self,
        token: &AccessToken,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError>;

    /// `GET /conversations/{id}/messages`
    async fn fetch_messages(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError>;
}
