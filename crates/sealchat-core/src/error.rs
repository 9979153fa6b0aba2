use sealchat_crypto::CryptoError;
use thiserror::Error;

use crate::types::ConversationId;

pub type SealchatResult<T> = Result<T, SealchatError>;

#[derive(Debug, Error)]
pub enum SealchatError {
    #[error("entropy source unavailable")]
    Entropy,

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("authenticated decryption failed")]
    AuthenticatedDecrypt,

    /// Unknown user, wrong password and a rejected signature all look the same.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("membership invariant violated: {0}")]
    MembershipInvariant(String),

    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    #[error("no session key for conversation {0}")]
    MissingSessionKey(ConversationId),

    /// The conversation's key could not be recovered and the stale key was discarded.
    #[error("session key for conversation {0} is lost")]
    SessionKeyLost(ConversationId),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CryptoError> for SealchatError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Entropy => Self::Entropy,
            CryptoError::Derivation(msg) => Self::Derivation(msg),
            CryptoError::AuthenticatedDecrypt | CryptoError::SealOpen => Self::AuthenticatedDecrypt,
            CryptoError::InvalidKey(msg) => Self::InvalidKey(msg),
            other @ (CryptoError::InvalidLength { .. } | CryptoError::Encoding(_)) => {
                Self::ProtocolViolation(other.to_string())
            }
        }
    }
}

/// Failures reported by the directory and push transports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// HTTP 401: the session token is no longer valid
    #[error("unauthorized")]
    Unauthorized,

    #[error("HTTP status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("request timed out")]
    Timeout,
}

impl SealchatError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Unauthorized))
    }
}
