//! Challenge/response authentication.
//!
//! ```text
//! Unauthenticated ──request_challenge──▶ ChallengeIssued ──verify ok──▶ Authenticated
//!        ▲                                      │
//!        └──────── unwrap failure / rejection / timeout ◀┘
//! ```
//!
//! The private login key never leaves the client: the directory only ever sees
//! a signature over its own single-use challenge.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::time::Instant;

use sealchat_core::types::{AuthResponse, Challenge, ChallengeRequest, RegisterRequest, VerifyRequest};
use sealchat_core::{SealchatError, SealchatResult, TransportError, UserId};
use sealchat_crypto::CryptoProvider;

use crate::credentials::{CredentialManager, Credentials};
use crate::transport::{AccessToken, Directory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    ChallengeIssued {
        username: UserId,
        challenge: Challenge,
        issued_at: Instant,
    },
    Authenticated {
        user_id: UserId,
    },
}

/// Everything an authenticated client holds in memory.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub token: AccessToken,
    pub credentials: Credentials,
}

/// Challenges remembered for replay detection
const MAX_SEEN_CHALLENGES: usize = 1024;

/// Recently used challenges, oldest evicted first.
#[derive(Debug)]
struct ChallengeLog {
    capacity: usize,
    order: VecDeque<Challenge>,
    seen: HashSet<Challenge>,
}

impl ChallengeLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `challenge`. Returns `false` if it is already remembered.
    fn insert(&mut self, challenge: Challenge) -> bool {
        if self.seen.contains(&challenge) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(challenge.clone());
        self.order.push_back(challenge);
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct Authenticator {
    crypto: Arc<dyn CryptoProvider>,
    credentials: CredentialManager,
    state: AuthState,
    seen_challenges: ChallengeLog,
    challenge_timeout: Duration,
}

impl Authenticator {
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        credentials: CredentialManager,
        challenge_timeout: Duration,
    ) -> Self {
        Self {
            crypto,
            credentials,
            state: AuthState::Unauthenticated,
            seen_challenges: ChallengeLog::new(MAX_SEEN_CHALLENGES),
            challenge_timeout,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated { .. })
    }

    /// Create the account and treat the returned token as a signed-in session.
    pub async fn register(
        &mut self,
        directory: &dyn Directory,
        username: &str,
        password: &SecretString,
    ) -> SealchatResult<(Session, RegisterRequest)> {
        self.state = AuthState::Unauthenticated;
        let (request, credentials) = self.credentials.register(username, password).await?;
        let AuthResponse {
            user_id,
            access_token,
        } = directory.register(&request).await?;

        tracing::info!(user = %user_id, "registered");
        self.state = AuthState::Authenticated {
            user_id: user_id.clone(),
        };
        Ok((
            Session {
                user_id,
                token: AccessToken::new(access_token),
                credentials,
            },
            request,
        ))
    }

    /// Run the full challenge/response exchange.
    ///
    /// Unknown user, wrong password and a rejected signature all surface as
    /// [`SealchatError::AuthenticationFailed`].
    pub async fn login(
        &mut self,
        directory: &dyn Directory,
        username: &str,
        password: &SecretString,
    ) -> SealchatResult<Session> {
        self.state = AuthState::Unauthenticated;
        let result = self.try_login(directory, username, password).await;
        match &result {
            Ok(session) => {
                tracing::info!(user = %session.user_id, "authenticated");
                self.state = AuthState::Authenticated {
                    user_id: session.user_id.clone(),
                };
            }
            Err(e) => {
                tracing::warn!(user = %username, error = %e, "login failed");
                self.state = AuthState::Unauthenticated;
            }
        }
        result
    }

    async fn try_login(
        &mut self,
        directory: &dyn Directory,
        username: &str,
        password: &SecretString,
    ) -> SealchatResult<Session> {
        let response = directory
            .request_challenge(&ChallengeRequest {
                username: username.to_string(),
            })
            .await
            .map_err(reject_as_auth_failure)?;

        if !self.seen_challenges.insert(response.challenge.clone()) {
            return Err(SealchatError::ProtocolViolation(
                "directory reissued an already used challenge".into(),
            ));
        }
        let issued_at = Instant::now();
        self.state = AuthState::ChallengeIssued {
            username: username.to_string(),
            challenge: response.challenge.clone(),
            issued_at,
        };

        let params = response
            .kdf_params
            .clone()
            .unwrap_or_else(|| self.credentials.default_params().clone());
        let key = self
            .credentials
            .derive_key(password, &response.kdf_salt, &params)
            .await?;
        let login = self
            .credentials
            .unwrap_login(&key, &response.encrypted_login_private_key)
            .map_err(|_| SealchatError::AuthenticationFailed)?;

        let signature = self.crypto.sign(&response.challenge.0, &login);
        let request = VerifyRequest {
            username: username.to_string(),
            challenge: response.challenge.clone(),
            signature,
        };
        let verify = directory.verify_challenge(&request);

        let remaining = self.challenge_timeout.saturating_sub(issued_at.elapsed());
        let AuthResponse {
            user_id,
            access_token,
        } = match tokio::time::timeout(remaining, verify).await {
            Ok(result) => result.map_err(reject_as_auth_failure)?,
            Err(_) => return Err(TransportError::Timeout.into()),
        };

        let identity = self
            .credentials
            .unwrap_identity(&key, &response.encrypted_private_key)?;

        Ok(Session {
            user_id,
            token: AccessToken::new(access_token),
            credentials: Credentials { identity, login },
        })
    }

    /// Drop back to `Unauthenticated`. Seen challenges are kept so a replay
    /// after re-login is still caught.
    pub fn logout(&mut self) {
        self.state = AuthState::Unauthenticated;
    }
}

/// Rejections during the exchange must not reveal which step failed.
fn reject_as_auth_failure(err: TransportError) -> SealchatError {
    match err {
        TransportError::Unauthorized
        | TransportError::Status {
            code: 400 | 401 | 403 | 404,
            ..
        } => SealchatError::AuthenticationFailed,
        other => SealchatError::Transport(other),
    }
}
