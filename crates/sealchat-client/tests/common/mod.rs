//! In-memory identity directory for end-to-end client tests.
//!
//! Behaves like the real server where it matters: single-use challenges,
//! signature checks against the registered login key, per-participant sealed
//! keys and push fan-out. Push events are collected per user and handed to
//! that user's client by the test.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;

use sealchat_client::{AccessToken, ChatClient, Directory, PushEvent};
use sealchat_core::config::SealchatConfig;
use sealchat_core::types::{
    AddParticipantRequest, AuthResponse, Challenge, ChallengeRequest, ChallengeResponse,
    ConversationListResponse, ConversationResponse, ConversationSummary,
    CreateConversationRequest, MessageRecord, PublicKeyResponse, RegisterRequest,
    RotateSessionKeyRequest, SealedKey, SendMessageRequest, SendMessageResponse, VerifyRequest,
};
use sealchat_core::{ConversationId, TransportError, UserId};
use sealchat_crypto::encoding::to_base64;
use sealchat_crypto::{verify, DefaultCryptoProvider};

pub const PASSWORD: &str = "correct horse battery staple";

#[derive(Debug, Clone)]
struct StoredConversation {
    participants: Vec<UserId>,
    keys: BTreeMap<UserId, SealedKey>,
    created_at: String,
}

#[derive(Default)]
struct State {
    users: HashMap<UserId, RegisterRequest>,
    tokens: HashMap<String, UserId>,
    challenges: HashMap<UserId, Challenge>,
    last_challenge: Option<Challenge>,
    conversations: BTreeMap<ConversationId, StoredConversation>,
    messages: Vec<MessageRecord>,
    events: HashMap<UserId, Vec<PushEvent>>,
    next_id: u64,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn timestamp(&mut self) -> String {
        let n = self.next();
        format!("2026-01-01T00:00:{:02}Z", n % 60)
    }

    fn issue_token(&mut self, user: &str) -> AuthResponse {
        let token = format!("token-{user}-{}", self.next());
        self.tokens.insert(token.clone(), user.to_string());
        AuthResponse {
            user_id: user.to_string(),
            access_token: token,
        }
    }

    fn push(&mut self, user: &str, event: PushEvent) {
        self.events.entry(user.to_string()).or_default().push(event);
    }
}

#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
    calls: AtomicUsize,
    /// Hand out the previous challenge again instead of a fresh one
    pub replay_challenges: std::sync::atomic::AtomicBool,
    /// Never answer `verify_challenge`
    pub hang_verify: std::sync::atomic::AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of directory calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Invalidate every issued token, as if the server restarted.
    pub fn revoke_tokens(&self) {
        self.state.lock().unwrap().tokens.clear();
    }

    pub fn take_events(&self, user: &str) -> Vec<PushEvent> {
        self.state
            .lock()
            .unwrap()
            .events
            .remove(user)
            .unwrap_or_default()
    }

    pub fn participants(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.state.lock().unwrap().conversations[&conversation_id]
            .participants
            .clone()
    }

    pub fn sealed_key_for(&self, conversation_id: ConversationId, user: &str) -> Option<SealedKey> {
        self.state.lock().unwrap().conversations[&conversation_id]
            .keys
            .get(user)
            .cloned()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.state.lock().unwrap().messages.clone()
    }

    /// Overwrite a stored message's ciphertext with garbage.
    pub fn corrupt_message(&self, message_id: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.messages.iter_mut().find(|m| m.message_id == message_id) {
            record.ciphertext = to_base64(&[0u8; 40]);
        }
    }

    fn authorize(&self, token: &AccessToken) -> Result<UserId, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(token.expose())
            .cloned()
            .ok_or(TransportError::Unauthorized)
    }
}

fn not_found(what: &str) -> TransportError {
    TransportError::Status {
        code: 404,
        message: format!("{what} not found"),
    }
}

fn forbidden() -> TransportError {
    TransportError::Status {
        code: 403,
        message: "not a participant".into(),
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(&request.username) {
            return Err(TransportError::Status {
                code: 409,
                message: "username taken".into(),
            });
        }
        state.users.insert(request.username.clone(), request.clone());
        Ok(state.issue_token(&request.username))
    }

    async fn request_challenge(
        &self,
        request: &ChallengeRequest,
    ) -> Result<ChallengeResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get(&request.username)
            .cloned()
            .ok_or_else(|| not_found("user"))?;

        let challenge = match (&state.last_challenge, self.replay_challenges.load(Ordering::SeqCst)) {
            (Some(previous), true) => previous.clone(),
            _ => {
                let n = state.next();
                Challenge(format!("challenge-{n:016}").into_bytes())
            }
        };
        state
            .challenges
            .insert(request.username.clone(), challenge.clone());
        state.last_challenge = Some(challenge.clone());

        Ok(ChallengeResponse {
            challenge,
            encrypted_private_key: user.encrypted_private_key,
            encrypted_login_private_key: user.encrypted_login_private_key,
            kdf_salt: user.kdf_salt,
            kdf_params: Some(user.kdf_params),
        })
    }

    async fn verify_challenge(&self, request: &VerifyRequest) -> Result<AuthResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_verify.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        let outstanding = state.challenges.remove(&request.username);
        if outstanding.as_ref() != Some(&request.challenge) {
            return Err(TransportError::Unauthorized);
        }
        let user = state
            .users
            .get(&request.username)
            .ok_or(TransportError::Unauthorized)?;
        if !verify(&request.challenge.0, &request.signature, &user.login_public_key) {
            return Err(TransportError::Unauthorized);
        }
        Ok(state.issue_token(&request.username))
    }

    async fn fetch_public_key(
        &self,
        token: &AccessToken,
        username: &str,
    ) -> Result<PublicKeyResponse, TransportError> {
        self.authorize(token)?;
        let state = self.state.lock().unwrap();
        let user = state.users.get(username).ok_or_else(|| not_found("user"))?;
        Ok(PublicKeyResponse {
            public_key: user.public_key,
        })
    }

    async fn list_conversations(
        &self,
        token: &AccessToken,
    ) -> Result<ConversationListResponse, TransportError> {
        let caller = self.authorize(token)?;
        let state = self.state.lock().unwrap();
        let conversations = state
            .conversations
            .iter()
            .filter_map(|(&id, conversation)| {
                let key = conversation.keys.get(&caller)?;
                Some(ConversationSummary {
                    conversation_id: id,
                    participants: conversation.participants.clone(),
                    created_at: conversation.created_at.clone(),
                    encrypted_session_key: key.clone(),
                    last_message_timestamp: None,
                })
            })
            .collect();
        Ok(ConversationListResponse { conversations })
    }

    async fn create_conversation(
        &self,
        token: &AccessToken,
        request: &CreateConversationRequest,
    ) -> Result<ConversationResponse, TransportError> {
        let caller = self.authorize(token)?;
        let mut state = self.state.lock().unwrap();
        if !request.participants.contains(&caller) {
            return Err(forbidden());
        }
        let id = state.next();
        let created_at = state.timestamp();
        state.conversations.insert(
            id,
            StoredConversation {
                participants: request.participants.clone(),
                keys: request.encrypted_keys.clone(),
                created_at: created_at.clone(),
            },
        );
        Ok(ConversationResponse {
            conversation_id: id,
            participants: request.participants.clone(),
            created_at,
        })
    }

    async fn add_participant(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
        request: &AddParticipantRequest,
    ) -> Result<(), TransportError> {
        let caller = self.authorize(token)?;
        let mut state = self.state.lock().unwrap();
        let public_key = state
            .users
            .get(&request.user_id)
            .ok_or_else(|| not_found("user"))?
            .public_key;
        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| not_found("conversation"))?;
        if !conversation.participants.contains(&caller) {
            return Err(forbidden());
        }
        conversation.participants.push(request.user_id.clone());
        conversation
            .keys
            .insert(request.user_id.clone(), request.encrypted_session_key.clone());

        let members = conversation.participants.clone();
        for member in members.iter().filter(|m| **m != caller) {
            state.push(
                member,
                PushEvent::ParticipantAdded {
                    conversation_id,
                    user_id: request.user_id.clone(),
                    public_key,
                },
            );
        }
        Ok(())
    }

    async fn rotate_session_key(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
        request: &RotateSessionKeyRequest,
    ) -> Result<(), TransportError> {
        let caller = self.authorize(token)?;
        let mut state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| not_found("conversation"))?;
        if !conversation.participants.contains(&caller) {
            return Err(forbidden());
        }
        let removed: Vec<UserId> = conversation
            .participants
            .iter()
            .filter(|p| !request.participants.contains(p))
            .cloned()
            .collect();
        conversation.participants = request.participants.clone();
        conversation.keys = request.new_encrypted_keys.clone();
        let removed_user_id = removed.first().cloned().unwrap_or_default();

        for member in request.participants.iter().filter(|m| **m != caller) {
            let cipher = request.new_encrypted_keys[member].clone();
            state.push(
                member,
                PushEvent::KeyRotation {
                    conversation_id,
                    removed_user_id: removed_user_id.clone(),
                    remaining_participants: request.participants.clone(),
                    new_encrypted_session_key: sealchat_client::events::RotatedSessionKey {
                        cipher,
                        nonce: Vec::new(),
                        sender_public_key: None,
                    },
                },
            );
        }
        for user in &removed {
            state.push(user, PushEvent::RemovedFromConversation { conversation_id });
        }
        Ok(())
    }

    async fn send_message(
        &self,
        token: &AccessToken,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError> {
        let caller = self.authorize(token)?;
        let mut state = self.state.lock().unwrap();
        let participants = state
            .conversations
            .get(&request.conversation_id)
            .ok_or_else(|| not_found("conversation"))?
            .participants
            .clone();
        if !participants.contains(&caller) {
            return Err(forbidden());
        }

        let message_id = state.next();
        let timestamp = state.timestamp();
        let record = MessageRecord {
            conversation_id: request.conversation_id,
            message_id,
            sender_id: caller.clone(),
            timestamp: timestamp.clone(),
            nonce: to_base64(request.nonce.as_bytes()),
            ciphertext: to_base64(&request.ciphertext),
            associated_data: to_base64(&request.associated_data),
        };
        state.messages.push(record.clone());
        for member in participants.iter().filter(|m| **m != caller) {
            state.push(member, PushEvent::NewMessage(record.clone()));
        }
        Ok(SendMessageResponse {
            message_id,
            timestamp,
        })
    }

    async fn fetch_messages(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let caller = self.authorize(token)?;
        let state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .get(&conversation_id)
            .ok_or_else(|| not_found("conversation"))?;
        if !conversation.participants.contains(&caller) {
            return Err(forbidden());
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}

/// Config with a KDF cheap enough for tests.
pub fn test_config() -> SealchatConfig {
    let mut config = SealchatConfig::default();
    config.crypto.argon2_mem_cost_kib = 1024;
    config.crypto.argon2_time_cost = 1;
    config.crypto.argon2_parallelism = 1;
    config
}

pub fn password() -> SecretString {
    SecretString::from(PASSWORD)
}

pub fn client(directory: &Arc<MemoryDirectory>) -> ChatClient {
    client_with(directory, test_config())
}

pub fn client_with(directory: &Arc<MemoryDirectory>, config: SealchatConfig) -> ChatClient {
    let directory: Arc<dyn Directory> = directory.clone();
    ChatClient::new(config, Arc::new(DefaultCryptoProvider), directory)
}

/// Register `user` and return a client logged in as them.
pub async fn registered(directory: &Arc<MemoryDirectory>, user: &str) -> ChatClient {
    let mut client = client(directory);
    client
        .register(user, &password())
        .await
        .expect("register should succeed");
    client
}

/// Feed every queued push event for `user` into their client.
pub async fn deliver(
    directory: &MemoryDirectory,
    client: &mut ChatClient,
    user: &str,
) -> Vec<sealchat_client::ClientUpdate> {
    let mut updates = Vec::new();
    for event in directory.take_events(user) {
        updates.extend(
            client
                .handle_push_event(event)
                .await
                .expect("push event should apply"),
        );
    }
    updates
}
