//! The client core: one owner for keys, conversations, trust state and the
//! queue of messages waiting for a key.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, info, warn};

use sealchat_core::config::SealchatConfig;
use sealchat_core::types::{MessageRecord, SendMessageResponse};
use sealchat_core::{ConversationId, SealchatError, SealchatResult, UserId};
use sealchat_crypto::{CryptoProvider, PublicKey};

use crate::auth::{AuthState, Authenticator, Session};
use crate::credentials::CredentialManager;
use crate::envelope::{self, DecodeFailure, DecodedMessage, UndecryptableMessage};
use crate::events::PushEvent;
use crate::sessions::{Conversation, GroupSessions};
use crate::transport::{AccessToken, Directory};
use crate::trust::{compute_safety_number, TrustTracker, VerificationState};

/// A message as the UI should render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Decoded(DecodedMessage),
    Undecryptable(UndecryptableMessage),
}

impl InboundMessage {
    fn from_decode(result: Result<DecodedMessage, UndecryptableMessage>) -> Self {
        match result {
            Ok(message) => Self::Decoded(message),
            Err(failure) => {
                warn!(
                    conversation_id = failure.conversation_id,
                    message_id = failure.message_id,
                    reason = %failure.reason,
                    "message could not be decrypted"
                );
                Self::Undecryptable(failure)
            }
        }
    }
}

/// State changes caused by one push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientUpdate {
    Message(InboundMessage),
    ParticipantAdded {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    KeyRotated {
        conversation_id: ConversationId,
        removed_user_id: UserId,
    },
    RemovedFromConversation {
        conversation_id: ConversationId,
    },
    PublicKeyChanged {
        user_id: UserId,
        conversations: Vec<ConversationId>,
    },
}

pub struct ChatClient {
    config: SealchatConfig,
    crypto: Arc<dyn CryptoProvider>,
    directory: Arc<dyn Directory>,
    auth: Authenticator,
    session: Option<Session>,
    sessions: GroupSessions,
    trust: TrustTracker,
    pending: HashMap<ConversationId, VecDeque<MessageRecord>>,
    /// Conversations we left or were removed from during this session
    departed: HashSet<ConversationId>,
}

impl ChatClient {
    pub fn new(
        config: SealchatConfig,
        crypto: Arc<dyn CryptoProvider>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let credentials = CredentialManager::new(Arc::clone(&crypto), config.crypto.kdf_params());
        let auth = Authenticator::new(
            Arc::clone(&crypto),
            credentials,
            config.auth.challenge_timeout(),
        );
        Self {
            sessions: GroupSessions::new(Arc::clone(&crypto)),
            trust: TrustTracker::new(),
            pending: HashMap::new(),
            departed: HashSet::new(),
            session: None,
            config,
            crypto,
            directory,
            auth,
        }
    }

    // ── Identity ─────────────────────────────────────────────────────────────

    pub fn auth_state(&self) -> &AuthState {
        self.auth.state()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user_id.as_str())
    }

    pub fn identity_public_key(&self) -> Option<PublicKey> {
        self.session
            .as_ref()
            .map(|s| *s.credentials.identity.public_key())
    }

    pub async fn register(
        &mut self,
        username: &str,
        password: &SecretString,
    ) -> SealchatResult<UserId> {
        self.teardown();
        let (session, request) = self
            .auth
            .register(self.directory.as_ref(), username, password)
            .await?;
        self.trust
            .observe_key(&session.user_id, request.public_key, &[]);
        let user_id = session.user_id.clone();
        self.session = Some(session);
        Ok(user_id)
    }

    /// Authenticate, then pull the conversation list so session keys are ready.
    pub async fn login(&mut self, username: &str, password: &SecretString) -> SealchatResult<UserId> {
        self.teardown();
        let session = self
            .auth
            .login(self.directory.as_ref(), username, password)
            .await?;
        let user_id = session.user_id.clone();
        self.trust.observe_key(
            &user_id,
            *session.credentials.identity.public_key(),
            &[],
        );
        self.session = Some(session);

        if let Err(e) = self.sync_conversations().await {
            warn!(error = %e, "initial conversation sync failed");
            if e.is_unauthorized() {
                return Err(e);
            }
        }
        Ok(user_id)
    }

    /// Forget every key, token, conversation and trust decision.
    pub fn logout(&mut self) {
        if let Some(session) = &self.session {
            info!(user = %session.user_id, "logging out");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.session = None;
        self.auth.logout();
        self.sessions.clear();
        self.trust.clear();
        self.pending.clear();
        self.departed.clear();
    }

    /// Any 401 ends the local session.
    fn guard<T>(&mut self, result: SealchatResult<T>) -> SealchatResult<T> {
        if let Err(e) = &result {
            if e.is_unauthorized() {
                warn!("session rejected by directory, clearing local state");
                self.teardown();
            }
        }
        result
    }

    fn token(&self) -> SealchatResult<AccessToken> {
        self.session
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(SealchatError::NotAuthenticated)
    }

    fn session(&self) -> SealchatResult<&Session> {
        self.session.as_ref().ok_or(SealchatError::NotAuthenticated)
    }

    // ── Directory ────────────────────────────────────────────────────────────

    /// Fetch `user`'s identity key and check it against the cache. Our own key
    /// is answered locally.
    pub async fn resolve_public_key(&mut self, user: &str) -> SealchatResult<PublicKey> {
        let session = self.session()?;
        if session.user_id == user {
            return Ok(*session.credentials.identity.public_key());
        }
        let token = session.token.clone();
        let result = self.directory.fetch_public_key(&token, user).await;
        let response = self.guard(result.map_err(SealchatError::from))?;

        let memberships = self.sessions.conversations_with(user);
        self.trust
            .observe_key(user, response.public_key, &memberships);
        Ok(response.public_key)
    }

    async fn resolve_all(&mut self, users: &[UserId]) -> SealchatResult<Vec<(UserId, PublicKey)>> {
        let mut resolved = Vec::with_capacity(users.len());
        for user in users {
            let key = self.resolve_public_key(user).await?;
            resolved.push((user.clone(), key));
        }
        Ok(resolved)
    }

    /// Re-read the conversation list and install every session key we can unseal.
    pub async fn sync_conversations(&mut self) -> SealchatResult<Vec<ConversationId>> {
        let token = self.token()?;
        let result = self.directory.list_conversations(&token).await;
        let listing = self.guard(result.map_err(SealchatError::from))?;

        let identity = self.session()?.credentials.identity.clone();
        let mut installed = Vec::new();
        for summary in listing.conversations {
            let id = summary.conversation_id;
            self.departed.remove(&id);
            match self.sessions.install_summary(summary, &identity) {
                Ok(()) => installed.push(id),
                Err(e) => warn!(conversation_id = id, error = %e, "skipping conversation"),
            }
        }
        debug!(count = installed.len(), "conversations synced");
        Ok(installed)
    }

    // ── Conversations ────────────────────────────────────────────────────────

    pub fn conversations(&self) -> Vec<&Conversation> {
        self.sessions.conversations()
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.sessions.conversation(id)
    }

    pub fn session_keys(&self) -> &GroupSessions {
        &self.sessions
    }

    /// Start a conversation between the caller and `others`.
    pub async fn create_conversation(&mut self, others: &[UserId]) -> SealchatResult<Conversation> {
        let me = self.session()?.user_id.clone();
        let mut participants = vec![me];
        for user in others {
            if !participants.contains(user) {
                participants.push(user.clone());
            }
        }

        let recipients = self.resolve_all(&participants).await?;
        let token = self.token()?;
        let result = self
            .sessions
            .create_conversation(self.directory.as_ref(), &token, &recipients)
            .await;
        self.guard(result)
    }

    pub async fn add_participant(
        &mut self,
        conversation_id: ConversationId,
        user: &str,
    ) -> SealchatResult<()> {
        if self.sessions.conversation(conversation_id).is_none() {
            return Err(SealchatError::UnknownConversation(conversation_id));
        }
        let public_key = self.resolve_public_key(user).await?;
        let token = self.token()?;
        let result = self
            .sessions
            .add_participant(
                self.directory.as_ref(),
                &token,
                conversation_id,
                user,
                &public_key,
            )
            .await;
        self.guard(result)
    }

    /// Remove `user` and rotate the key. The membership floor is checked
    /// before anything touches the network.
    pub async fn remove_participant(
        &mut self,
        conversation_id: ConversationId,
        user: &str,
    ) -> SealchatResult<()> {
        let remaining = self.sessions.remaining_after_removal(conversation_id, user)?;
        let recipients = self.resolve_all(&remaining).await?;
        let token = self.token()?;
        let result = self
            .sessions
            .remove_participant(
                self.directory.as_ref(),
                &token,
                conversation_id,
                user,
                &recipients,
            )
            .await;
        self.guard(result)?;

        if self.user_id() == Some(user) {
            self.drop_conversation(conversation_id);
        }
        Ok(())
    }

    fn drop_conversation(&mut self, conversation_id: ConversationId) {
        self.departed.insert(conversation_id);
        self.sessions.forget(conversation_id);
        self.trust.forget_conversation(conversation_id);
        if let Some(dropped) = self.pending.remove(&conversation_id) {
            debug!(conversation_id, count = dropped.len(), "discarded queued messages");
        }
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    pub async fn send_message(
        &mut self,
        conversation_id: ConversationId,
        text: &str,
    ) -> SealchatResult<SendMessageResponse> {
        let session = self.session()?;
        let token = session.token.clone();
        let key = self.sessions.session_key(conversation_id)?;
        let envelope = envelope::encode(
            self.crypto.as_ref(),
            conversation_id,
            &session.user_id,
            text,
            key,
        )?;

        let result = self
            .directory
            .send_message(&token, &envelope.to_request())
            .await;
        self.guard(result.map_err(SealchatError::from))
    }

    /// Fetch and decode a conversation's history. Each message fails on its own.
    pub async fn load_history(
        &mut self,
        conversation_id: ConversationId,
    ) -> SealchatResult<Vec<InboundMessage>> {
        let token = self.token()?;
        let result = self.directory.fetch_messages(&token, conversation_id).await;
        let records = self.guard(result.map_err(SealchatError::from))?;

        Ok(records
            .iter()
            .map(|record| self.decode_now(record))
            .collect())
    }

    fn decode_now(&self, record: &MessageRecord) -> InboundMessage {
        let result = match self.sessions.session_key(record.conversation_id) {
            Ok(key) => envelope::decode(self.crypto.as_ref(), record, key),
            Err(SealchatError::SessionKeyLost(_)) => Err(UndecryptableMessage::from_record(
                record,
                DecodeFailure::SessionKeyLost,
            )),
            Err(_) => Err(UndecryptableMessage::from_record(
                record,
                DecodeFailure::MissingSessionKey,
            )),
        };
        InboundMessage::from_decode(result)
    }

    /// Messages held back until their conversation's key arrives.
    pub fn pending_count(&self, conversation_id: ConversationId) -> usize {
        self.pending.get(&conversation_id).map_or(0, VecDeque::len)
    }

    fn receive(&mut self, record: MessageRecord) -> Option<InboundMessage> {
        let conversation_id = record.conversation_id;
        if self.sessions.has_key(conversation_id) || self.sessions.is_key_lost(conversation_id) {
            return Some(self.decode_now(&record));
        }
        if self.departed.contains(&conversation_id) {
            return Some(InboundMessage::from_decode(Err(
                UndecryptableMessage::from_record(&record, DecodeFailure::MissingSessionKey),
            )));
        }

        let limit = self.config.messages.max_pending_per_conversation;
        let queue = self.pending.entry(conversation_id).or_default();
        if queue.len() >= limit {
            return Some(InboundMessage::from_decode(Err(
                UndecryptableMessage::from_record(&record, DecodeFailure::QueueOverflow),
            )));
        }
        debug!(conversation_id, queued = queue.len() + 1, "queued message until key arrives");
        queue.push_back(record);
        None
    }

    fn drain_pending(&mut self, conversation_id: ConversationId) -> Vec<ClientUpdate> {
        let Some(queue) = self.pending.remove(&conversation_id) else {
            return Vec::new();
        };
        queue
            .iter()
            .map(|record| ClientUpdate::Message(self.decode_now(record)))
            .collect()
    }

    /// Empty the queue. Call after [`ChatClient::sync_conversations`]: messages
    /// whose conversation now has a key are decoded, the rest (key lost, or a
    /// conversation the directory does not list for us) come back as
    /// placeholders.
    pub fn flush_pending(&mut self) -> Vec<InboundMessage> {
        let mut queued: Vec<ConversationId> = self.pending.keys().copied().collect();
        queued.sort_unstable();

        let mut messages = Vec::new();
        for id in queued {
            for update in self.drain_pending(id) {
                if let ClientUpdate::Message(message) = update {
                    messages.push(message);
                }
            }
        }
        messages
    }

    // ── Push events ──────────────────────────────────────────────────────────

    /// Apply one push event. Events must be fed in arrival order.
    pub async fn handle_push_event(&mut self, event: PushEvent) -> SealchatResult<Vec<ClientUpdate>> {
        let me = self.session()?.user_id.clone();

        match event {
            PushEvent::NewMessage(record) => {
                Ok(self.receive(record).map(ClientUpdate::Message).into_iter().collect())
            }

            PushEvent::ParticipantAdded {
                conversation_id,
                user_id,
                public_key,
            } => {
                let mut updates = Vec::new();
                if user_id == me {
                    // We were added: our sealed copy of the key is in the listing
                    self.sync_conversations().await?;
                    updates.extend(self.drain_pending(conversation_id));
                } else if !self.sessions.merge_participant(conversation_id, &user_id) {
                    debug!(conversation_id, "participant added to unknown conversation");
                }
                let memberships = self.sessions.conversations_with(&user_id);
                self.trust.observe_key(&user_id, public_key, &memberships);
                updates.insert(
                    0,
                    ClientUpdate::ParticipantAdded {
                        conversation_id,
                        user_id,
                    },
                );
                Ok(updates)
            }

            PushEvent::KeyRotation {
                conversation_id,
                removed_user_id,
                remaining_participants,
                new_encrypted_session_key,
            } => {
                if removed_user_id == me || !remaining_participants.contains(&me) {
                    self.drop_conversation(conversation_id);
                    return Ok(vec![ClientUpdate::RemovedFromConversation { conversation_id }]);
                }
                if let Some(sender_key) = &new_encrypted_session_key.sender_public_key {
                    match self.trust.holder_of(sender_key, &remaining_participants) {
                        Some(sender) => debug!(conversation_id, sender = %sender, "rotation sent by member"),
                        None => warn!(
                            conversation_id,
                            "rotation sender key matches no known member of the conversation"
                        ),
                    }
                }
                let identity = self.session()?.credentials.identity.clone();
                self.departed.remove(&conversation_id);
                self.sessions.apply_rotation(
                    conversation_id,
                    remaining_participants,
                    &new_encrypted_session_key.cipher.0,
                    &identity,
                )?;

                let mut updates = vec![ClientUpdate::KeyRotated {
                    conversation_id,
                    removed_user_id,
                }];
                updates.extend(self.drain_pending(conversation_id));
                Ok(updates)
            }

            PushEvent::RemovedFromConversation { conversation_id } => {
                info!(conversation_id, "removed from conversation");
                self.drop_conversation(conversation_id);
                Ok(vec![ClientUpdate::RemovedFromConversation { conversation_id }])
            }

            PushEvent::PublicKeyChanged {
                contact_id,
                new_public_key,
            } => {
                let conversations = self.sessions.conversations_with(&contact_id);
                self.trust
                    .public_key_changed(&contact_id, new_public_key, &conversations);
                Ok(vec![ClientUpdate::PublicKeyChanged {
                    user_id: contact_id,
                    conversations,
                }])
            }
        }
    }

    // ── Trust ────────────────────────────────────────────────────────────────

    /// Safety number between us and `user`, using their current directory key.
    pub async fn safety_number(&mut self, user: &str) -> SealchatResult<String> {
        let their_key = self.resolve_public_key(user).await?;
        let session = self.session()?;
        compute_safety_number(
            self.crypto.as_ref(),
            session.credentials.identity.public_key(),
            &their_key,
            &session.user_id,
            user,
        )
    }

    pub fn mark_verified(&mut self, conversation_id: ConversationId, user: &str) -> SealchatResult<()> {
        let conversation = self
            .sessions
            .conversation(conversation_id)
            .ok_or(SealchatError::UnknownConversation(conversation_id))?;
        if !conversation.contains(user) {
            return Err(SealchatError::MembershipInvariant(format!(
                "{user} is not a participant of conversation {conversation_id}"
            )));
        }
        self.trust.mark_verified(conversation_id, user);
        Ok(())
    }

    pub fn verification_state(&self, conversation_id: ConversationId, user: &str) -> VerificationState {
        self.trust.state(conversation_id, user)
    }

    pub fn is_verified(&self, conversation_id: ConversationId, user: &str) -> bool {
        self.trust.is_verified(conversation_id, user)
    }

    pub fn needs_reverification(&self, conversation_id: ConversationId, user: &str) -> bool {
        self.trust.needs_reverification(conversation_id, user)
    }
}
