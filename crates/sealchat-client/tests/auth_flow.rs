//! Registration and challenge/response login against the in-memory directory.

mod common;

use std::sync::atomic::Ordering;

use secrecy::SecretString;

use common::{client, client_with, password, registered, test_config, MemoryDirectory};
use sealchat_client::AuthState;
use sealchat_core::{SealchatError, TransportError};

#[tokio::test]
async fn register_then_login_restores_identity() {
    let directory = MemoryDirectory::new();
    let alice = registered(&directory, "alice").await;
    let registered_key = alice.identity_public_key().expect("signed in after register");

    let mut again = client(&directory);
    let user = again
        .login("alice", &password())
        .await
        .expect("login should succeed");

    assert_eq!(user, "alice");
    assert_eq!(again.identity_public_key(), Some(registered_key));
    assert!(matches!(again.auth_state(), AuthState::Authenticated { user_id } if user_id == "alice"));
}

#[tokio::test]
async fn wrong_password_and_unknown_user_look_the_same() {
    let directory = MemoryDirectory::new();
    registered(&directory, "alice").await;

    let mut client = client(&directory);
    let wrong = client
        .login("alice", &SecretString::from("not the password"))
        .await
        .unwrap_err();
    assert!(matches!(wrong, SealchatError::AuthenticationFailed));
    assert!(matches!(client.auth_state(), AuthState::Unauthenticated));

    let unknown = client.login("mallory", &password()).await.unwrap_err();
    assert!(matches!(unknown, SealchatError::AuthenticationFailed));
    assert!(client.user_id().is_none());
}

#[tokio::test]
async fn reissued_challenge_is_rejected() {
    let directory = MemoryDirectory::new();
    registered(&directory, "alice").await;

    let mut client = client(&directory);
    client
        .login("alice", &password())
        .await
        .expect("first login should succeed");

    directory.replay_challenges.store(true, Ordering::SeqCst);
    let err = client.login("alice", &password()).await.unwrap_err();
    assert!(matches!(err, SealchatError::ProtocolViolation(_)));
    assert!(matches!(client.auth_state(), AuthState::Unauthenticated));
}

#[tokio::test]
async fn unanswered_challenge_times_out() {
    let directory = MemoryDirectory::new();
    registered(&directory, "alice").await;

    let mut config = test_config();
    config.auth.challenge_timeout_secs = 1;
    let mut client = client_with(&directory, config);

    directory.hang_verify.store(true, Ordering::SeqCst);
    let err = client.login("alice", &password()).await.unwrap_err();

    assert!(matches!(err, SealchatError::Transport(TransportError::Timeout)));
    assert!(matches!(client.auth_state(), AuthState::Unauthenticated));
}

#[tokio::test]
async fn duplicate_registration_is_reported() {
    let directory = MemoryDirectory::new();
    registered(&directory, "alice").await;

    let mut client = client(&directory);
    let err = client.register("alice", &password()).await.unwrap_err();
    assert!(matches!(
        err,
        SealchatError::Transport(TransportError::Status { code: 409, .. })
    ));
    assert!(client.user_id().is_none());
}

#[tokio::test]
async fn rejected_token_clears_local_state() {
    let directory = MemoryDirectory::new();
    registered(&directory, "bob").await;
    let mut alice = registered(&directory, "alice").await;
    let conversation = alice
        .create_conversation(&["bob".to_string()])
        .await
        .expect("create should succeed");

    directory.revoke_tokens();
    let err = alice
        .send_message(conversation.id, "anyone there?")
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert!(alice.user_id().is_none());
    assert!(alice.conversations().is_empty());
    assert!(!alice.session_keys().has_key(conversation.id));
    assert!(matches!(alice.auth_state(), AuthState::Unauthenticated));
    assert!(matches!(
        alice.send_message(conversation.id, "again").await,
        Err(SealchatError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn logout_forgets_everything() {
    let directory = MemoryDirectory::new();
    registered(&directory, "bob").await;
    let mut alice = registered(&directory, "alice").await;
    let conversation = alice
        .create_conversation(&["bob".to_string()])
        .await
        .unwrap();
    alice.mark_verified(conversation.id, "bob").unwrap();

    alice.logout();

    assert!(alice.user_id().is_none());
    assert!(alice.conversations().is_empty());
    assert!(!alice.is_verified(conversation.id, "bob"));
}
