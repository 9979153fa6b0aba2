//! sealchat-client: the client-side half of the sealchat protocol
//!
//! ```text
//! CredentialManager ──keys──▶ Authenticator (challenge signing)
//!        │
//!        └──identity key──▶ GroupSessions (seal / unseal session keys)
//!                                 │
//!                                 └──session key──▶ envelope::{encode, decode}
//!
//! PushConnection ──PushEvent──▶ ChatClient ──key changes──▶ TrustTracker
//! ```
//!
//! [`ChatClient`] owns every piece of mutable state and is driven through
//! `&mut self`, so there is exactly one writer.

pub mod auth;
pub mod client;
pub mod credentials;
pub mod envelope;
pub mod events;
pub mod http;
pub mod push;
pub mod sessions;
pub mod transport;
pub mod trust;

pub use auth::{AuthState, Authenticator, Session};
pub use client::{ChatClient, ClientUpdate, InboundMessage};
pub use credentials::{CredentialManager, Credentials};
pub use envelope::{DecodeFailure, DecodedMessage, MessageEnvelope, UndecryptableMessage};
pub use events::PushEvent;
pub use http::HttpDirectory;
pub use push::{PushConnection, PushHandle, PushSource, ReconnectPolicy, ScheduledRetry};
pub use sessions::{Conversation, GroupSessions};
pub use transport::{AccessToken, Directory};
pub use trust::{compute_safety_number, render_safety_digits, KeyObservation, TrustTracker, VerificationState};
