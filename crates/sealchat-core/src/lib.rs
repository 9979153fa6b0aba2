pub mod config;
pub mod error;
pub mod types;

pub use error::{SealchatError, SealchatResult, TransportError};
pub use types::{ConversationId, UserId};
