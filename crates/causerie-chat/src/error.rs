use std::sync::Arc;

use thiserror::Error;

use causerie_shared::{ModelError, UserId};
use causerie_store::StoreError;

/// Errors produced by the messaging core.
///
/// Write-path errors (send, typing upsert) propagate to the caller.
/// Read/subscribe-path errors never terminate a subscription: a message
/// that fails to decrypt is rendered as a placeholder, a malformed
/// document is skipped.  Presence degrades to a local cache instead of
/// surfacing [`ChatError::Store`].
#[derive(Error, Debug)]
pub enum ChatError {
    /// Key generation or encryption primitives failed.  Fatal for
    /// messaging; surfaced at startup, not deferred to first send.
    #[error("Crypto backend unavailable: {0}")]
    CryptoUnavailable(String),

    /// The recipient has never published a public key.  Non-fatal: the
    /// recipient is skipped during encryption.
    #[error("No published key for {0}")]
    KeyNotFound(UserId),

    /// The ciphertext map holds no entry for the local identity.
    #[error("No ciphertext addressed to {0}")]
    NoCiphertextForSelf(UserId),

    /// Base64, RSA or UTF-8 failure while decrypting one message.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("{identity} is not a participant of {conversation}")]
    NotAParticipant {
        conversation: String,
        identity: UserId,
    },

    /// Store failure.  Transient; retry is caller policy.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed document: {0}")]
    Model(#[from] ModelError),

    /// A failure observed through the single-flight creation path, shared
    /// between every caller that awaited the same attempt.
    #[error("{0}")]
    Shared(Arc<ChatError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
