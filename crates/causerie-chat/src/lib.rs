//! # causerie-chat
//!
//! The encrypted one-to-one messaging and presence core: conversation
//! identity, per-recipient message encryption, heartbeat presence and
//! ephemeral typing state between a client and the fixed operator identity.
//!
//! Every component is an explicit, constructible service object taking its
//! store and crypto dependencies as constructor parameters — no global
//! mutable state.  [`ChatService`] wires the whole set from one
//! [`causerie_store::DocumentStore`] and a [`ChatConfig`].
//!
//! All `subscribe`/`listen`/`watch` methods return a [`Feed`]: a cancellable
//! stream of full snapshots that stops delivering and releases its store
//! listener when dropped.

pub mod cipher;
pub mod config;
pub mod feed;
pub mod keys;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod service;
pub mod typing;

mod error;

pub use cipher::MessageCipher;
pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use feed::Feed;
pub use keys::{KeyDirectory, KeyPair};
pub use messages::{DecryptedMessage, MessageStore};
pub use presence::{PresenceStatus, PresenceTracker};
pub use registry::ConversationRegistry;
pub use service::ChatService;
pub use typing::TypingIndicator;
