//! Wiring for the whole messaging core.
//!
//! The source system kept these services as shared module-level singletons;
//! here they are one explicit, constructible object.  Hand it a store and a
//! config, get every component wired with the right shared dependencies —
//! and hand test code a `MemoryStore` to get the full stack in-process.

use std::sync::Arc;

use causerie_store::DocumentStore;

use crate::cipher::MessageCipher;
use crate::config::ChatConfig;
use crate::keys::KeyDirectory;
use crate::messages::MessageStore;
use crate::presence::PresenceTracker;
use crate::registry::ConversationRegistry;
use crate::typing::TypingIndicator;

/// The fully wired messaging core for one process.
pub struct ChatService {
    pub keys: Arc<KeyDirectory>,
    pub cipher: Arc<MessageCipher>,
    pub messages: Arc<MessageStore>,
    pub registry: ConversationRegistry,
    pub presence: PresenceTracker,
    pub typing: TypingIndicator,
}

impl ChatService {
    pub fn new(store: Arc<dyn DocumentStore>, config: ChatConfig) -> Self {
        let keys = Arc::new(KeyDirectory::new(Arc::clone(&store)));
        let cipher = Arc::new(MessageCipher::new(Arc::clone(&keys)));
        let messages = Arc::new(MessageStore::new(Arc::clone(&store), Arc::clone(&cipher)));
        let registry = ConversationRegistry::new(
            Arc::clone(&store),
            Arc::clone(&messages),
            config.clone(),
        );
        let presence = PresenceTracker::new(Arc::clone(&store), config.clone());
        let typing = TypingIndicator::new(Arc::clone(&store), config);

        Self {
            keys,
            cipher,
            messages,
            registry,
            presence,
            typing,
        }
    }
}
