//! Message persistence and the live decrypting view.
//!
//! Sending is a best-effort two-step write: the message document is
//! authoritative, the conversation's `lastMessage`/`lastMessageAt`
//! denormalization is updated afterwards and a failure there is logged,
//! never rolled back.  The backing store offers no cross-document
//! transaction, and pretending otherwise would be a lie.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use causerie_shared::constants::{CONVERSATIONS, DECRYPT_PLACEHOLDER, MESSAGES};
use causerie_shared::{Conversation, Message, MessageKind, MessageStatus, UserId};
use causerie_store::{DocumentStore, Filter};

use crate::cipher::MessageCipher;
use crate::error::{ChatError, Result};
use crate::feed::Feed;

/// A message as the caller layer sees it: decrypted for one identity, or
/// carrying the placeholder when that was impossible.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// Appends messages and exposes the ordered, live-updating view of a
/// conversation.
pub struct MessageStore {
    store: Arc<dyn DocumentStore>,
    cipher: Arc<MessageCipher>,
}

impl MessageStore {
    pub fn new(store: Arc<dyn DocumentStore>, cipher: Arc<MessageCipher>) -> Self {
        Self { store, cipher }
    }

    /// Encrypt and persist a message, then update the conversation summary.
    ///
    /// The summary update is best-effort: once the message document is
    /// written, the send has happened and the id is returned even if the
    /// denormalized fields lag behind.
    pub async fn send(
        &self,
        conversation_id: &str,
        sender: &UserId,
        plaintext: &str,
        kind: MessageKind,
    ) -> Result<String> {
        let doc = self
            .store
            .get(CONVERSATIONS, conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        let conversation = Conversation::from_value(&doc.fields)?;

        if !conversation.participants.contains(sender) {
            return Err(ChatError::NotAParticipant {
                conversation: conversation_id.to_string(),
                identity: sender.clone(),
            });
        }

        let content_cipher = self
            .cipher
            .encrypt_for(plaintext, &conversation.participants)
            .await?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let message = Message {
            id: id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender.clone(),
            content_cipher,
            kind,
            created_at: now,
            status: MessageStatus::Sent,
        };
        self.store
            .put(MESSAGES, &id, serde_json::to_value(&message)?)
            .await?;

        let preview = plaintext.to_string();
        let summary = self
            .store
            .mutate(
                CONVERSATIONS,
                conversation_id,
                Box::new(move |current| {
                    current.map(|mut fields| {
                        fields["lastMessage"] = json!(preview);
                        fields["lastMessageAt"] = json!(now);
                        fields
                    })
                }),
            )
            .await;
        if let Err(e) = summary {
            warn!(
                conversation = %conversation_id,
                error = %e,
                "Conversation summary update failed after send"
            );
        }

        info!(
            message = %id,
            conversation = %conversation_id,
            sender = %sender.short(),
            "Message sent"
        );
        Ok(id)
    }

    /// Live view of a conversation, decrypted for `identity`.
    ///
    /// Snapshots are ordered by `(createdAt, id)` so ties from the store's
    /// coarse timestamps resolve deterministically.  A message that fails
    /// to decrypt is rendered as the fixed placeholder; a malformed
    /// document is skipped.  Neither ends the feed.
    pub async fn subscribe(
        &self,
        conversation_id: &str,
        identity: &UserId,
        private: &RsaPrivateKey,
    ) -> Result<Feed<Vec<DecryptedMessage>>> {
        let watch = self
            .store
            .watch(
                MESSAGES,
                Filter::field_eq("conversationId", json!(conversation_id)),
            )
            .await?;

        let me = identity.clone();
        let key = private.clone();
        Ok(Feed::spawn(watch, move |docs| {
            let mut messages: Vec<DecryptedMessage> = docs
                .iter()
                .filter_map(|d| {
                    let message = match Message::from_value(&d.fields) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(document = %d.id, error = %e, "Skipping malformed message");
                            return None;
                        }
                    };
                    let content =
                        match MessageCipher::decrypt(&message.content_cipher, &me, &key) {
                            Ok(text) => text,
                            Err(e) => {
                                debug!(message = %message.id, error = %e, "Rendering placeholder");
                                DECRYPT_PLACEHOLDER.to_string()
                            }
                        };
                    Some(DecryptedMessage {
                        id: message.id,
                        conversation_id: message.conversation_id,
                        sender_id: message.sender_id,
                        content,
                        kind: message.kind,
                        status: message.status,
                        created_at: message.created_at,
                    })
                })
                .collect();
            messages.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            messages
        }))
    }

    /// Mark every message addressed to `reader` in a conversation as read.
    /// Returns how many were flipped.
    pub async fn mark_read(&self, conversation_id: &str, reader: &UserId) -> Result<usize> {
        let docs = self
            .store
            .query(
                MESSAGES,
                &Filter::field_eq("conversationId", json!(conversation_id)),
            )
            .await?;

        let mut changed = 0;
        for doc in docs {
            let message = match Message::from_value(&doc.fields) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if message.sender_id == *reader || message.status == MessageStatus::Read {
                continue;
            }
            self.store
                .mutate(
                    MESSAGES,
                    &doc.id,
                    Box::new(|current| {
                        current.map(|mut fields| {
                            fields["status"] = json!("read");
                            fields
                        })
                    }),
                )
                .await?;
            changed += 1;
        }

        if changed > 0 {
            debug!(conversation = %conversation_id, reader = %reader.short(), changed, "Marked messages read");
        }
        Ok(changed)
    }
}
