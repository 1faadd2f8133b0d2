//! Document models persisted in the backing store.
//!
//! Field names serialize to camelCase so the logical schema reads the same
//! in every store implementation (`lastMessageAt`, `conversationId`, ...).
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the caller layer as JSON.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::types::{MessageKind, MessageStatus, Role, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// The single canonical conversation between one client and the operator.
///
/// Invariant (application-enforced, the store has no unique constraint): for
/// a given client there is at most one conversation whose participant set is
/// exactly `{client, operator}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique conversation identifier (also the document id).
    pub id: String,
    /// Exactly two participants: the client and the operator.
    pub participants: Vec<UserId>,
    /// Display name per participant identity.
    pub participant_names: HashMap<String, String>,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// Denormalized preview of the most recent message.
    pub last_message: Option<String>,
    /// Denormalized timestamp of the most recent message.
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Whether this conversation is exactly the `{client, operator}` pair.
    pub fn is_pair_with(&self, client: &UserId, operator: &UserId) -> bool {
        self.participants.len() == 2
            && self.participants.contains(client)
            && self.participants.contains(operator)
    }

    /// The non-operator participant, if the participant set is a valid pair.
    pub fn client_of(&self, operator: &UserId) -> Option<&UserId> {
        if self.participants.len() != 2 || !self.participants.contains(operator) {
            return None;
        }
        self.participants.iter().find(|p| *p != operator)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, ModelError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ModelError::Malformed("conversation", e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.  The content is encrypted independently for every
/// participant; `content_cipher` maps recipient identity to base64
/// ciphertext.  Immutable once created, except for `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier (also the document id).
    pub id: String,
    /// The conversation this message belongs to.
    pub conversation_id: String,
    /// Identity of the sender.
    pub sender_id: UserId,
    /// Recipient identity -> base64 RSA-OAEP ciphertext.
    pub content_cipher: HashMap<String, String>,
    /// Message kind, stored under the `type` key.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// When the message was sent.
    pub created_at: DateTime<Utc>,
    /// Delivery state.
    pub status: MessageStatus,
}

impl Message {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ModelError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ModelError::Malformed("message", e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Heartbeat record for one identity.  The operator is stored under the
/// fixed `operator` key so any client can observe it.  Never deleted; a dead
/// writer simply ages past the online cutoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub identity: UserId,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub role: Role,
}

impl PresenceRecord {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ModelError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ModelError::Malformed("presence", e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

/// Ephemeral "is typing" record, keyed by `{conversationId}_{identity}`.
/// Readers ignore records older than the TTL whether or not a sweep has
/// deleted them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingRecord {
    pub conversation_id: String,
    pub identity: UserId,
    pub is_typing: bool,
    pub timestamp: DateTime<Utc>,
}

impl TypingRecord {
    /// Document key for this record.
    pub fn doc_key(conversation_id: &str, identity: &UserId) -> String {
        format!("{conversation_id}_{identity}")
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, ModelError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ModelError::Malformed("typing", e.to_string()))
    }
}
