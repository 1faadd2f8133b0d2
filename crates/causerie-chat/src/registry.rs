//! Conversation identity: one canonical conversation per client.
//!
//! The store enforces no uniqueness, so the registry does three things to
//! keep the invariant honest:
//!
//! 1. a resolved-id cache, so repeat callers never touch the store;
//! 2. a keyed single-flight map, so concurrent calls for the same client
//!    inside one process collapse into exactly one creation attempt — run
//!    on a spawned task so it resolves even if every caller abandons it;
//! 3. self-healing de-duplication on every resolution, because two
//!    *processes* can still race past each other: whichever call next sees
//!    the duplicates keeps the lexically smallest id and deletes the rest.
//!
//! Both maps are plain mutex-guarded state and are never trusted over a
//! fresh store read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use causerie_shared::constants::{CONVERSATIONS, MESSAGES};
use causerie_shared::{Conversation, MessageKind, UserId};
use causerie_store::{DocumentStore, Filter};

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::feed::Feed;
use crate::messages::MessageStore;

type CreateResult = std::result::Result<String, Arc<ChatError>>;
type CreateFuture = Shared<BoxFuture<'static, CreateResult>>;

/// Maps each client identity to its single conversation with the operator.
pub struct ConversationRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    messages: Arc<MessageStore>,
    config: ChatConfig,
    resolved: Mutex<HashMap<UserId, String>>,
    in_flight: Mutex<HashMap<UserId, CreateFuture>>,
}

impl ConversationRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        messages: Arc<MessageStore>,
        config: ChatConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                messages,
                config,
                resolved: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve (or create) the canonical conversation for a client.
    ///
    /// On first contact this creates the conversation document and seeds
    /// the fixed welcome message from the operator.
    pub async fn get_or_create(&self, client: &UserId, display_name: &str) -> Result<String> {
        if let Some(id) = lock(&self.inner.resolved).get(client).cloned() {
            return Ok(id);
        }

        let future = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(client).cloned() {
                Some(existing) => existing,
                None => {
                    let inner = Arc::clone(&self.inner);
                    let task_client = client.clone();
                    let name = display_name.to_string();
                    // Spawned so the attempt finishes even when every
                    // awaiting caller has gone away; other waiters depend
                    // on its result.
                    let handle = tokio::spawn(async move {
                        let result = resolve_or_create(&inner, &task_client, &name)
                            .await
                            .map_err(Arc::new);
                        if let Ok(id) = &result {
                            lock(&inner.resolved).insert(task_client.clone(), id.clone());
                        }
                        lock(&inner.in_flight).remove(&task_client);
                        result
                    });
                    let future: CreateFuture = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(Arc::new(ChatError::Internal(format!(
                                "conversation creation task failed: {e}"
                            )))),
                        }
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(client.clone(), future.clone());
                    future
                }
            }
        };

        future.await.map_err(ChatError::Shared)
    }

    /// Live operator view: every conversation, most recent activity first.
    pub async fn list_all(&self) -> Result<Feed<Vec<Conversation>>> {
        let watch = self.inner.store.watch(CONVERSATIONS, Filter::All).await?;
        Ok(Feed::spawn(watch, |docs| {
            let mut conversations: Vec<Conversation> = docs
                .iter()
                .filter_map(|d| match Conversation::from_value(&d.fields) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        warn!(document = %d.id, error = %e, "Skipping malformed conversation");
                        None
                    }
                })
                .collect();
            conversations.sort_by(|a, b| match (&a.last_message_at, &b.last_message_at) {
                (Some(x), Some(y)) => y.cmp(x).then_with(|| a.id.cmp(&b.id)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.id.cmp(&b.id),
            });
            conversations
        }))
    }

    /// Administrative sweep: for every client with more than one
    /// conversation, keep the lexically smallest id and delete the rest
    /// (and their messages).  Returns the number of conversations removed.
    pub async fn cleanup_duplicates(&self) -> Result<usize> {
        let operator = &self.inner.config.operator_id;
        let docs = self.inner.store.query(CONVERSATIONS, &Filter::All).await?;

        let mut by_client: HashMap<UserId, Vec<String>> = HashMap::new();
        for doc in &docs {
            match Conversation::from_value(&doc.fields) {
                Ok(c) => {
                    if let Some(client) = c.client_of(operator).cloned() {
                        by_client.entry(client).or_default().push(c.id);
                    }
                }
                Err(e) => warn!(document = %doc.id, error = %e, "Skipping malformed conversation"),
            }
        }

        let mut removed = 0;
        for (client, mut ids) in by_client {
            if ids.len() < 2 {
                continue;
            }
            ids.sort();
            for duplicate in &ids[1..] {
                delete_conversation(&self.inner, duplicate).await?;
                removed += 1;
            }
            info!(
                client = %client.short(),
                kept = %ids[0],
                removed = ids.len() - 1,
                "Merged duplicate conversations"
            );
            // Repoint a cache entry that referenced a deleted duplicate.
            let mut resolved = lock(&self.inner.resolved);
            if resolved.get(&client).is_some_and(|id| id != &ids[0]) {
                resolved.insert(client, ids[0].clone());
            }
        }
        Ok(removed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The single-flight body: query, heal duplicates, or create and seed the
/// welcome message.
async fn resolve_or_create(inner: &Arc<Inner>, client: &UserId, name: &str) -> Result<String> {
    let operator = inner.config.operator_id.clone();

    let filter = Filter::array_contains("participants", json!(client.as_str()));
    let docs = inner.store.query(CONVERSATIONS, &filter).await?;

    let mut pairs: Vec<Conversation> = docs
        .iter()
        .filter_map(|d| match Conversation::from_value(&d.fields) {
            Ok(c) if c.is_pair_with(client, &operator) => Some(c),
            Ok(_) => None,
            Err(e) => {
                warn!(document = %d.id, error = %e, "Skipping malformed conversation");
                None
            }
        })
        .collect();
    pairs.sort_by(|a, b| a.id.cmp(&b.id));

    if let Some(canonical) = pairs.first() {
        let canonical_id = canonical.id.clone();
        if pairs.len() > 1 {
            info!(
                client = %client.short(),
                kept = %canonical_id,
                removed = pairs.len() - 1,
                "Healing duplicate conversations"
            );
            for duplicate in &pairs[1..] {
                delete_conversation(inner, &duplicate.id).await?;
            }
        }
        return Ok(canonical_id);
    }

    let id = Uuid::new_v4().to_string();
    let conversation = Conversation {
        id: id.clone(),
        participants: vec![client.clone(), operator.clone()],
        participant_names: HashMap::from([
            (client.to_string(), name.to_string()),
            (operator.to_string(), inner.config.operator_name.clone()),
        ]),
        created_at: Utc::now(),
        last_message: None,
        last_message_at: None,
    };
    inner
        .store
        .put(CONVERSATIONS, &id, serde_json::to_value(&conversation)?)
        .await?;
    info!(conversation = %id, client = %client.short(), "Created conversation");

    inner
        .messages
        .send(&id, &operator, &inner.config.welcome_text, MessageKind::Text)
        .await?;

    Ok(id)
}

/// Remove a conversation document and every message that belonged to it.
async fn delete_conversation(inner: &Arc<Inner>, conversation_id: &str) -> Result<()> {
    inner.store.delete(CONVERSATIONS, conversation_id).await?;
    let orphans = inner
        .store
        .query(
            MESSAGES,
            &Filter::field_eq("conversationId", json!(conversation_id)),
        )
        .await?;
    for doc in &orphans {
        inner.store.delete(MESSAGES, &doc.id).await?;
    }
    debug!(
        conversation = %conversation_id,
        messages = orphans.len(),
        "Deleted duplicate conversation"
    );
    Ok(())
}
