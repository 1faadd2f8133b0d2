//! Ephemeral typing state.
//!
//! A typing record is only meaningful while fresh: readers apply the TTL at
//! read time, so a stalled writer's record ages out of every peer's view on
//! its own.  The sweep below is storage hygiene, not a correctness
//! requirement — absence and staleness mean the same thing to a reader.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use causerie_shared::constants::TYPING;
use causerie_shared::{TypingRecord, UserId};
use causerie_store::{DocumentStore, Filter};

use crate::config::ChatConfig;
use crate::error::Result;
use crate::feed::Feed;

/// Publishes and observes per-conversation typing records.
pub struct TypingIndicator {
    store: Arc<dyn DocumentStore>,
    config: ChatConfig,
}

impl TypingIndicator {
    pub fn new(store: Arc<dyn DocumentStore>, config: ChatConfig) -> Self {
        Self { store, config }
    }

    /// Publish (or clear) this identity's typing state for a conversation.
    ///
    /// `true` upserts a fresh record; `false` deletes it outright — absence
    /// already means "not typing", no tombstone needed.  Redundant calls
    /// with the same state are fine; debouncing keystrokes is the caller's
    /// policy.
    pub async fn set_typing(
        &self,
        conversation_id: &str,
        identity: &UserId,
        is_typing: bool,
    ) -> Result<()> {
        let key = TypingRecord::doc_key(conversation_id, identity);
        if is_typing {
            let record = TypingRecord {
                conversation_id: conversation_id.to_string(),
                identity: identity.clone(),
                is_typing: true,
                timestamp: Utc::now(),
            };
            self.store
                .put(TYPING, &key, serde_json::to_value(&record)?)
                .await?;
        } else {
            self.store.delete(TYPING, &key).await?;
        }
        Ok(())
    }

    /// Live set of peers currently typing in a conversation, excluding
    /// `self_identity`.  The TTL cutoff is evaluated against `now` on every
    /// snapshot, so stale records disappear without being deleted.
    pub async fn listen(
        &self,
        conversation_id: &str,
        self_identity: &UserId,
    ) -> Result<Feed<Vec<UserId>>> {
        let ttl = self.config.typing_ttl_secs;
        let me = self_identity.clone();
        let watch = self
            .store
            .watch(
                TYPING,
                Filter::field_eq("conversationId", json!(conversation_id)),
            )
            .await?;

        Ok(Feed::spawn(watch, move |docs| {
            let now = Utc::now();
            let mut typing: Vec<UserId> = docs
                .iter()
                .filter_map(|d| {
                    let record = TypingRecord::from_value(&d.fields).ok()?;
                    let fresh =
                        record.is_typing && (now - record.timestamp).num_seconds() < ttl;
                    (fresh && record.identity != me).then_some(record.identity)
                })
                .collect();
            typing.sort();
            typing
        }))
    }

    /// Storage-hygiene sweep: delete records past the long TTL.  Returns
    /// how many were removed.
    pub async fn cleanup(&self) -> Result<usize> {
        let docs = self.store.query(TYPING, &Filter::All).await?;
        let now = Utc::now();

        let mut removed = 0;
        for doc in docs {
            let stale = match TypingRecord::from_value(&doc.fields) {
                Ok(record) => {
                    (now - record.timestamp).num_seconds() > self.config.typing_sweep_secs
                }
                // Unparseable typing records are garbage either way.
                Err(_) => true,
            };
            if stale {
                self.store.delete(TYPING, &doc.id).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Swept stale typing records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_store::MemoryStore;
    use chrono::Duration;

    fn indicator() -> (Arc<MemoryStore>, TypingIndicator) {
        let store = Arc::new(MemoryStore::new());
        let indicator = TypingIndicator::new(store.clone(), ChatConfig::default());
        (store, indicator)
    }

    async fn put_record(store: &MemoryStore, conversation: &str, identity: &str, age_secs: i64) {
        let record = TypingRecord {
            conversation_id: conversation.to_string(),
            identity: UserId::new(identity),
            is_typing: true,
            timestamp: Utc::now() - Duration::seconds(age_secs),
        };
        store
            .put(
                TYPING,
                &TypingRecord::doc_key(conversation, &record.identity),
                serde_json::to_value(&record).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_typing_true_upserts_false_deletes() {
        let (store, indicator) = indicator();
        let alice = UserId::new("u1");

        indicator.set_typing("c1", &alice, true).await.unwrap();
        assert!(store.get(TYPING, "c1_u1").await.unwrap().is_some());

        // Redundant same-state call is tolerated.
        indicator.set_typing("c1", &alice, true).await.unwrap();

        indicator.set_typing("c1", &alice, false).await.unwrap();
        assert!(store.get(TYPING, "c1_u1").await.unwrap().is_none());

        // Clearing an already-clear state is a no-op.
        indicator.set_typing("c1", &alice, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_applies_ttl_at_read_time() {
        let (store, indicator) = indicator();
        put_record(&store, "c1", "u1", 9).await;
        put_record(&store, "c1", "u2", 11).await;

        let mut feed = indicator
            .listen("c1", &UserId::new("operator"))
            .await
            .unwrap();
        let typing = feed.recv().await.unwrap();

        // 9s old is visible, 11s old has aged out without being deleted.
        assert_eq!(typing, vec![UserId::new("u1")]);
        assert!(store.get(TYPING, "c1_u2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_listen_excludes_self_and_other_conversations() {
        let (store, indicator) = indicator();
        put_record(&store, "c1", "u1", 0).await;
        put_record(&store, "c1", "operator", 0).await;
        put_record(&store, "c2", "u3", 0).await;

        let mut feed = indicator
            .listen("c1", &UserId::new("operator"))
            .await
            .unwrap();
        assert_eq!(feed.recv().await.unwrap(), vec![UserId::new("u1")]);
    }

    #[tokio::test]
    async fn test_listen_is_live() {
        let (_, indicator) = indicator();
        let alice = UserId::new("u1");

        let mut feed = indicator
            .listen("c1", &UserId::new("operator"))
            .await
            .unwrap();
        assert!(feed.recv().await.unwrap().is_empty());

        indicator.set_typing("c1", &alice, true).await.unwrap();
        assert_eq!(feed.recv().await.unwrap(), vec![alice.clone()]);

        indicator.set_typing("c1", &alice, false).await.unwrap();
        assert!(feed.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_past_the_long_ttl() {
        let (store, indicator) = indicator();
        put_record(&store, "c1", "u1", 5).await;
        put_record(&store, "c1", "u2", 20).await;
        put_record(&store, "c1", "u3", 40).await;
        put_record(&store, "c2", "u4", 90).await;

        let removed = indicator.cleanup().await.unwrap();
        assert_eq!(removed, 2);

        // 20s old survives the sweep even though readers already ignore it
        // once it passes the short TTL.
        assert!(store.get(TYPING, "c1_u1").await.unwrap().is_some());
        assert!(store.get(TYPING, "c1_u2").await.unwrap().is_some());
        assert!(store.get(TYPING, "c1_u3").await.unwrap().is_none());
        assert!(store.get(TYPING, "c2_u4").await.unwrap().is_none());
    }
}
