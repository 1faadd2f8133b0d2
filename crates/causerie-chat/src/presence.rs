//! Heartbeat presence.
//!
//! Each started identity rewrites `{isOnline: true, lastSeen: now}` on a
//! fixed cadence; readers trust a record only while it is fresh, because a
//! process that dies never gets to write its own `offline`.  Operator
//! sessions all publish under the fixed `operator` key so clients can find
//! the record without knowing a session id.
//!
//! Presence never hard-fails the caller: when the store is unreachable the
//! write lands in a process-local slot and reads fall back to it.  That is
//! an explicitly degraded mode, not an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use causerie_shared::constants::PRESENCE;
use causerie_shared::{PresenceRecord, Role, UserId};
use causerie_store::{DocumentStore, Filter};

use crate::config::ChatConfig;
use crate::error::Result;
use crate::feed::Feed;

/// What a peer's record means right now.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceStatus {
    pub online: bool,
    pub text: String,
}

struct Heartbeat {
    key: String,
    role: Role,
    handle: JoinHandle<()>,
}

type LocalCache = Arc<Mutex<HashMap<String, PresenceRecord>>>;

/// Publishes this session's heartbeat and resolves peers' status.
pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
    config: ChatConfig,
    heartbeats: Mutex<HashMap<String, Heartbeat>>,
    local: LocalCache,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DocumentStore>, config: ChatConfig) -> Self {
        Self {
            store,
            config,
            heartbeats: Mutex::new(HashMap::new()),
            local: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Go online and start the heartbeat.  Restarting an already-started
    /// identity replaces its heartbeat task.
    pub async fn start(&self, identity: &UserId, role: Role) {
        let key = self.presence_key(identity, role);
        write_record(&self.store, &self.local, &key, online_record(&key, role)).await;

        let store = Arc::clone(&self.store);
        let local = Arc::clone(&self.local);
        let beat_key = key.clone();
        let period = self.config.heartbeat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial write above
            // already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                write_record(&store, &local, &beat_key, online_record(&beat_key, role)).await;
            }
        });

        let replaced = lock(&self.heartbeats).insert(
            identity.to_string(),
            Heartbeat { key, role, handle },
        );
        if let Some(old) = replaced {
            old.handle.abort();
        }
        debug!(identity = %identity.short(), ?role, "Presence started");
    }

    /// Go offline and cancel the heartbeat.  Idempotent: stopping twice or
    /// stopping a never-started identity is a no-op.
    pub async fn stop(&self, identity: &UserId) {
        let Some(heartbeat) = lock(&self.heartbeats).remove(identity.as_str()) else {
            return;
        };
        heartbeat.handle.abort();
        let record = offline_record(&heartbeat.key, heartbeat.role);
        write_record(&self.store, &self.local, &heartbeat.key, record).await;
        debug!(identity = %identity.short(), "Presence stopped");
    }

    /// Immediate transition on session visibility changes, independent of
    /// the heartbeat cadence.  This bounds staleness to the time the
    /// session spends hidden instead of a full heartbeat interval.
    pub async fn set_visible(&self, identity: &UserId, visible: bool) {
        let Some((key, role)) = lock(&self.heartbeats)
            .get(identity.as_str())
            .map(|h| (h.key.clone(), h.role))
        else {
            debug!(identity = %identity.short(), "Visibility change for untracked identity ignored");
            return;
        };
        let record = if visible {
            online_record(&key, role)
        } else {
            offline_record(&key, role)
        };
        write_record(&self.store, &self.local, &key, record).await;
    }

    /// One peer's current record, if any.  Store failures fall back to the
    /// local slot.
    pub async fn fetch(&self, identity: &UserId) -> Option<PresenceRecord> {
        match self.store.get(PRESENCE, identity.as_str()).await {
            Ok(Some(doc)) => match PresenceRecord::from_value(&doc.fields) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(identity = %identity.short(), error = %e, "Skipping malformed presence record");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Presence read failed, using local cache");
                lock(&self.local).get(identity.as_str()).cloned()
            }
        }
    }

    /// Live stream of one peer's record.
    pub async fn watch(&self, identity: &UserId) -> Result<Feed<Option<PresenceRecord>>> {
        let watch = self
            .store
            .watch(PRESENCE, Filter::field_eq("identity", json!(identity.as_str())))
            .await?;
        Ok(Feed::spawn(watch, |docs| {
            docs.first()
                .and_then(|d| PresenceRecord::from_value(&d.fields).ok())
        }))
    }

    /// Interpret a record at time `now`.
    ///
    /// Online requires both the stored flag and freshness within the
    /// cutoff — a process that died without running `stop` leaves
    /// `isOnline: true` behind, and only the timestamp tells the truth.
    pub fn compute_status(&self, record: &PresenceRecord, now: DateTime<Utc>) -> PresenceStatus {
        let age_secs = (now - record.last_seen).num_seconds();
        let online = record.is_online && age_secs < self.config.online_cutoff_secs;

        let text = if online {
            "en ligne".to_string()
        } else if age_secs < 300 {
            "à l'instant".to_string()
        } else if age_secs < 3_600 {
            format!("il y a {} min", age_secs / 60)
        } else if age_secs < 86_400 {
            format!("il y a {} h", age_secs / 3_600)
        } else {
            record.last_seen.format("%d/%m/%Y").to_string()
        };

        PresenceStatus { online, text }
    }

    fn presence_key(&self, identity: &UserId, role: Role) -> String {
        match role {
            Role::Operator => self.config.operator_id.to_string(),
            Role::Client => identity.to_string(),
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        for heartbeat in lock(&self.heartbeats).values() {
            heartbeat.handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn online_record(key: &str, role: Role) -> PresenceRecord {
    PresenceRecord {
        identity: UserId::new(key),
        is_online: true,
        last_seen: Utc::now(),
        role,
    }
}

fn offline_record(key: &str, role: Role) -> PresenceRecord {
    PresenceRecord {
        identity: UserId::new(key),
        is_online: false,
        last_seen: Utc::now(),
        role,
    }
}

/// Write a record, degrading to the local slot when the store is down.
/// The slot always mirrors the latest write so a later outage still has
/// something to serve.
async fn write_record(
    store: &Arc<dyn DocumentStore>,
    local: &LocalCache,
    key: &str,
    record: PresenceRecord,
) {
    match serde_json::to_value(&record) {
        Ok(fields) => {
            if let Err(e) = store.put(PRESENCE, key, fields).await {
                warn!(identity = %record.identity.short(), error = %e, "Presence write failed, keeping local copy");
            }
        }
        Err(e) => warn!(error = %e, "Presence record did not serialize"),
    }
    lock(local).insert(key.to_string(), record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_store::MemoryStore;
    use chrono::Duration;

    fn tracker() -> (Arc<MemoryStore>, PresenceTracker) {
        let store = Arc::new(MemoryStore::new());
        let tracker = PresenceTracker::new(store.clone(), ChatConfig::default());
        (store, tracker)
    }

    fn record(is_online: bool, age_secs: i64, now: DateTime<Utc>) -> PresenceRecord {
        PresenceRecord {
            identity: UserId::new("u1"),
            is_online,
            last_seen: now - Duration::seconds(age_secs),
            role: Role::Client,
        }
    }

    #[test]
    fn test_online_within_cutoff() {
        let (_, tracker) = tracker();
        let now = Utc::now();
        assert!(tracker.compute_status(&record(true, 119, now), now).online);
        assert!(!tracker.compute_status(&record(true, 121, now), now).online);
    }

    #[test]
    fn test_stored_flag_never_overrides_staleness() {
        let (_, tracker) = tracker();
        let now = Utc::now();
        // The writer died without running stop; the flag lies.
        let status = tracker.compute_status(&record(true, 600, now), now);
        assert!(!status.online);
        // And an explicit offline is offline even when fresh.
        assert!(!tracker.compute_status(&record(false, 5, now), now).online);
    }

    #[test]
    fn test_staleness_buckets() {
        let (_, tracker) = tracker();
        let now = Utc::now();
        assert_eq!(tracker.compute_status(&record(false, 60, now), now).text, "à l'instant");
        assert_eq!(
            tracker.compute_status(&record(false, 720, now), now).text,
            "il y a 12 min"
        );
        assert_eq!(
            tracker.compute_status(&record(false, 7_200, now), now).text,
            "il y a 2 h"
        );
        let old = record(false, 3 * 86_400, now);
        assert_eq!(
            tracker.compute_status(&old, now).text,
            old.last_seen.format("%d/%m/%Y").to_string()
        );
    }

    #[tokio::test]
    async fn test_start_and_stop_write_records() {
        let (store, tracker) = tracker();
        let alice = UserId::new("u1");

        tracker.start(&alice, Role::Client).await;
        let doc = store.get(PRESENCE, "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["isOnline"], json!(true));

        tracker.stop(&alice).await;
        let doc = store.get(PRESENCE, "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["isOnline"], json!(false));

        // Idempotent.
        tracker.stop(&alice).await;
    }

    #[tokio::test]
    async fn test_operator_sessions_share_the_fixed_key() {
        let (store, tracker) = tracker();
        let session = UserId::new("op-session-7f2");

        tracker.start(&session, Role::Operator).await;
        let doc = store.get(PRESENCE, "operator").await.unwrap().unwrap();
        assert_eq!(doc.fields["identity"], json!("operator"));
        assert_eq!(doc.fields["role"], json!("operator"));
        assert!(store.get(PRESENCE, "op-session-7f2").await.unwrap().is_none());

        tracker.stop(&session).await;
    }

    #[tokio::test]
    async fn test_visibility_transitions_write_immediately() {
        let (store, tracker) = tracker();
        let alice = UserId::new("u1");
        tracker.start(&alice, Role::Client).await;

        tracker.set_visible(&alice, false).await;
        let doc = store.get(PRESENCE, "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["isOnline"], json!(false));

        tracker.set_visible(&alice, true).await;
        let doc = store.get(PRESENCE, "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["isOnline"], json!(true));

        // Untracked identities are ignored rather than guessed at.
        tracker.set_visible(&UserId::new("stranger"), false).await;
        assert!(store.get(PRESENCE, "stranger").await.unwrap().is_none());

        tracker.stop(&alice).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_rewrites_last_seen() {
        let (store, tracker) = tracker();
        let alice = UserId::new("u1");
        tracker.start(&alice, Role::Client).await;

        let first = store.get(PRESENCE, "u1").await.unwrap().unwrap();

        // Paused-clock runtime: sleeping auto-advances through the
        // heartbeat deadline and lets the beat task run its write.
        tokio::time::sleep(std::time::Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        let second = store.get(PRESENCE, "u1").await.unwrap().unwrap();
        assert_eq!(second.fields["isOnline"], json!(true));
        assert_ne!(first.fields["lastSeen"], second.fields["lastSeen"]);

        tracker.stop(&alice).await;
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_local_cache() {
        let (store, tracker) = tracker();
        let alice = UserId::new("u1");

        store.set_unreachable(true);
        tracker.start(&alice, Role::Client).await;

        // Nothing persisted, but the local slot answers.
        let cached = tracker.fetch(&alice).await.expect("local fallback");
        assert!(cached.is_online);

        store.set_unreachable(false);
        assert!(store.get(PRESENCE, "u1").await.unwrap().is_none());

        tracker.stop(&alice).await;
    }
}
