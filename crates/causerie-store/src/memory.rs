//! In-memory [`DocumentStore`] implementation.
//!
//! Backs the test suite and degraded local operation.  All state lives under
//! one mutex; snapshot listeners are re-evaluated after every mutation of
//! the collection they watch and only notified when their result set
//! actually changed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::document::{Document, Filter};
use crate::error::{Result, StoreError};
use crate::store::{DocumentStore, MutateFn, Watch};

/// Process-local document store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    collections: HashMap<String, BTreeMap<String, Value>>,
    listeners: Vec<Listener>,
    next_listener_id: u64,
    unreachable: bool,
}

struct Listener {
    id: u64,
    collection: String,
    filter: Filter,
    tx: watch::Sender<Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                collections: HashMap::new(),
                listeners: Vec::new(),
                next_listener_id: 0,
                unreachable: false,
            })),
        }
    }

    /// Simulate a store outage.  While unreachable, every operation fails
    /// with [`StoreError::Unavailable`]; existing watches stay registered
    /// and resume on recovery.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a writer panicked mid-update; the data is
        // plain maps, so continuing with the inner state is sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn guard_online(inner: &Inner) -> Result<()> {
    if inner.unreachable {
        Err(StoreError::Unavailable("simulated outage".into()))
    } else {
        Ok(())
    }
}

fn query_collection(
    collections: &HashMap<String, BTreeMap<String, Value>>,
    collection: &str,
    filter: &Filter,
) -> Vec<Document> {
    collections
        .get(collection)
        .map(|docs| {
            docs.iter()
                .filter(|(_, fields)| filter.matches(fields))
                .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Re-evaluate every listener on `collection` and push changed result sets.
fn notify(inner: &mut Inner, collection: &str) {
    let snapshots: Vec<(usize, Vec<Document>)> = inner
        .listeners
        .iter()
        .enumerate()
        .filter(|(_, l)| l.collection == collection)
        .map(|(i, l)| (i, query_collection(&inner.collections, collection, &l.filter)))
        .collect();

    for (i, docs) in snapshots {
        inner.listeners[i].tx.send_if_modified(|current| {
            if *current != docs {
                *current = docs;
                true
            } else {
                false
            }
        });
    }
}

/// Deregisters one listener when the owning [`Watch`] is dropped.
struct WatchGuard {
    inner: Weak<Mutex<Inner>>,
    id: u64,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Ok(mut guard) = inner.lock() {
                guard.listeners.retain(|l| l.id != self.id);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.lock();
        guard_online(&inner)?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn put(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        let mut inner = self.lock();
        guard_online(&inner)?;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        notify(&mut inner, collection);
        Ok(())
    }

    async fn insert(&self, collection: &str, fields: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.put(collection, &id, fields).await?;
        Ok(id)
    }

    async fn mutate(&self, collection: &str, id: &str, op: MutateFn) -> Result<Option<Document>> {
        let mut inner = self.lock();
        guard_online(&inner)?;
        let docs = inner.collections.entry(collection.to_string()).or_default();
        let current = docs.get(id).cloned();
        let result = match op(current) {
            Some(fields) => {
                docs.insert(id.to_string(), fields.clone());
                Some(Document::new(id, fields))
            }
            None => {
                docs.remove(id);
                None
            }
        };
        notify(&mut inner, collection);
        Ok(result)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut inner = self.lock();
        guard_online(&inner)?;
        let removed = inner
            .collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false);
        if removed {
            notify(&mut inner, collection);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let inner = self.lock();
        guard_online(&inner)?;
        Ok(query_collection(&inner.collections, collection, filter))
    }

    async fn watch(&self, collection: &str, filter: Filter) -> Result<Watch> {
        let mut inner = self.lock();
        guard_online(&inner)?;

        let initial = query_collection(&inner.collections, collection, &filter);
        let (tx, rx) = watch::channel(initial);

        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push(Listener {
            id,
            collection: collection.to_string(),
            filter,
            tx,
        });
        debug!(collection, listener = id, "Registered snapshot listener");

        let guard = WatchGuard {
            inner: Arc::downgrade(&self.inner),
            id,
        };
        Ok(Watch::new(rx, Box::new(guard)))
    }
}
