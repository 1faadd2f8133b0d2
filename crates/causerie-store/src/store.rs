//! The [`DocumentStore`] contract and the snapshot-listener handle.
//!
//! Every method is a potential suspension point.  [`Watch`] is the push
//! subscription: it yields the full current result set first, then again
//! after every change that affects the watched query, and deregisters
//! itself when dropped.

use std::any::Any;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::document::{Document, Filter};
use crate::error::Result;

/// Closure applied under the store's single-document atomicity guarantee.
/// Receives the current fields (`None` if the document does not exist) and
/// returns the new fields, or `None` to delete.
pub type MutateFn = Box<dyn FnOnce(Option<Value>) -> Option<Value> + Send>;

/// The backing document store, injected into every service object.
///
/// Implementations must be safe under concurrent calls from multiple tasks
/// and, for shared backends, multiple processes.  The store is the single
/// source of truth; in-process caches above it are optimizations only.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document by id.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Create or overwrite a document.
    async fn put(&self, collection: &str, id: &str, fields: Value) -> Result<()>;

    /// Create a document under a fresh store-assigned id.
    async fn insert(&self, collection: &str, fields: Value) -> Result<String>;

    /// Atomic single-document read-modify-write.  Returns the document as it
    /// stands after the operation (`None` if the closure deleted it).
    async fn mutate(&self, collection: &str, id: &str, op: MutateFn) -> Result<Option<Document>>;

    /// Delete a document.  Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// All documents in a collection matching the filter.
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Subscribe to a query.  The returned [`Watch`] immediately holds the
    /// current result set and is updated after every relevant change.
    async fn watch(&self, collection: &str, filter: Filter) -> Result<Watch>;
}

/// Handle for one snapshot subscription.
///
/// Dropping the handle deregisters the listener; no further snapshots are
/// computed for it and no timers or tasks linger.
pub struct Watch {
    rx: watch::Receiver<Vec<Document>>,
    first: bool,
    // Deregistration token; its Drop impl detaches the listener.
    _guard: Box<dyn Any + Send>,
}

impl Watch {
    pub fn new(rx: watch::Receiver<Vec<Document>>, guard: Box<dyn Any + Send>) -> Self {
        Self {
            rx,
            first: true,
            _guard: guard,
        }
    }

    /// Next snapshot: the current result set on the first call, then one per
    /// change.  `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        if self.first {
            self.first = false;
            return Some(self.rx.borrow_and_update().clone());
        }
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// The current result set without waiting.
    pub fn snapshot(&self) -> Vec<Document> {
        self.rx.borrow().clone()
    }
}
