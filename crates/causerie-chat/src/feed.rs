//! Cancellable snapshot subscription.
//!
//! A [`Feed`] is what every `subscribe`/`listen`/`watch` method hands back:
//! a background task maps each store snapshot through a component closure
//! and forwards it over a channel.  Dropping the feed aborts the task,
//! which drops the store listener with it — no further delivery, no
//! dangling timers.

use causerie_store::Watch;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A live sequence of full snapshots (never diffs).
pub struct Feed<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Feed<T> {
    /// Spawn the mapping task over a store watch.  The first delivery is
    /// the current state; every later one follows a store change.
    pub(crate) fn spawn<F>(mut watch: Watch, mut map: F) -> Self
    where
        F: FnMut(Vec<causerie_store::Document>) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            while let Some(docs) = watch.next().await {
                if tx.send(map(docs)).await.is_err() {
                    break;
                }
            }
        });
        Self { rx, task }
    }

    /// Next snapshot; `None` once the feed has been torn down.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
