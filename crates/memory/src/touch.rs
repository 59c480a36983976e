//! Best-effort access tracking off the request path.
//!
//! Callers enqueue memory IDs on a [`TouchQueue`]; a background task drains
//! the queue and calls [`LongTermMemoryStore::touch`]. Enqueueing never
//! blocks and never fails the caller: a full or closed queue drops the
//! notification with a warning, and touch errors are logged and discarded.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::long_term::LongTermMemoryStore;

/// Sending half of the touch queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TouchQueue {
    /// `None` for a detached queue.
    tx: Option<mpsc::Sender<String>>,
}

impl TouchQueue {
    /// Fire-and-forget. Returns `true` if the ID was queued.
    pub fn notify(&self, id: &str) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        match tx.try_send(id.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(id)) => {
                warn!(id = %id, "Touch queue full, dropping access notification");
                false
            }
            Err(TrySendError::Closed(id)) => {
                warn!(id = %id, "Touch worker stopped, dropping access notification");
                false
            }
        }
    }

    /// A queue with no worker behind it, for callers that do not track access.
    /// Notifications are discarded without logging.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_none()
    }
}

/// The background task that applies queued touches.
pub struct TouchWorker;

impl TouchWorker {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The task ends once every [`TouchQueue`] clone has been dropped and the
    /// queue is drained; the returned handle resolves to the number of
    /// successful touches.
    pub fn spawn(store: LongTermMemoryStore, capacity: usize) -> (TouchQueue, JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut applied = 0usize;
            while let Some(id) = rx.recv().await {
                match store.touch(&id).await {
                    Ok(true) => applied += 1,
                    Ok(false) => debug!(id = %id, "Touched memory no longer exists"),
                    Err(e) => warn!(id = %id, error = %e, "Failed to record memory access"),
                }
            }
            debug!(applied, "Touch worker stopped");
            applied
        });

        (TouchQueue { tx: Some(tx) }, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use recallkit_core::memory::NewMemory;
    use std::sync::Arc;

    #[tokio::test]
    async fn queued_touches_are_applied() {
        let ltm = LongTermMemoryStore::new(Arc::new(InMemoryStore::new()));
        let m = ltm.store(NewMemory::new("agent", "owner", "x")).await.unwrap();

        let (queue, handle) = TouchWorker::spawn(ltm.clone(), 8);
        assert!(queue.notify(&m.id));
        assert!(queue.notify(&m.id));
        assert!(queue.notify("missing"));
        drop(queue);

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(ltm.get(&m.id).await.unwrap().unwrap().access_count, 2);
    }

    #[tokio::test]
    async fn detached_queue_drops_silently() {
        let queue = TouchQueue::detached();
        assert!(queue.is_detached());
        assert!(!queue.notify("anything"));
        assert!(!queue.clone().notify("anything"));
    }

    #[tokio::test]
    async fn stopped_worker_is_not_detached() {
        let ltm = LongTermMemoryStore::new(Arc::new(InMemoryStore::new()));
        let (queue, handle) = TouchWorker::spawn(ltm, 1);
        assert!(!queue.is_detached());

        handle.abort();
        let _ = handle.await;
        assert!(!queue.notify("gone"));
    }
}
