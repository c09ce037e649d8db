//! Process-wide catalog cache.
//!
//! One [`CatalogCache`] exists per subscription query. The repository
//! subscription (the pump) is started when the first [`CatalogHandle`]
//! attaches and aborted when the last one is dropped. The latest snapshot is
//! published through a `watch` channel, so readers always see one complete
//! snapshot and never a partial update.

use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::repository::{SharedRepository, Snapshot, SubscriptionQuery};

#[derive(Debug, Clone, Default)]
pub struct CachedSnapshot {
    /// Bumped once per published snapshot. Zero until the first one arrives.
    pub version: u64,
    pub snapshot: Arc<Snapshot>,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct CatalogCache {
    shared: Arc<Shared>,
}

struct Shared {
    repository: SharedRepository,
    path: String,
    query: SubscriptionQuery,
    sender: watch::Sender<CachedSnapshot>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    subscribers: usize,
    pump: Option<JoinHandle<()>>,
}

impl CatalogCache {
    pub fn new(
        repository: SharedRepository,
        path: impl Into<String>,
        query: SubscriptionQuery,
    ) -> Self {
        let (sender, _) = watch::channel(CachedSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                repository,
                path: path.into(),
                query,
                sender,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Attaches a reader. Must be called inside a tokio runtime.
    pub fn subscribe(&self) -> CatalogHandle {
        let receiver = self.shared.sender.subscribe();
        self.shared.attach();
        CatalogHandle {
            shared: self.shared.clone(),
            receiver,
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.shared.lifecycle().pump.is_some()
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.shared.lifecycle().subscribers
    }
}

impl Shared {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn attach(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle();
        lifecycle.subscribers += 1;
        if lifecycle.pump.is_none() {
            tracing::info!(path = %self.path, query = ?self.query, "Starting catalog subscription");
            lifecycle.pump = Some(tokio::spawn(pump(self.clone())));
        }
    }

    fn detach(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.subscribers = lifecycle.subscribers.saturating_sub(1);
        if lifecycle.subscribers == 0 {
            if let Some(pump) = lifecycle.pump.take() {
                tracing::info!(
                    path = %self.path,
                    query = ?self.query,
                    "Stopping catalog subscription"
                );
                pump.abort();
            }
        }
    }
}

async fn pump(shared: Arc<Shared>) {
    let mut stream = shared
        .repository
        .subscribe(&shared.path, shared.query.clone());

    while let Some(item) = stream.next().await {
        match item {
            Ok(snapshot) => {
                tracing::debug!(
                    path = %shared.path,
                    records = snapshot.len(),
                    "Catalog snapshot received"
                );
                let snapshot = Arc::new(snapshot);
                shared.sender.send_modify(|cached| {
                    cached.version += 1;
                    cached.snapshot = snapshot;
                    cached.last_error = None;
                });
            }
            Err(err) => {
                tracing::warn!(
                    path = %shared.path,
                    error = %err,
                    "Catalog subscription error, keeping last snapshot"
                );
                let message = err.to_string();
                shared
                    .sender
                    .send_modify(|cached| cached.last_error = Some(message));
            }
        }
    }

    tracing::warn!(path = %shared.path, "Catalog subscription ended");
}

/// A reader attached to a [`CatalogCache`]. Cloning attaches another reader.
pub struct CatalogHandle {
    shared: Arc<Shared>,
    receiver: watch::Receiver<CachedSnapshot>,
}

impl CatalogHandle {
    /// The current snapshot. Cheap: clones an `Arc`.
    pub fn current(&self) -> Arc<Snapshot> {
        self.receiver.borrow().snapshot.clone()
    }

    pub fn state(&self) -> CachedSnapshot {
        self.receiver.borrow().clone()
    }

    /// Resolves on the next publish after the last one this handle observed.
    pub async fn changed(&mut self) -> CachedSnapshot {
        if self.receiver.changed().await.is_err() {
            // the sender lives as long as `shared`, which we hold
            std::future::pending::<()>().await;
        }
        self.receiver.borrow_and_update().clone()
    }

    /// Waits until a snapshot with at least version `version` is published.
    pub async fn wait_for_version(&mut self, version: u64) -> CachedSnapshot {
        let seen = match self.receiver.wait_for(|cached| cached.version >= version).await {
            Ok(cached) => Some((*cached).clone()),
            Err(_) => None,
        };
        seen.unwrap_or_else(|| self.state())
    }
}

impl Clone for CatalogHandle {
    fn clone(&self) -> Self {
        self.shared.attach();
        Self {
            shared: self.shared.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl Drop for CatalogHandle {
    fn drop(&mut self) {
        self.shared.detach();
    }
}
