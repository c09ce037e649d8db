//! In-process repository used by the test-suite and by local runs without a
//! database URL. It keeps one JSON tree, the same shape the realtime database
//! exposes, and bumps a version counter on every write.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use super::{CatalogRepository, RepositoryError, SnapshotStream, SubscriptionQuery};
use crate::catalog::model::{StoredVideo, VideoKey, VideoPatch};

#[derive(Clone)]
pub struct InMemoryRepository {
    inner: Arc<Inner>,
}

struct Inner {
    root: RwLock<Value>,
    version: watch::Sender<u64>,
    sequence: AtomicU64,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::with_value(Value::Object(Map::new()))
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(root: Value) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                root: RwLock::new(root),
                version,
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Overwrites the node at `path`.
    #[cfg(test)]
    pub async fn set_value(&self, path: &str, value: Value) {
        {
            let mut root = self.inner.root.write().await;
            *node_mut(&mut root, path) = value;
        }
        self.inner.bump();
    }

    fn next_key(&self) -> VideoKey {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        VideoKey::new(format!("-{:012}{}", sequence, &suffix[..8]))
    }
}

impl Inner {
    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    async fn read(&self, path: &str) -> Value {
        let root = self.root.read().await;
        root.pointer(&pointer(path)).cloned().unwrap_or(Value::Null)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn pointer(path: &str) -> String {
    segments(path).map(|s| format!("/{s}")).collect()
}

/// Walks to `path`, creating intermediate objects on the way.
fn node_mut<'a>(mut current: &'a mut Value, path: &str) -> &'a mut Value {
    for segment in segments(path) {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            other => other,
        };
    }
    current
}

fn child_path(path: &str, key: &VideoKey) -> String {
    format!("{}/{}", path.trim_end_matches('/'), key)
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    fn subscribe(&self, path: &str, query: SubscriptionQuery) -> SnapshotStream {
        let inner = self.inner.clone();
        let receiver = inner.version.subscribe();
        let path = path.to_string();

        futures::stream::unfold(
            (inner, receiver, path, query, true),
            |(inner, mut receiver, path, query, first)| async move {
                if !first && receiver.changed().await.is_err() {
                    return None;
                }
                receiver.borrow_and_update();
                let snapshot = query.apply(&inner.read(&path).await);
                Some((Ok(snapshot), (inner, receiver, path, query, false)))
            },
        )
        .boxed()
    }

    async fn create(&self, path: &str, record: &StoredVideo) -> Result<VideoKey, RepositoryError> {
        let value = serde_json::to_value(record)?;
        let key = self.next_key();
        {
            let mut root = self.inner.root.write().await;
            *node_mut(&mut root, &child_path(path, &key)) = value;
        }
        self.inner.bump();
        Ok(key)
    }

    async fn update(
        &self,
        path: &str,
        key: &VideoKey,
        patch: &VideoPatch,
    ) -> Result<(), RepositoryError> {
        let Value::Object(fields) = serde_json::to_value(patch)? else {
            return Ok(());
        };
        {
            let mut root = self.inner.root.write().await;
            let node = node_mut(&mut root, &child_path(path, key));
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(target) = node {
                for (field, value) in fields {
                    if value.is_null() {
                        target.remove(&field);
                    } else {
                        target.insert(field, value);
                    }
                }
            }
        }
        self.inner.bump();
        Ok(())
    }

    async fn delete(&self, path: &str, key: &VideoKey) -> Result<(), RepositoryError> {
        {
            let mut root = self.inner.root.write().await;
            if let Some(Value::Object(collection)) = root.pointer_mut(&pointer(path)) {
                collection.remove(key.as_str());
            }
        }
        self.inner.bump();
        Ok(())
    }

    async fn read_value(&self, path: &str) -> Result<Option<Value>, RepositoryError> {
        let value = self.inner.read(path).await;
        Ok((!value.is_null()).then_some(value))
    }
}
