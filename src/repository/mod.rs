//! Catalog repository adapters
//!
//! The catalog lives in an external document database. Everything the service
//! needs from it is expressed by [`CatalogRepository`]: full-snapshot
//! subscriptions plus key addressed create/update/delete.

pub mod firebase;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

use crate::catalog::model::{StoredVideo, VideoKey, VideoPatch, VideoRecord};

pub use firebase::FirebaseRepository;
pub use memory::InMemoryRepository;

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("repository request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("repository responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("repository payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid repository url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("subscription cancelled by the server: {0}")]
    Cancelled(String),

    #[error("subscription closed")]
    Closed,
}

/// One full replacement of a subscribed collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub records: Vec<VideoRecord>,
}

impl Snapshot {
    /// Decodes a collection node. The database returns an object keyed by
    /// record key, an array when the keys happen to be small integers, or
    /// `null` when the collection is empty. Entries that are not records are
    /// skipped.
    pub fn from_json(value: &Value) -> Self {
        let records = entries(value)
            .into_iter()
            .filter_map(|(key, raw)| decode_record(key, raw))
            .collect();
        Self { records }
    }

    /// The last `limit` records ordered ascending by the numeric `field`.
    /// Entries without the field sort first. Undecodable entries are dropped
    /// before the window is taken.
    pub fn ordered_window(value: &Value, field: &str, limit: usize) -> Self {
        let mut decoded: Vec<(Option<f64>, VideoRecord)> = entries(value)
            .into_iter()
            .filter_map(|(key, raw)| {
                let order = raw.get(field).and_then(Value::as_f64);
                decode_record(key, raw).map(|record| (order, record))
            })
            .collect();
        decoded.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let skip = decoded.len().saturating_sub(limit);
        let records = decoded.into_iter().skip(skip).map(|(_, record)| record).collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn entries(value: &Value) -> Vec<(String, &Value)> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_record(key: String, raw: &Value) -> Option<VideoRecord> {
    match serde_json::from_value::<StoredVideo>(raw.clone()) {
        Ok(stored) => Some(VideoRecord::from_stored(VideoKey::new(key), stored)),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Skipping undecodable catalog entry");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionQuery {
    All,
    Ordered { order_field: String, limit: usize },
}

impl SubscriptionQuery {
    pub fn ordered(order_field: impl Into<String>, limit: usize) -> Self {
        SubscriptionQuery::Ordered {
            order_field: order_field.into(),
            limit,
        }
    }

    /// Projects a full collection node onto this query.
    pub fn apply(&self, value: &Value) -> Snapshot {
        match self {
            SubscriptionQuery::All => Snapshot::from_json(value),
            SubscriptionQuery::Ordered { order_field, limit } => {
                Snapshot::ordered_window(value, order_field, *limit)
            }
        }
    }
}

pub type SnapshotStream = BoxStream<'static, Result<Snapshot, RepositoryError>>;

pub type SharedRepository = Arc<dyn CatalogRepository>;

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Every item is a full replacement of the subscribed set. Errors are
    /// yielded in-band and the stream keeps going.
    fn subscribe(&self, path: &str, query: SubscriptionQuery) -> SnapshotStream;

    fn subscribe_all(&self, path: &str) -> SnapshotStream {
        self.subscribe(path, SubscriptionQuery::All)
    }

    fn subscribe_ordered(&self, path: &str, order_field: &str, limit: usize) -> SnapshotStream {
        self.subscribe(path, SubscriptionQuery::ordered(order_field, limit))
    }

    async fn create(&self, path: &str, record: &StoredVideo) -> Result<VideoKey, RepositoryError>;

    async fn update(
        &self,
        path: &str,
        key: &VideoKey,
        patch: &VideoPatch,
    ) -> Result<(), RepositoryError>;

    async fn delete(&self, path: &str, key: &VideoKey) -> Result<(), RepositoryError>;

    /// Single read of an arbitrary node. `None` when the node is absent.
    async fn read_value(&self, path: &str) -> Result<Option<Value>, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_keyed_objects_and_skips_garbage() {
        let value = json!({
            "-a": { "title": "A", "type": "Movie", "link": "https://youtu.be/a" },
            "-b": "not a record",
            "-c": { "title": "C", "language": "Korean" }
        });
        let snapshot = Snapshot::from_json(&value);
        let keys: Vec<&str> = snapshot.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["-a", "-c"]);
        assert_eq!(snapshot.records[0].link, "https://www.youtube.com/embed/a");
    }

    #[test]
    fn decodes_arrays_with_index_keys() {
        let value = json!([null, { "title": "one" }, { "title": "two" }]);
        let snapshot = Snapshot::from_json(&value);
        let keys: Vec<&str> = snapshot.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2"]);
        assert!(Snapshot::from_json(&Value::Null).is_empty());
    }

    #[test]
    fn ordered_window_keeps_most_recent_ascending() {
        let value = json!({
            "-a": { "title": "a", "createdAt": 30 },
            "-b": { "title": "b" },
            "-c": { "title": "c", "createdAt": 10 },
            "-d": { "title": "d", "createdAt": 20 }
        });
        let window = SubscriptionQuery::ordered("createdAt", 2).apply(&value);
        let keys: Vec<&str> = window.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["-d", "-a"]);

        let all = Snapshot::ordered_window(&value, "createdAt", 10);
        assert_eq!(all.records[0].key.as_str(), "-b");
    }

    #[test]
    fn ordered_window_is_filled_past_undecodable_entries() {
        let value = json!({
            "-a": { "title": "a", "createdAt": 10 },
            "-b": { "title": "b", "createdAt": 20 },
            "-c": { "title": 7, "createdAt": 30 }
        });
        let window = Snapshot::ordered_window(&value, "createdAt", 2);
        let keys: Vec<&str> = window.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["-a", "-b"]);
    }
}
