//! sawtooth-kvstore - the key-value store interface the fetch core consumes
//! plus an in-memory implementation.
//!
//! The store's own on-disk format and internals are explicitly out of scope
//!; only `multiGet`'s shape is specified here.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sawtooth_core::{GetRequest, GetResponse, TimedValue};

/// `multiGet(Seq<GetRequest>) -> Future<Seq<GetResponse>>`.
///
/// Returns all stored values for a key whose `millis >= after_millis` (if
/// set), else all values. Ordering of returned values is unspecified; callers
/// (the sawtooth aggregator) must not depend on it.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn multi_get(&self, requests: Vec<GetRequest>) -> Vec<GetResponse>;
}

/// In-memory `KvStore` for local development, demos, and tests. Keyed by
/// `(dataset, key_bytes)`, storing every value ever written so callers can
/// exercise "multiple physically retained versions, select max millis"
///.
#[derive(Default)]
pub struct InMemoryKvStore {
    rows: RwLock<HashMap<(String, Vec<u8>), Vec<TimedValue>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stored value for `(dataset, key_bytes)`. Used by seeding
    /// code and tests; a real store's write path is out of scope.
    pub fn put(&self, dataset: &str, key_bytes: Vec<u8>, value: TimedValue) {
        self.rows
            .write()
            .entry((dataset.to_string(), key_bytes))
            .or_default()
            .push(value);
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn multi_get(&self, requests: Vec<GetRequest>) -> Vec<GetResponse> {
        let rows = self.rows.read();
        requests
            .into_iter()
            .map(|request| {
                let key = (request.dataset.clone(), request.key_bytes.clone());
                let values = rows
                    .get(&key)
                    .map(|stored| {
                        stored
                            .iter()
                            .filter(|v| match request.after_millis {
                                Some(after) => v.millis >= after,
                                None => true,
                            })
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                GetResponse {
                    request,
                    values: Ok(values),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multi_get_filters_by_after_millis() {
        let store = InMemoryKvStore::new();
        store.put(
            "X_STREAMING",
            b"k".to_vec(),
            TimedValue {
                bytes: b"old".to_vec(),
                millis: 100,
            },
        );
        store.put(
            "X_STREAMING",
            b"k".to_vec(),
            TimedValue {
                bytes: b"new".to_vec(),
                millis: 200,
            },
        );

        let responses = store
            .multi_get(vec![GetRequest {
                key_bytes: b"k".to_vec(),
                dataset: "X_STREAMING".to_string(),
                after_millis: Some(150),
            }])
            .await;

        let values = responses[0].values.as_ref().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].bytes, b"new");
    }

    #[tokio::test]
    async fn missing_key_returns_empty_not_error() {
        let store = InMemoryKvStore::new();
        let responses = store
            .multi_get(vec![GetRequest {
                key_bytes: b"absent".to_vec(),
                dataset: "X_BATCH".to_string(),
                after_millis: None,
            }])
            .await;
        assert_eq!(responses[0].values.as_ref().unwrap().len(), 0);
    }
}
