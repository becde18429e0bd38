//! sawtooth-fetch - Group-By Fetcher, Join Planner and Logging Sampler: the
//! request-driven orchestration layer tying the cache, codecs, key-value
//! store and aggregator together.

pub mod group_by;
pub mod join;
pub mod sampler;

pub use group_by::GroupByFetcher;
pub use join::{JoinConfigLoader, JoinPart, JoinPlanner, JoinSpec};
pub use sampler::{is_sampled, JoinCodec, LogSink, LoggableResponse, LoggingSampler};

#[cfg(test)]
mod scenario_tests {
    //! Scenario tests exercised end-to-end through `GroupByFetcher` against
    //! the in-memory `KvStore`.

    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use sawtooth_cache::{MetadataLoader, ServingInfoCache};
    use sawtooth_core::{
        Accuracy, AggFunc, AggregationSpec, BatchIr, DataModel, FeatureValue, FetchError,
        FieldType, JsonCodec, Partial, Request, Schema, ServingInfo,
    };
    use sawtooth_kvstore::InMemoryKvStore;

    use crate::GroupByFetcher;

    fn schema() -> Schema {
        vec![("user".to_string(), FieldType::String)]
    }

    fn key_bytes(user: &str) -> Vec<u8> {
        let mut keys = sawtooth_core::ValueMap::new();
        keys.insert("user".to_string(), FeatureValue::Str(user.to_string()));
        JsonCodec.encode_key(&keys, &schema()).unwrap()
    }

    struct FixedLoader(ServingInfo);

    #[async_trait]
    impl MetadataLoader for FixedLoader {
        async fn load(&self, _name: &str) -> Result<ServingInfo, FetchError> {
            Ok(self.0.clone())
        }
    }

    fn no_agg_info(batch_end_millis: i64) -> ServingInfo {
        ServingInfo {
            name: "user_profile".to_string(),
            key_schema: schema(),
            output_columns: vec!["plan".to_string()],
            accuracy: Accuracy::Snapshot,
            data_model: DataModel::Events,
            aggregations: None,
            batch_end_millis,
            codec: Arc::new(JsonCodec),
        }
    }

    // S1 (no-agg): batch value newer than batchEndMillis, no aggregations
    // configured -> response is the decoded batch value as-is.
    #[tokio::test]
    async fn s1_no_agg_returns_decoded_batch_value() {
        let info = no_agg_info(1600);
        let store = Arc::new(InMemoryKvStore::new());
        let mut values = sawtooth_core::ValueMap::new();
        values.insert("plan".to_string(), FeatureValue::Str("gold".to_string()));
        store.put(
            "USER_PROFILE_BATCH",
            key_bytes("u1"),
            sawtooth_core::TimedValue { bytes: sawtooth_core::codec::encode_value_map(&values), millis: 1700 },
        );

        let cache = Arc::new(ServingInfoCache::new(FixedLoader(info), Duration::from_secs(60)));
        let fetcher = GroupByFetcher::new(cache, store, 4, Duration::from_secs(10));
        let responses = fetcher
            .fetch(vec![Request {
                name: "user_profile".to_string(),
                keys: {
                    let mut m = sawtooth_core::ValueMap::new();
                    m.insert("user".to_string(), FeatureValue::Str("u1".to_string()));
                    m
                },
                at_millis: None,
            }])
            .await;

        let outcome = responses[0].outcome.as_ref().unwrap();
        assert_eq!(outcome.get("plan"), Some(&FeatureValue::Str("gold".to_string())));
    }

    fn temporal_info(batch_end_millis: i64) -> ServingInfo {
        ServingInfo {
            name: "purchases_sum".to_string(),
            key_schema: schema(),
            output_columns: vec!["count".to_string()],
            accuracy: Accuracy::Temporal,
            data_model: DataModel::Entities,
            aggregations: Some(vec![AggregationSpec {
                output_name: "count".to_string(),
                func: AggFunc::Count,
                window: None,
            }]),
            batch_end_millis,
            codec: Arc::new(JsonCodec),
        }
    }

    // S3 (temporal, empty stream): no streaming rows -> batch snapshot
    // finalized at Q, unchanged.
    #[tokio::test]
    async fn s3_temporal_empty_stream_returns_batch_snapshot() {
        let info = temporal_info(2000);
        let store = Arc::new(InMemoryKvStore::new());
        let ir = BatchIr { collapsed: vec![Partial::Count(10)], tail_hops: vec![vec![]] };
        store.put(
            "PURCHASES_SUM_BATCH",
            key_bytes("u1"),
            sawtooth_core::TimedValue { bytes: sawtooth_core::codec::encode_ir(&ir), millis: 2000 },
        );

        let cache = Arc::new(ServingInfoCache::new(FixedLoader(info), Duration::from_secs(60)));
        let fetcher = GroupByFetcher::new(cache, store, 4, Duration::from_secs(10));
        let responses = fetcher
            .fetch(vec![Request {
                name: "purchases_sum".to_string(),
                keys: {
                    let mut m = sawtooth_core::ValueMap::new();
                    m.insert("user".to_string(), FeatureValue::Str("u1".to_string()));
                    m
                },
                at_millis: Some(2500),
            }])
            .await;

        let outcome = responses[0].outcome.as_ref().unwrap();
        assert_eq!(outcome.get("count"), Some(&FeatureValue::Int(10)));
    }

    // S4 (temporal, with mutation): after-image insert then before-image
    // delete net to zero count change.
    #[tokio::test]
    async fn s4_temporal_mutation_nets_to_same_count() {
        let info = temporal_info(2000);
        let store = Arc::new(InMemoryKvStore::new());
        let ir = BatchIr { collapsed: vec![Partial::Count(10)], tail_hops: vec![vec![]] };
        store.put(
            "PURCHASES_SUM_BATCH",
            key_bytes("u1"),
            sawtooth_core::TimedValue { bytes: sawtooth_core::codec::encode_ir(&ir), millis: 2000 },
        );
        store.put(
            "PURCHASES_SUM_STREAMING",
            key_bytes("u1"),
            sawtooth_core::TimedValue {
                bytes: sawtooth_core::codec::encode_streaming_row(&sawtooth_core::ValueMap::new(), false),
                millis: 2100,
            },
        );
        store.put(
            "PURCHASES_SUM_STREAMING",
            key_bytes("u1"),
            sawtooth_core::TimedValue {
                bytes: sawtooth_core::codec::encode_streaming_row(&sawtooth_core::ValueMap::new(), true),
                millis: 2300,
            },
        );

        let cache = Arc::new(ServingInfoCache::new(FixedLoader(info), Duration::from_secs(60)));
        let fetcher = GroupByFetcher::new(cache, store, 4, Duration::from_secs(10));
        let responses = fetcher
            .fetch(vec![Request {
                name: "purchases_sum".to_string(),
                keys: {
                    let mut m = sawtooth_core::ValueMap::new();
                    m.insert("user".to_string(), FeatureValue::Str("u1".to_string()));
                    m
                },
                at_millis: Some(2500),
            }])
            .await;

        let outcome = responses[0].outcome.as_ref().unwrap();
        assert_eq!(outcome.get("count"), Some(&FeatureValue::Int(10)));
    }

    // S5 (stale batch): cached batchEndMillis behind the observed batch
    // value's millis -> forced refresh is triggered before responding.
    #[tokio::test]
    async fn s5_stale_batch_triggers_forced_refresh() {
        struct CountingStaleLoader {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl MetadataLoader for CountingStaleLoader {
            async fn load(&self, _name: &str) -> Result<ServingInfo, FetchError> {
                let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                // First load (cache miss) returns the stale serving-info;
                // the forced refresh (second load) returns the fresh one.
                Ok(no_agg_info(if n == 0 { 1500 } else { 1800 }))
            }
        }

        let loader = CountingStaleLoader { calls: AtomicUsize::new(0) };
        let store = Arc::new(InMemoryKvStore::new());
        let mut values = sawtooth_core::ValueMap::new();
        values.insert("plan".to_string(), FeatureValue::Str("silver".to_string()));
        store.put(
            "USER_PROFILE_BATCH",
            key_bytes("u1"),
            sawtooth_core::TimedValue { bytes: sawtooth_core::codec::encode_value_map(&values), millis: 1800 },
        );

        let cache = Arc::new(ServingInfoCache::new(loader, Duration::from_secs(60)));
        let fetcher = GroupByFetcher::new(cache.clone(), store, 4, Duration::from_secs(10));
        let responses = fetcher
            .fetch(vec![Request {
                name: "user_profile".to_string(),
                keys: {
                    let mut m = sawtooth_core::ValueMap::new();
                    m.insert("user".to_string(), FeatureValue::Str("u1".to_string()));
                    m
                },
                at_millis: None,
            }])
            .await;

        assert!(responses[0].outcome.is_ok());
        assert_eq!(cache.get("user_profile").await.unwrap().batch_end_millis, 1800);
    }

    // A failure for one request in a batch never affects sibling requests.
    #[tokio::test]
    async fn independence_of_sibling_failures() {
        struct MixedLoader;

        #[async_trait]
        impl MetadataLoader for MixedLoader {
            async fn load(&self, name: &str) -> Result<ServingInfo, FetchError> {
                if name == "broken" {
                    return Err(FetchError::MetadataMissing { name: name.to_string() });
                }
                Ok(no_agg_info(0))
            }
        }

        let store = Arc::new(InMemoryKvStore::new());
        let mut values = sawtooth_core::ValueMap::new();
        values.insert("plan".to_string(), FeatureValue::Str("gold".to_string()));
        store.put(
            "USER_PROFILE_BATCH",
            key_bytes("u1"),
            sawtooth_core::TimedValue { bytes: sawtooth_core::codec::encode_value_map(&values), millis: 10 },
        );

        let cache = Arc::new(ServingInfoCache::new(MixedLoader, Duration::from_secs(60)));
        let fetcher = GroupByFetcher::new(cache, store, 4, Duration::from_secs(10));
        let make_request = |name: &str| Request {
            name: name.to_string(),
            keys: {
                let mut m = sawtooth_core::ValueMap::new();
                m.insert("user".to_string(), FeatureValue::Str("u1".to_string()));
                m
            },
            at_millis: None,
        };

        let responses = fetcher
            .fetch(vec![
                make_request("user_profile"),
                make_request("broken"),
                make_request("user_profile"),
            ])
            .await;

        assert!(responses[0].outcome.is_ok());
        assert!(matches!(
            &responses[1].outcome,
            Err(FetchError::MetadataMissing { .. })
        ));
        assert!(responses[2].outcome.is_ok());
    }
}
