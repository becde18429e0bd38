//! Logging Sampler: wraps the join fetcher, deterministically
//! sub-samples responses, and re-encodes sampled ones for a caller-supplied
//! audit sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use sawtooth_cache::MetadataLoader;
use sawtooth_core::{FeatureValue, FetchError, Request, Response, ValueMap};
use sawtooth_kvstore::KvStore;

use crate::join::{JoinConfigLoader, JoinPlanner, JoinSpec};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// `LoggableResponse` handed to a caller-installed sink.
/// `value_bytes` is `None` for a failed response - it is still logged, just
/// without a value payload.
#[derive(Debug, Clone)]
pub struct LoggableResponse {
    pub key_bytes: Vec<u8>,
    pub value_bytes: Option<Vec<u8>>,
    pub join_name: String,
    pub at_millis: i64,
}

/// Caller-supplied audit sink. Fire-and-forget from the sampler's
/// perspective: failures are swallowed, rate-limited, and never fail the
/// fetch.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn emit(&self, event: LoggableResponse) -> Result<(), String>;
}

/// Unified key/value schema for a join's audit log: key fields in the
/// join's declared order, value fields as the concatenation of every part's
/// prefixed output columns.
#[derive(Debug, Clone)]
pub struct JoinCodec {
    key_fields: Vec<String>,
    value_fields: Vec<String>,
}

impl JoinCodec {
    fn project(fields: &[String], values: &ValueMap) -> ValueMap {
        fields
            .iter()
            .map(|f| (f.clone(), values.get(f).cloned().unwrap_or(FeatureValue::Null)))
            .collect()
    }

    pub fn encode_keys(&self, keys: &ValueMap) -> Vec<u8> {
        serde_json::to_vec(&Self::project(&self.key_fields, keys)).expect("ValueMap is serializable")
    }

    pub fn encode_values(&self, values: &ValueMap) -> Vec<u8> {
        serde_json::to_vec(&Self::project(&self.value_fields, values)).expect("ValueMap is serializable")
    }

    pub fn decode_keys(&self, bytes: &[u8]) -> ValueMap {
        serde_json::from_slice(bytes).expect("encoded by this codec")
    }

    pub fn decode_values(&self, bytes: &[u8]) -> ValueMap {
        serde_json::from_slice(bytes).expect("encoded by this codec")
    }

    /// Ordered key values for the sampling hash: a byte-order-stable 32-bit
    /// hash over the keys in join-declared order.
    pub fn ordered_key_values(&self, keys: &ValueMap) -> Vec<FeatureValue> {
        self.key_fields
            .iter()
            .map(|f| keys.get(f).cloned().unwrap_or(FeatureValue::Null))
            .collect()
    }
}

/// `abs(hash) % 100_000 <= floor(sample_percent * 1000)`. Deterministic
/// across processes so offline analyses reproduce sampling decisions.
pub fn is_sampled(ordered_key_values: &[FeatureValue], sample_percent: f64) -> bool {
    let hash = sampling_hash(ordered_key_values);
    let bucket = hash.unsigned_abs() % 100_000;
    bucket as f64 <= (sample_percent * 1000.0).floor()
}

fn sampling_hash(ordered_key_values: &[FeatureValue]) -> i64 {
    // FNV-1a, 32-bit: cheap, stable across platforms, and independent of
    // hashmap iteration order since the caller already ordered the values.
    let mut hash: u32 = 0x811c9dc5;
    for value in ordered_key_values {
        for byte in value.as_str_lossy().as_bytes() {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(0x01000193);
        }
        hash = hash.wrapping_mul(0x01000193);
    }
    hash as i64
}

struct CachedCodec {
    codec: Arc<JoinCodec>,
    loaded_at: Instant,
}

/// Small TTL cache for `JoinCodec`s, keyed by join name.
struct JoinCodecCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedCodec>>,
}

impl JoinCodecCache {
    fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    fn fresh(&self, name: &str) -> Option<Arc<JoinCodec>> {
        let entries = self.entries.read();
        entries.get(name).and_then(|entry| {
            (entry.loaded_at.elapsed() < self.ttl).then(|| entry.codec.clone())
        })
    }

    fn store(&self, name: &str, codec: Arc<JoinCodec>) {
        self.entries.write().insert(
            name.to_string(),
            CachedCodec { codec: codec.clone(), loaded_at: Instant::now() },
        );
    }

    async fn get_or_build<L: MetadataLoader>(
        &self,
        spec: &JoinSpec,
        metadata: &sawtooth_cache::ServingInfoCache<L>,
    ) -> Result<Arc<JoinCodec>, FetchError> {
        if let Some(codec) = self.fresh(&spec.name) {
            return Ok(codec);
        }

        let key_fields = spec.key_schema.iter().map(|(name, _)| name.clone()).collect();
        let mut value_fields = Vec::new();
        for part in &spec.parts {
            let info = metadata.get(&part.group_by_name).await?;
            for column in &info.output_columns {
                value_fields.push(format!("{}_{}", part.full_prefix, column));
            }
        }

        let codec = Arc::new(JoinCodec { key_fields, value_fields });
        self.store(&spec.name, codec.clone());
        Ok(codec)
    }
}

/// Wraps a `JoinPlanner`, sampling and logging responses after each fetch.
pub struct LoggingSampler<J: JoinConfigLoader, L: MetadataLoader, S: KvStore, K: LogSink> {
    planner: Arc<JoinPlanner<J, L, S>>,
    sink: Arc<K>,
    codecs: JoinCodecCache,
    debug_mode: bool,
    sink_failures: AtomicU64,
}

impl<J, L, S, K> LoggingSampler<J, L, S, K>
where
    J: JoinConfigLoader,
    L: MetadataLoader + 'static,
    S: KvStore + 'static,
    K: LogSink,
{
    pub fn new(planner: Arc<JoinPlanner<J, L, S>>, sink: Arc<K>, codec_ttl: Duration, debug_mode: bool) -> Self {
        Self {
            planner,
            sink,
            codecs: JoinCodecCache::new(codec_ttl),
            debug_mode,
            sink_failures: AtomicU64::new(0),
        }
    }

    pub async fn fetch(&self, requests: Vec<Request>) -> Vec<Response> {
        let responses = self.planner.fetch(requests.clone()).await;

        for (request, response) in requests.into_iter().zip(responses.iter()) {
            if let Err(err) = self.maybe_log(&request, response).await {
                self.record_sink_failure(&err);
            }
        }

        responses
    }

    async fn maybe_log(&self, request: &Request, response: &Response) -> Result<(), String> {
        let spec = self
            .planner
            .join_loader()
            .load(&request.name)
            .await
            .map_err(|e| e.to_string())?;

        let codec = self
            .codecs
            .get_or_build(&spec, self.planner.group_by().cache())
            .await
            .map_err(|e| e.to_string())?;

        let ordered_keys = codec.ordered_key_values(&request.keys);
        if !is_sampled(&ordered_keys, spec.sample_percent) {
            return Ok(());
        }

        let event = LoggableResponse {
            key_bytes: codec.encode_keys(&request.keys),
            value_bytes: response.outcome.as_ref().ok().map(|values| codec.encode_values(values)),
            join_name: request.name.clone(),
            at_millis: request.at_millis.unwrap_or_else(now_millis),
        };

        self.sink.emit(event).await
    }

    /// Rate-limited to ~1% unless debug mode is on, so a sink outage
    /// surfaces as a counter and an occasional warning rather than a flood
    /// of identical log lines.
    fn record_sink_failure(&self, reason: &str) {
        let count = self.sink_failures.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::counter!("sawtooth_logging_sink_failures_total", 1);
        if self.debug_mode || count % 100 == 1 {
            tracing::warn!(reason, "logging sink failed; fetch result unaffected");
        }
    }
}
