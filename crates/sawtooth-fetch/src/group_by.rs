//! Group-By Fetcher: resolve serving-info, encode keys, issue one
//! batched key-value read per call, decode, select a path, and return one
//! `Response` per `Request` with failures isolated per-request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant as TokioInstant;

use sawtooth_aggregate::lambda_aggregate_finalized;
use sawtooth_cache::{MetadataLoader, ServingInfoCache};
use sawtooth_core::{
    Accuracy, FetchError, GetRequest, Request, Response, ServingInfo, TimedValue, ValueMap,
};
use sawtooth_kvstore::KvStore;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Fans requests out to the key-value store and decodes/aggregates the
/// results on a bounded worker pool.
pub struct GroupByFetcher<L: MetadataLoader, S: KvStore> {
    cache: Arc<ServingInfoCache<L>>,
    store: Arc<S>,
    worker_pool: Arc<Semaphore>,
    timeout: Duration,
}

impl<L, S> GroupByFetcher<L, S>
where
    L: MetadataLoader + 'static,
    S: KvStore + 'static,
{
    pub fn new(
        cache: Arc<ServingInfoCache<L>>,
        store: Arc<S>,
        worker_pool_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            worker_pool: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<ServingInfoCache<L>> {
        &self.cache
    }

    /// `fetchGroupBys(requests) -> futures<responses>`. Never
    /// fails wholesale: every input `Request` yields exactly one `Response`,
    /// in input order.
    pub async fn fetch(&self, requests: Vec<Request>) -> Vec<Response> {
        let names: Vec<String> = requests.iter().map(|r| r.name.clone()).collect();
        let mut responses: Vec<Option<Response>> = requests.iter().map(|_| None).collect();
        let mut plans = Vec::new();

        for (idx, request) in requests.into_iter().enumerate() {
            match self.cache.get(&request.name).await {
                Ok(info) => plans.push((idx, request, info)),
                Err(err) => {
                    responses[idx] = Some(Response {
                        request_name: request.name.clone(),
                        outcome: Err(err),
                    });
                }
            }
        }

        if plans.is_empty() {
            return responses.into_iter().map(|r| r.expect("filled above")).collect();
        }

        let mut built = Vec::with_capacity(plans.len());
        for (idx, request, info) in plans {
            match build_plan(idx, request, info) {
                Ok(plan) => built.push(plan),
                Err((request_name, err)) => {
                    responses[idx] = Some(Response { request_name, outcome: Err(err) });
                }
            }
        }

        // Union of every GetRequest across the whole batch, issued as a
        // single multiGet.
        let mut all_gets = Vec::with_capacity(built.len() * 2);
        for plan in &built {
            all_gets.push(plan.batch_get.clone());
            if let Some(streaming_get) = &plan.streaming_get {
                all_gets.push(streaming_get.clone());
            }
        }

        let get_responses = self.store.multi_get(all_gets).await;
        let mut index: HashMap<GetRequest, Result<Vec<TimedValue>, String>> =
            HashMap::with_capacity(get_responses.len());
        for gr in get_responses {
            index.insert(gr.request, gr.values);
        }

        let deadline = TokioInstant::now() + self.timeout;
        let mut join_set = JoinSet::new();
        let request_count = built.len();
        for plan in built {
            let batch_values = index.get(&plan.batch_get).cloned();
            let streaming_values = plan
                .streaming_get
                .as_ref()
                .and_then(|g| index.get(g).cloned());
            let Plan { idx, request, info, .. } = plan;
            let query_millis = request.at_millis.unwrap_or_else(now_millis);
            let request_name = request.name;
            let cache = self.cache.clone();
            let semaphore = self.worker_pool.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("worker pool semaphore never closes");
                let outcome = resolve_one(&cache, info, batch_values, streaming_values, query_millis).await;
                (idx, request_name, outcome)
            });
        }

        let mut completed = 0usize;
        while completed < request_count {
            let now = TokioInstant::now();
            let remaining = if now >= deadline { Duration::from_secs(0) } else { deadline - now };
            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok((idx, name, outcome)))) => {
                    responses[idx] = Some(Response { request_name: name, outcome });
                    completed += 1;
                }
                Ok(Some(Err(_join_err))) => {
                    completed += 1;
                }
                Ok(None) => break,
                Err(_elapsed) => break,
            }
        }

        // Anything still unresolved at the deadline resolves to `Timeout`
        //.
        join_set.abort_all();
        for (idx, slot) in responses.iter_mut().enumerate() {
            if slot.is_none() {
                let name = names[idx].clone();
                *slot = Some(Response {
                    request_name: name.clone(),
                    outcome: Err(FetchError::Timeout { name }),
                });
            }
        }

        responses.into_iter().map(|r| r.expect("filled above")).collect()
    }
}

struct Plan {
    idx: usize,
    request: Request,
    info: Arc<ServingInfo>,
    batch_get: GetRequest,
    streaming_get: Option<GetRequest>,
}

fn build_plan(
    idx: usize,
    request: Request,
    info: Arc<ServingInfo>,
) -> Result<Plan, (String, FetchError)> {
    let key_bytes = encode_keys(&info, &request.keys)
        .map_err(|err| (request.name.clone(), err))?;

    let batch_get = GetRequest {
        key_bytes: key_bytes.clone(),
        dataset: sawtooth_core::dataset::batch_dataset(&info.name),
        after_millis: None,
    };
    let streaming_get = (info.accuracy == Accuracy::Temporal).then(|| GetRequest {
        key_bytes,
        dataset: sawtooth_core::dataset::streaming_dataset(&info.name),
        after_millis: Some(info.batch_end_millis),
    });

    Ok(Plan { idx, request, info, batch_get, streaming_get })
}

fn encode_keys(info: &ServingInfo, keys: &ValueMap) -> Result<Vec<u8>, FetchError> {
    match info.codec.encode_key(keys, &info.key_schema) {
        Ok(bytes) => Ok(bytes),
        Err(original) => info
            .codec
            .encode_key_coerced(keys, &info.key_schema)
            .map_err(|fallback| FetchError::EncodeKeys {
                name: info.name.clone(),
                reason: fallback.to_string(),
                suppressed: Some(original.to_string()),
            }),
    }
}

/// Picks the batch `TimedValue` with maximum `millis`, triggers a forced
/// serving-info refresh if it is newer than the cached `batchEndMillis`
///, then decodes/aggregates.
async fn resolve_one<L: MetadataLoader>(
    cache: &ServingInfoCache<L>,
    mut info: Arc<ServingInfo>,
    batch_values: Option<Result<Vec<TimedValue>, String>>,
    streaming_values: Option<Result<Vec<TimedValue>, String>>,
    query_millis: i64,
) -> Result<ValueMap, FetchError> {
    let batch_values = match batch_values {
        Some(Ok(values)) => values,
        Some(Err(reason)) => return Err(FetchError::KvStore { reason }),
        None => return Err(FetchError::BatchMissing { name: info.name.clone() }),
    };

    let selected = batch_values.into_iter().max_by_key(|v| v.millis);
    let Some(selected) = selected else {
        return Err(FetchError::BatchMissing { name: info.name.clone() });
    };
    if selected.millis < info.batch_end_millis {
        // Stale bulk upload that was not pruned.
        return Err(FetchError::BatchMissing { name: info.name.clone() });
    }

    if selected.millis > info.batch_end_millis {
        match cache.force(&info.name).await {
            Ok(refreshed) => info = refreshed,
            Err(err) => {
                tracing::warn!(
                    feature_set = %info.name,
                    error = %err,
                    "forced refresh failed, proceeding with stale serving-info"
                );
            }
        }
    }

    if info.aggregations.is_none() || info.accuracy == Accuracy::Snapshot {
        return info.codec.decode_output(&selected.bytes, &info.output_columns).map_err(|err| {
            let err = FetchError::Decode { name: info.name.clone(), reason: err.to_string() };
            tracing::warn!(feature_set = %info.name, kind = err.kind(), error = %err, "batch decode failed");
            err
        });
    }

    let ir = info.codec.decode_ir(&selected.bytes).map_err(|err| {
        let err = FetchError::Decode { name: info.name.clone(), reason: err.to_string() };
        tracing::warn!(feature_set = %info.name, kind = err.kind(), error = %err, "batch IR decode failed");
        err
    })?;

    let streaming_rows = match streaming_values {
        Some(Ok(values)) => values
            .into_iter()
            // Invariant #3: no value older than batchEndMillis may reach
            // the aggregator, regardless of what the store returned.
            .filter(|v| v.millis >= info.batch_end_millis)
            .map(|v| info.codec.decode_streaming_row(&v.bytes, v.millis, info.data_model))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                let err = FetchError::Decode { name: info.name.clone(), reason: err.to_string() };
                tracing::warn!(feature_set = %info.name, kind = err.kind(), error = %err, "streaming row decode failed");
                err
            })?,
        Some(Err(reason)) => return Err(FetchError::KvStore { reason }),
        None => Vec::new(),
    };

    lambda_aggregate_finalized(&info, Some(&ir), streaming_rows, query_millis).map_err(|err| {
        tracing::warn!(feature_set = %info.name, kind = err.kind(), error = %err, "aggregation failed");
        err
    })
}
