//! Join Planner: expands a join into group-by requests, dedups
//! them across the whole batch, and re-assembles per-part responses with
//! column prefixing and `"<groupBy>_exception"` sentinels for missing parts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sawtooth_core::{FeatureValue, FetchError, Request, Response, Schema, ValueMap};

use crate::group_by::GroupByFetcher;
use sawtooth_cache::MetadataLoader;
use sawtooth_kvstore::KvStore;

/// One leg of a join: a group-by to fetch, how to remap the join's own keys
/// onto that group-by's key names, and the prefix applied to its outputs.
#[derive(Debug, Clone)]
pub struct JoinPart {
    pub group_by_name: String,
    /// `left key name -> right (group-by) key name`.
    pub key_mapping: BTreeMap<String, String>,
    pub full_prefix: String,
}

/// A composition of feature sets over a shared set of entity keys (spec
/// GLOSSARY "Join").
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub name: String,
    pub key_schema: Schema,
    pub parts: Vec<JoinPart>,
    pub sample_percent: f64,
}

/// Supplies a `JoinSpec` by name; the join configuration's own storage is
/// out of scope, mirroring `MetadataLoader` for serving-info.
#[async_trait]
pub trait JoinConfigLoader: Send + Sync {
    async fn load(&self, name: &str) -> Result<Arc<JoinSpec>, FetchError>;
}

pub struct JoinPlanner<J: JoinConfigLoader, L: MetadataLoader, S: KvStore> {
    join_loader: J,
    group_by: Arc<GroupByFetcher<L, S>>,
}

impl<J, L, S> JoinPlanner<J, L, S>
where
    J: JoinConfigLoader,
    L: MetadataLoader + 'static,
    S: KvStore + 'static,
{
    pub fn new(join_loader: J, group_by: Arc<GroupByFetcher<L, S>>) -> Self {
        Self { join_loader, group_by }
    }

    pub fn join_loader(&self) -> &J {
        &self.join_loader
    }

    pub fn group_by(&self) -> &Arc<GroupByFetcher<L, S>> {
        &self.group_by
    }

    /// `fetchJoin(requests) -> futures<responses>`.
    pub async fn fetch(&self, requests: Vec<Request>) -> Vec<Response> {
        let mut responses: Vec<Option<Response>> = requests.iter().map(|_| None).collect();
        let mut resolved = Vec::with_capacity(requests.len());

        for (idx, request) in requests.into_iter().enumerate() {
            match self.join_loader.load(&request.name).await {
                Ok(spec) => resolved.push((idx, request, spec)),
                Err(err) => {
                    responses[idx] = Some(Response {
                        request_name: request.name.clone(),
                        outcome: Err(err),
                    });
                }
            }
        }

        if resolved.is_empty() {
            return responses.into_iter().map(|r| r.expect("filled above")).collect();
        }

        // Dedup group-by sub-requests by full request identity. The dedup
        // key is a canonical JSON encoding of (name, keys, atMillis):
        // `ValueMap` is a `BTreeMap` so
        // serialization is already key-order-stable.
        let mut dedup_index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut sub_requests: Vec<Request> = Vec::new();
        // For each (join request idx, part idx) -> index into `sub_requests`.
        let mut part_lookup: Vec<Vec<usize>> = Vec::with_capacity(resolved.len());

        for (_, request, spec) in &resolved {
            let mut this_request_parts = Vec::with_capacity(spec.parts.len());
            for part in &spec.parts {
                let remapped_keys = remap_keys(&request.keys, &part.key_mapping);
                let sub_request = Request {
                    name: part.group_by_name.clone(),
                    keys: remapped_keys,
                    at_millis: request.at_millis,
                };
                let dedup_key = dedup_key(&sub_request);
                let sub_idx = *dedup_index.entry(dedup_key).or_insert_with(|| {
                    sub_requests.push(sub_request);
                    sub_requests.len() - 1
                });
                this_request_parts.push(sub_idx);
            }
            part_lookup.push(this_request_parts);
        }

        let sub_responses = self.group_by.fetch(sub_requests).await;

        for ((idx, request, spec), part_indices) in resolved.into_iter().zip(part_lookup.into_iter())
        {
            let mut merged = ValueMap::new();
            for (part, sub_idx) in spec.parts.iter().zip(part_indices.into_iter()) {
                match &sub_responses[sub_idx].outcome {
                    Ok(values) => {
                        for (field, value) in values {
                            merged.insert(format!("{}_{}", part.full_prefix, field), value.clone());
                        }
                    }
                    Err(err) => {
                        merged.insert(
                            format!("{}_exception", part.group_by_name),
                            FeatureValue::Str(err.to_trace_string()),
                        );
                    }
                }
            }
            responses[idx] = Some(Response { request_name: request.name, outcome: Ok(merged) });
        }

        responses.into_iter().map(|r| r.expect("filled above")).collect()
    }
}

fn remap_keys(keys: &ValueMap, key_mapping: &BTreeMap<String, String>) -> ValueMap {
    key_mapping
        .iter()
        .filter_map(|(left, right)| keys.get(left).map(|v| (right.clone(), v.clone())))
        .collect()
}

fn dedup_key(request: &Request) -> String {
    format!(
        "{}\u{1}{}\u{1}{:?}",
        request.name,
        serde_json::to_string(&request.keys).expect("ValueMap is always serializable"),
        request.at_millis
    )
}
