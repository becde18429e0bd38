//! Data model types from the system's request/response/serving-info contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::KeyValueCodec;

/// A typed feature value. Deliberately small: the fetch core only ever needs
/// to move these through codecs and aggregations, never interpret them
/// further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FeatureValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(v) => Some(*v),
            FeatureValue::Float(v) => Some(*v as i64),
            FeatureValue::Str(s) => s.parse().ok(),
            FeatureValue::Bool(b) => Some(*b as i64),
            FeatureValue::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Int(v) => Some(*v as f64),
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Str(s) => s.parse().ok(),
            FeatureValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FeatureValue::Null => None,
        }
    }

    pub fn as_str_lossy(&self) -> String {
        match self {
            FeatureValue::Str(s) => s.clone(),
            FeatureValue::Int(v) => v.to_string(),
            FeatureValue::Float(v) => v.to_string(),
            FeatureValue::Bool(b) => b.to_string(),
            FeatureValue::Null => String::new(),
        }
    }
}

/// `{name -> value}` mapping used for both request keys and response values.
pub type ValueMap = BTreeMap<String, FeatureValue>;

/// Declared type of a key or output field, used by the type-coercion
/// fallback in the key codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int64,
    Float64,
    String,
    Bool,
}

pub type Schema = Vec<(String, FieldType)>;

/// One logical query: a feature-set name, entity keys, and an optional
/// explicit query time (defaults to "now" if unset at the fetch boundary).
#[derive(Debug, Clone)]
pub struct Request {
    pub name: String,
    pub keys: ValueMap,
    pub at_millis: Option<i64>,
}

/// Pairs a `Request` with either its output values or a structured failure.
///
/// A join response is never an `Err` except when the join configuration
/// itself could not be resolved; part-level failures are
/// folded into `values` as `"<groupby>_exception"` sentinels instead.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_name: String,
    pub outcome: Result<ValueMap, crate::error::FetchError>,
}

/// `accuracy` inferred for a feature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    Snapshot,
    Temporal,
}

/// Whether the underlying source is an append-only event stream or a
/// mutable-entity stream (inserts/updates/deletes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataModel {
    Events,
    Entities,
}

/// Per-feature-set metadata: schemas, codec, aggregations, and the batch
/// snapshot's inclusive upper bound.
#[derive(Clone)]
pub struct ServingInfo {
    pub name: String,
    pub key_schema: Schema,
    pub output_columns: Vec<String>,
    pub accuracy: Accuracy,
    pub data_model: DataModel,
    pub aggregations: Option<Vec<crate::agg_spec::AggregationSpec>>,
    pub batch_end_millis: i64,
    pub codec: Arc<dyn KeyValueCodec>,
}

impl std::fmt::Debug for ServingInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingInfo")
            .field("name", &self.name)
            .field("accuracy", &self.accuracy)
            .field("data_model", &self.data_model)
            .field("batch_end_millis", &self.batch_end_millis)
            .finish()
    }
}

/// Key-value read request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GetRequest {
    pub key_bytes: Vec<u8>,
    pub dataset: String,
    pub after_millis: Option<i64>,
}

/// Opaque stored blob plus its storage timestamp.
#[derive(Debug, Clone)]
pub struct TimedValue {
    pub bytes: Vec<u8>,
    pub millis: i64,
}

/// Response to one `GetRequest`.
#[derive(Debug, Clone)]
pub struct GetResponse {
    pub request: GetRequest,
    pub values: Result<Vec<TimedValue>, String>,
}

/// A streaming mutation/event row decoded by the streaming or mutation value
/// codec.
#[derive(Debug, Clone)]
pub struct StreamingRow {
    pub values: ValueMap,
    pub ts: i64,
    pub mutation: Option<MutationKind>,
}

/// Before/after flag carried by entity-sourced streaming rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Before,
    After,
}
