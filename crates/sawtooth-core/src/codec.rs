//! Codec layer. Codecs are a closed variant over
//! {key, streaming event, streaming mutation, IR, output}, each deterministic
//! and stateless, dispatched through a small trait object rather than
//! inheritance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agg_spec::{BatchIr, HopBucket, Partial};
use crate::model::{DataModel, FeatureValue, MutationKind, Schema, StreamingRow, ValueMap};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Codec bound to a feature set's schema. Implementations must be safe to
/// share across concurrently-running fetches: read-only, no per-call state.
pub trait KeyValueCodec: Send + Sync {
    /// Encode a `{name -> value}` key mapping into the key-value store's key
    /// form. On direct-encode failure the caller retries with the
    /// type-coercion fallback (`encode_key_coerced`) before giving up.
    fn encode_key(&self, keys: &ValueMap, schema: &Schema) -> Result<Vec<u8>, CodecError>;

    /// Re-encode after casting each field to its declared schema type
    /// (numeric widening, string parsing, null for missing): the
    /// type-coercion fallback used when a direct encode fails.
    fn encode_key_coerced(&self, keys: &ValueMap, schema: &Schema) -> Result<Vec<u8>, CodecError> {
        let mut coerced = BTreeMap::new();
        for (field, ty) in schema {
            let value = keys.get(field).cloned().unwrap_or(FeatureValue::Null);
            coerced.insert(field.clone(), coerce(&value, *ty));
        }
        self.encode_key(&coerced, schema)
    }

    /// Decode a streaming value-store blob into a typed row. `data_model`
    /// selects the streaming-event vs. mutation decode path.
    fn decode_streaming_row(
        &self,
        bytes: &[u8],
        millis: i64,
        data_model: DataModel,
    ) -> Result<StreamingRow, CodecError>;

    /// Decode a batch blob into the untyped `(collapsed, tail_hops)` IR
    /// record.
    fn decode_ir(&self, bytes: &[u8]) -> Result<BatchIr, CodecError>;

    /// Decode a batch blob directly with the output codec (snapshot path)
    /// or the "selected" raw codec (no-agg path).
    fn decode_output(&self, bytes: &[u8], output_columns: &[String]) -> Result<ValueMap, CodecError>;
}

fn coerce(value: &FeatureValue, ty: crate::model::FieldType) -> FeatureValue {
    use crate::model::FieldType::*;
    match ty {
        Int64 => value.as_i64().map(FeatureValue::Int).unwrap_or(FeatureValue::Null),
        Float64 => value.as_f64().map(FeatureValue::Float).unwrap_or(FeatureValue::Null),
        String => FeatureValue::Str(value.as_str_lossy()),
        Bool => match value {
            FeatureValue::Bool(b) => FeatureValue::Bool(*b),
            FeatureValue::Null => FeatureValue::Null,
            other => FeatureValue::Bool(other.as_i64().unwrap_or(0) != 0),
        },
    }
}

/// On-the-wire shape for a streaming row, encoded/decoded with serde_json.
#[derive(Serialize, Deserialize)]
struct WireStreamingRow {
    values: ValueMap,
    #[serde(default)]
    is_before: bool,
}

/// On-the-wire shape for a batch IR blob.
#[derive(Serialize, Deserialize)]
struct WireHop {
    start_millis: i64,
    kind: WirePartialKind,
}

#[derive(Serialize, Deserialize)]
enum WirePartialKind {
    Count(i64),
    Sum(f64),
    LastK(Vec<(i64, FeatureValue)>),
}

impl From<&Partial> for WirePartialKind {
    fn from(p: &Partial) -> Self {
        match p {
            Partial::Count(n) => WirePartialKind::Count(*n),
            Partial::Sum(s) => WirePartialKind::Sum(*s),
            Partial::LastK(rows) => WirePartialKind::LastK(rows.clone()),
        }
    }
}

impl From<WirePartialKind> for Partial {
    fn from(w: WirePartialKind) -> Self {
        match w {
            WirePartialKind::Count(n) => Partial::Count(n),
            WirePartialKind::Sum(s) => Partial::Sum(s),
            WirePartialKind::LastK(rows) => Partial::LastK(rows),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireBatchIr {
    collapsed: Vec<WirePartialKind>,
    tail_hops: Vec<Vec<WireHop>>,
}

/// Default, JSON-backed codec. The on-disk wire format of the key-value
/// store is explicitly out of scope; this is a concrete,
/// deterministic stand-in so the rest of the fetch core has something real
/// to encode/decode against.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl KeyValueCodec for JsonCodec {
    fn encode_key(&self, keys: &ValueMap, schema: &Schema) -> Result<Vec<u8>, CodecError> {
        for (field, _) in schema {
            if !keys.contains_key(field) {
                return Err(CodecError::Encode(format!("missing key field '{field}'")));
            }
        }
        serde_json::to_vec(keys).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_streaming_row(
        &self,
        bytes: &[u8],
        millis: i64,
        data_model: DataModel,
    ) -> Result<StreamingRow, CodecError> {
        let wire: WireStreamingRow =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        let mutation = match data_model {
            DataModel::Events => None,
            DataModel::Entities => Some(if wire.is_before {
                MutationKind::Before
            } else {
                MutationKind::After
            }),
        };
        Ok(StreamingRow {
            values: wire.values,
            ts: millis,
            mutation,
        })
    }

    fn decode_ir(&self, bytes: &[u8]) -> Result<BatchIr, CodecError> {
        let wire: WireBatchIr =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(BatchIr {
            collapsed: wire.collapsed.into_iter().map(Partial::from).collect(),
            tail_hops: wire
                .tail_hops
                .into_iter()
                .map(|hops| {
                    hops.into_iter()
                        .map(|h| HopBucket {
                            start_millis: h.start_millis,
                            partial: Partial::from(h.kind),
                        })
                        .collect()
                })
                .collect(),
        })
    }

    fn decode_output(&self, bytes: &[u8], output_columns: &[String]) -> Result<ValueMap, CodecError> {
        let raw: ValueMap =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        let mut out = ValueMap::new();
        for column in output_columns {
            out.insert(
                column.clone(),
                raw.get(column).cloned().unwrap_or(FeatureValue::Null),
            );
        }
        Ok(out)
    }
}

/// Encode a `BatchIr` back to bytes, the mirror of `decode_ir`. Used by
/// tests to construct fixture batch payloads.
pub fn encode_ir(ir: &BatchIr) -> Vec<u8> {
    let wire = WireBatchIr {
        collapsed: ir.collapsed.iter().map(WirePartialKind::from).collect(),
        tail_hops: ir
            .tail_hops
            .iter()
            .map(|hops| {
                hops.iter()
                    .map(|h| WireHop {
                        start_millis: h.start_millis,
                        kind: WirePartialKind::from(&h.partial),
                    })
                    .collect()
            })
            .collect(),
    };
    serde_json::to_vec(&wire).expect("BatchIr is always serializable")
}

/// Encode a streaming row, the mirror of `decode_streaming_row`. Used by
/// tests and the in-memory kvstore seeding helpers.
pub fn encode_streaming_row(values: &ValueMap, is_before: bool) -> Vec<u8> {
    let wire = WireStreamingRow {
        values: values.clone(),
        is_before,
    };
    serde_json::to_vec(&wire).expect("ValueMap is always serializable")
}

/// Encode an output/raw value map, the mirror of `decode_output`.
pub fn encode_value_map(values: &ValueMap) -> Vec<u8> {
    serde_json::to_vec(values).expect("ValueMap is always serializable")
}
