//! Aggregation configuration and the batch intermediate-representation
//! shape the sawtooth aggregator folds streaming rows into.

use serde::{Deserialize, Serialize};

use crate::model::FeatureValue;

/// One windowed (or unbounded) aggregation producing a single output column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub output_name: String,
    pub func: AggFunc,
    /// `None` means the aggregation covers all time (no window truncation).
    #[serde(default)]
    pub window: Option<Window>,
}

/// The aggregation function backing one output column. Small and closed: the
/// windowing engine itself is out of scope, this is the slice of
/// semantics the fetch core must get right (commutativity, mutation
/// handling, per-row timestamps for order-sensitive functions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Sum { field: String },
    /// Keep the `k` values with the largest `ts`; ties broken by arrival
    /// order. The aggregator must use each row's timestamp rather than the
    /// order rows are observed in.
    LastK { field: String, k: usize },
}

/// Coarse-to-fine resolution window: `size_millis` is the total window
/// length, `hop_millis` the bucket width used to avoid re-scanning the
/// whole window on every query (GLOSSARY "Sawtooth aggregator").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Window {
    pub size_millis: i64,
    pub hop_millis: i64,
}

/// Partially-aggregated state for one output column. The shape varies by
/// `AggFunc` but is always cheap to merge and finalize.
#[derive(Debug, Clone)]
pub enum Partial {
    Count(i64),
    Sum(f64),
    LastK(Vec<(i64, FeatureValue)>),
}

impl Partial {
    pub fn zero(func: &AggFunc) -> Self {
        match func {
            AggFunc::Count => Partial::Count(0),
            AggFunc::Sum { .. } => Partial::Sum(0.0),
            AggFunc::LastK { .. } => Partial::LastK(Vec::new()),
        }
    }

    pub fn merge(&mut self, other: &Partial) {
        match (self, other) {
            (Partial::Count(a), Partial::Count(b)) => *a += b,
            (Partial::Sum(a), Partial::Sum(b)) => *a += b,
            (Partial::LastK(a), Partial::LastK(b)) => {
                a.extend(b.iter().cloned());
            }
            _ => {}
        }
    }

    /// Inverse of `merge`: removes `other`'s contribution. Used both for
    /// entity before-image mutations and for evicting hop buckets that have
    /// slid out of a window as of the query time.
    pub fn subtract(&mut self, other: &Partial) {
        match (self, other) {
            (Partial::Count(a), Partial::Count(b)) => *a -= b,
            (Partial::Sum(a), Partial::Sum(b)) => *a -= b,
            (Partial::LastK(a), Partial::LastK(b)) => {
                for (ts, value) in b {
                    if let Some(pos) = a.iter().position(|(t, v)| t == ts && v == value) {
                        a.remove(pos);
                    }
                }
            }
            _ => {}
        }
    }

    /// Add or remove a single row's contribution, `sign` is `1` for an
    /// addition (event, after-image) or `-1` for a removal (before-image,
    /// delete).
    pub fn apply_row(&mut self, func: &AggFunc, sign: i64, ts: i64, value: Option<&FeatureValue>) {
        match (self, func) {
            (Partial::Count(n), AggFunc::Count) => *n += sign,
            (Partial::Sum(s), AggFunc::Sum { .. }) => {
                if let Some(v) = value.and_then(FeatureValue::as_f64) {
                    *s += sign as f64 * v;
                }
            }
            (Partial::LastK(rows), AggFunc::LastK { .. }) => {
                if let Some(v) = value {
                    if sign > 0 {
                        rows.push((ts, v.clone()));
                    } else if let Some(pos) = rows.iter().position(|(t, rv)| *t == ts && rv == v) {
                        rows.remove(pos);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn finalize(&self, func: &AggFunc) -> FeatureValue {
        match (self, func) {
            (Partial::Count(n), AggFunc::Count) => FeatureValue::Int(*n),
            (Partial::Sum(s), AggFunc::Sum { .. }) => FeatureValue::Float(*s),
            (Partial::LastK(rows), AggFunc::LastK { k, .. }) => {
                let mut sorted = rows.clone();
                sorted.sort_by(|a, b| b.0.cmp(&a.0));
                sorted.truncate(*k);
                // Represent as a comma-joined string; the output codec's
                // concern is column identity, not list encoding.
                let joined = sorted
                    .iter()
                    .map(|(_, v)| v.as_str_lossy())
                    .collect::<Vec<_>>()
                    .join(",");
                FeatureValue::Str(joined)
            }
            _ => FeatureValue::Null,
        }
    }
}

/// One coarse-grained bucket of a tail hop array.
#[derive(Debug, Clone)]
pub struct HopBucket {
    pub start_millis: i64,
    pub partial: Partial,
}

/// Deserialized batch intermediate representation: a collapsed partial per
/// output column plus, per column, an array of tail-hop buckets spanning the
/// window tail.
#[derive(Debug, Clone)]
pub struct BatchIr {
    /// One partially-aggregated value per output column, covering the full
    /// pre-batch-end window.
    pub collapsed: Vec<Partial>,
    /// Per-output-column tail-hop buckets, aligned index-for-index with
    /// `collapsed` and with `ServingInfo.aggregations`.
    pub tail_hops: Vec<Vec<HopBucket>>,
}
