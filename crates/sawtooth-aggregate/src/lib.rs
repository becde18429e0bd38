//! Sawtooth online aggregator.
//!
//! Folds a feature set's streaming rows into its batch IR at an arbitrary
//! query time. The windowing engine that produces `BatchIr.tail_hops` is
//! external; this crate only owns the invariants that
//! are ours to get right: commutative merge, entity mutation handling
//! (before-image subtract / after-image add), and per-row timestamps for
//! order-sensitive functions such as `LastK`.

use sawtooth_core::{
    AggFunc, AggregationSpec, BatchIr, FetchError, MutationKind, Partial, ServingInfo,
    StreamingRow, ValueMap,
};

/// Folds `streaming_rows` on top of `batch_ir` (if any) and finalizes every
/// aggregation in `serving_info.aggregations` as of `query_millis`.
///
/// `streaming_rows` is consumed lazily and exactly once: every aggregation
/// is updated from the same single pass, rather than re-scanning the
/// iterator per output column.
pub fn lambda_aggregate_finalized(
    serving_info: &ServingInfo,
    batch_ir: Option<&BatchIr>,
    streaming_rows: impl IntoIterator<Item = StreamingRow>,
    query_millis: i64,
) -> Result<ValueMap, FetchError> {
    let aggregations = serving_info.aggregations.as_deref().ok_or_else(|| {
        FetchError::Aggregate {
            name: serving_info.name.clone(),
            reason: "no aggregations configured".to_string(),
        }
    })?;

    if let Some(ir) = batch_ir {
        if ir.collapsed.len() != aggregations.len() || ir.tail_hops.len() != aggregations.len() {
            return Err(FetchError::Aggregate {
                name: serving_info.name.clone(),
                reason: format!(
                    "batch IR has {} columns, serving info declares {}",
                    ir.collapsed.len(),
                    aggregations.len()
                ),
            });
        }
    }

    let mut accumulators: Vec<Partial> = aggregations
        .iter()
        .enumerate()
        .map(|(idx, spec)| starting_partial(spec, batch_ir, idx, query_millis))
        .collect();

    for row in streaming_rows {
        for (idx, spec) in aggregations.iter().enumerate() {
            if let Some(window) = spec.window {
                let window_start = query_millis - window.size_millis;
                if row.ts < window_start {
                    continue;
                }
            }
            apply_streaming_row(&mut accumulators[idx], spec, &row);
        }
    }

    Ok(aggregations
        .iter()
        .zip(accumulators.iter())
        .map(|(spec, partial)| (spec.output_name.clone(), partial.finalize(&spec.func)))
        .collect())
}

/// Starting accumulator for one output column: the batch snapshot's
/// collapsed partial, with any hop buckets that have aged out of the window
/// as of `query_millis` evicted. With no batch IR at all (cold feature set,
/// or streaming-only path) this is simply the function's identity value.
fn starting_partial(
    spec: &AggregationSpec,
    batch_ir: Option<&BatchIr>,
    idx: usize,
    query_millis: i64,
) -> Partial {
    let Some(ir) = batch_ir else {
        return Partial::zero(&spec.func);
    };

    let mut partial = ir.collapsed[idx].clone();
    if let Some(window) = spec.window {
        let window_start = query_millis - window.size_millis;
        for hop in &ir.tail_hops[idx] {
            if hop.start_millis + window.hop_millis <= window_start {
                partial.subtract(&hop.partial);
            }
        }
    }
    partial
}

fn apply_streaming_row(partial: &mut Partial, spec: &AggregationSpec, row: &StreamingRow) {
    let sign = match row.mutation {
        None | Some(MutationKind::After) => 1,
        Some(MutationKind::Before) => -1,
    };
    let value = match &spec.func {
        AggFunc::Count => None,
        AggFunc::Sum { field } => row.values.get(field),
        AggFunc::LastK { field, .. } => row.values.get(field),
    };
    partial.apply_row(&spec.func, sign, row.ts, value);
}
