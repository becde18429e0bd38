//! sawtooth-core - Data model, codec traits and error taxonomy
//!
//! Pure logic only: no I/O, no async runtime, no key-value store client.
//! Everything here is the "essence" the rest of the workspace's crates build
//! on.

pub mod agg_spec;
pub mod codec;
pub mod dataset;
pub mod error;
pub mod model;

pub use agg_spec::{AggFunc, AggregationSpec, BatchIr, HopBucket, Partial, Window};
pub use codec::{CodecError, JsonCodec, KeyValueCodec};
pub use error::FetchError;
pub use model::{
    Accuracy, DataModel, FeatureValue, FieldType, GetRequest, GetResponse, MutationKind, Request,
    Response, Schema, ServingInfo, StreamingRow, TimedValue, ValueMap,
};
