//! Error taxonomy. Per-request failures are values attached to a
//! `Response`, never panics that could poison sibling requests in the same
//! batch.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("no serving-info for feature set '{name}'")]
    MetadataMissing { name: String },

    #[error("failed to encode keys for '{name}': {reason}")]
    EncodeKeys {
        name: String,
        reason: String,
        /// The original encode error, kept for diagnostics when the
        /// type-coercion fallback also failed.
        suppressed: Option<String>,
    },

    #[error("batch value missing for temporal fetch of '{name}'")]
    BatchMissing { name: String },

    #[error("failed to decode bytes for '{name}': {reason}")]
    Decode { name: String, reason: String },

    #[error("aggregator failed for '{name}': {reason}")]
    Aggregate { name: String, reason: String },

    #[error("fetch of '{name}' exceeded the overall deadline")]
    Timeout { name: String },

    #[error("key-value store failed: {reason}")]
    KvStore { reason: String },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::MetadataMissing { .. } => "MetadataMissing",
            FetchError::EncodeKeys { .. } => "EncodeKeys",
            FetchError::BatchMissing { .. } => "BatchMissing",
            FetchError::Decode { .. } => "Decode",
            FetchError::Aggregate { .. } => "Aggregate",
            FetchError::Timeout { .. } => "Timeout",
            FetchError::KvStore { .. } => "KvStore",
        }
    }

    /// Render as a stack-trace-shaped string for the join layer's
    /// `"<groupBy>_exception"` sentinel.
    pub fn to_trace_string(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}
