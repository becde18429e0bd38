//! Static, file-backed implementations of `MetadataLoader`, `JoinConfigLoader`
//! and `LogSink`. The storage backing feature-set metadata and join
//! configuration is out of scope; this is the same kind
//! of stand-in `InMemoryKvStore` is for the key-value store itself - the one
//! implementation this workspace ships, loaded once from a TOML file at
//! startup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use sawtooth_cache::MetadataLoader;
use sawtooth_core::{AggregationSpec, Accuracy, DataModel, FetchError, JsonCodec, Schema, ServingInfo};
use sawtooth_fetch::{JoinConfigLoader, JoinPart, JoinSpec, LogSink, LoggableResponse};

/// On-disk shape of the registry file: every feature set and join known to
/// this deployment, keyed by name.
#[derive(Debug, Deserialize, Default)]
pub struct RegistryFile {
    #[serde(default)]
    pub feature_sets: HashMap<String, FeatureSetEntry>,
    #[serde(default)]
    pub joins: HashMap<String, JoinEntry>,
}

#[derive(Debug, Deserialize)]
pub struct FeatureSetEntry {
    pub key_schema: Schema,
    pub output_columns: Vec<String>,
    pub accuracy: Accuracy,
    pub data_model: DataModel,
    #[serde(default)]
    pub aggregations: Option<Vec<AggregationSpec>>,
    #[serde(default)]
    pub batch_end_millis: i64,
}

#[derive(Debug, Deserialize)]
pub struct JoinEntry {
    pub key_schema: Schema,
    pub parts: Vec<JoinPartEntry>,
    /// `None` when the join doesn't declare its own rate; the loader falls
    /// back to the configured default in that case.
    #[serde(default)]
    pub sample_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct JoinPartEntry {
    pub group_by_name: String,
    pub key_mapping: BTreeMap<String, String>,
    pub full_prefix: String,
}

impl RegistryFile {
    pub fn load_from_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Resolves `ServingInfo` from a registry loaded once at startup. Every
/// entry is served with the JSON codec - the only `KeyValueCodec`
/// this workspace implements.
pub struct StaticMetadataLoader {
    entries: HashMap<String, FeatureSetEntry>,
}

impl StaticMetadataLoader {
    pub fn new(registry: &RegistryFile) -> Self {
        let mut entries = HashMap::new();
        for (name, entry) in &registry.feature_sets {
            entries.insert(
                name.clone(),
                FeatureSetEntry {
                    key_schema: entry.key_schema.clone(),
                    output_columns: entry.output_columns.clone(),
                    accuracy: entry.accuracy,
                    data_model: entry.data_model,
                    aggregations: entry.aggregations.clone(),
                    batch_end_millis: entry.batch_end_millis,
                },
            );
        }
        Self { entries }
    }
}

#[async_trait]
impl MetadataLoader for StaticMetadataLoader {
    async fn load(&self, name: &str) -> Result<ServingInfo, FetchError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| FetchError::MetadataMissing { name: name.to_string() })?;
        Ok(ServingInfo {
            name: name.to_string(),
            key_schema: entry.key_schema.clone(),
            output_columns: entry.output_columns.clone(),
            accuracy: entry.accuracy,
            data_model: entry.data_model,
            aggregations: entry.aggregations.clone(),
            batch_end_millis: entry.batch_end_millis,
            codec: Arc::new(JsonCodec),
        })
    }
}

/// Resolves `JoinSpec` from the same registry.
pub struct StaticJoinLoader {
    specs: HashMap<String, Arc<JoinSpec>>,
}

impl StaticJoinLoader {
    /// `default_sample_percent` fills in for any `JoinEntry` that omits its
    /// own `sample_percent` (`sawtooth_config::SamplingConfig::default_sample_percent`).
    pub fn new(registry: &RegistryFile, default_sample_percent: f64) -> Self {
        let mut specs = HashMap::new();
        for (name, entry) in &registry.joins {
            let parts = entry
                .parts
                .iter()
                .map(|p| JoinPart {
                    group_by_name: p.group_by_name.clone(),
                    key_mapping: p.key_mapping.clone(),
                    full_prefix: p.full_prefix.clone(),
                })
                .collect();
            specs.insert(
                name.clone(),
                Arc::new(JoinSpec {
                    name: name.clone(),
                    key_schema: entry.key_schema.clone(),
                    parts,
                    sample_percent: entry.sample_percent.unwrap_or(default_sample_percent),
                }),
            );
        }
        Self { specs }
    }
}

#[async_trait]
impl JoinConfigLoader for StaticJoinLoader {
    async fn load(&self, name: &str) -> Result<Arc<JoinSpec>, FetchError> {
        self.specs
            .get(name)
            .cloned()
            .ok_or_else(|| FetchError::MetadataMissing { name: name.to_string() })
    }
}

/// Emits sampled events as `tracing` events. A real audit sink (file, queue,
/// warehouse table) is an external collaborator out of scope here;
/// this is the logging-shaped equivalent of `InMemoryKvStore`.
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn emit(&self, event: LoggableResponse) -> Result<(), String> {
        tracing::debug!(
            join = %event.join_name,
            at_millis = event.at_millis,
            key_bytes = event.key_bytes.len(),
            value_bytes = event.value_bytes.as_ref().map(|v| v.len()),
            "sampled fetch logged"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_feature_set_from_toml() {
        let toml = r#"
            [feature_sets.user_profile]
            key_schema = [["user", "string"]]
            output_columns = ["plan"]
            accuracy = "snapshot"
            data_model = "events"
            batch_end_millis = 1000
        "#;
        let registry = RegistryFile::load_from_str(toml).unwrap();
        let loader = StaticMetadataLoader::new(&registry);
        let info = loader.load("user_profile").await.unwrap();
        assert_eq!(info.output_columns, vec!["plan".to_string()]);
        assert_eq!(info.batch_end_millis, 1000);
    }

    #[tokio::test]
    async fn join_without_sample_percent_falls_back_to_configured_default() {
        let toml = r#"
            [joins.checkout]
            key_schema = [["user", "string"]]
            [[joins.checkout.parts]]
            group_by_name = "a"
            full_prefix = "a"
            [joins.checkout.parts.key_mapping]
            user = "user"
        "#;
        let registry = RegistryFile::load_from_str(toml).unwrap();
        let loader = StaticJoinLoader::new(&registry, 42.0);
        let spec = loader.load("checkout").await.unwrap();
        assert_eq!(spec.sample_percent, 42.0);
    }

    #[tokio::test]
    async fn join_with_explicit_sample_percent_ignores_the_default() {
        let toml = r#"
            [joins.checkout]
            key_schema = [["user", "string"]]
            sample_percent = 7.5
            [[joins.checkout.parts]]
            group_by_name = "a"
            full_prefix = "a"
            [joins.checkout.parts.key_mapping]
            user = "user"
        "#;
        let registry = RegistryFile::load_from_str(toml).unwrap();
        let loader = StaticJoinLoader::new(&registry, 42.0);
        let spec = loader.load("checkout").await.unwrap();
        assert_eq!(spec.sample_percent, 7.5);
    }

    #[tokio::test]
    async fn missing_feature_set_errors() {
        let loader = StaticMetadataLoader::new(&RegistryFile::empty());
        assert!(matches!(
            loader.load("nope").await,
            Err(FetchError::MetadataMissing { .. })
        ));
    }
}
