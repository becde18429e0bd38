// End-to-end coverage driving the Axum app the way an HTTP client would,
// without binding a real socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use sawtooth_server::registry::{RegistryFile, StaticJoinLoader, StaticMetadataLoader, TracingLogSink};

const REGISTRY: &str = r#"
[feature_sets.user_profile]
key_schema = [["user", "string"]]
output_columns = ["plan"]
accuracy = "snapshot"
data_model = "events"

[feature_sets.purchases_sum]
key_schema = [["user", "string"]]
output_columns = ["count"]
accuracy = "temporal"
data_model = "entities"
batch_end_millis = 0

[[feature_sets.purchases_sum.aggregations]]
output_name = "count"
[feature_sets.purchases_sum.aggregations.func]
kind = "count"

[joins.checkout]
key_schema = [["user", "string"]]
sample_percent = 100.0

[[joins.checkout.parts]]
group_by_name = "user_profile"
full_prefix = "profile"
[joins.checkout.parts.key_mapping]
user = "user"

[[joins.checkout.parts]]
group_by_name = "purchases_sum"
full_prefix = "purchases"
[joins.checkout.parts.key_mapping]
user = "user"
"#;

async fn test_app() -> axum::Router {
    use std::sync::Arc;
    use std::time::Duration;

    use sawtooth_cache::ServingInfoCache;
    use sawtooth_config::RuntimeConfig;
    use sawtooth_fetch::{GroupByFetcher, JoinPlanner, LoggingSampler};
    use sawtooth_kvstore::InMemoryKvStore;
    use sawtooth_server::AppState;

    let registry = RegistryFile::load_from_str(REGISTRY).unwrap();
    let config = RuntimeConfig::default();

    let loader = StaticMetadataLoader::new(&registry);
    let cache = Arc::new(ServingInfoCache::new(loader, config.cache.ttl()));
    let store = Arc::new(InMemoryKvStore::new());
    let group_by = Arc::new(GroupByFetcher::new(cache, store, config.fetch.worker_pool_size, config.fetch.timeout()));

    let join_loader = StaticJoinLoader::new(&registry, config.sampling.default_sample_percent);
    let planner = Arc::new(JoinPlanner::new(join_loader, group_by.clone()));
    let sampler = Arc::new(LoggingSampler::new(planner, Arc::new(TracingLogSink), Duration::from_secs(60), true));

    let state = AppState { group_by, sampler, config: Arc::new(config) };
    sawtooth_server::router(state)
}

async fn post_json(app: axum::Router, uri: &str, body: Value) -> Value {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_and_ready_report_ok() {
    let app = test_app().await;
    let response =
        app.clone().oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn group_by_fetch_returns_missing_metadata_for_unknown_name() {
    let app = test_app().await;
    let body = json!({ "requests": [{ "name": "does_not_exist", "keys": { "user": "u1" } }] });
    let out = post_json(app, "/v1/fetch/group-bys", body).await;

    let response = &out["responses"][0];
    assert_eq!(response["request_name"], "does_not_exist");
    assert_eq!(response["error"]["kind"], "MetadataMissing");
}

#[tokio::test]
async fn join_fetch_folds_group_by_failure_into_exception_sentinel() {
    let app = test_app().await;
    let body = json!({ "requests": [{ "name": "checkout", "keys": { "user": "u1" } }] });
    let out = post_json(app, "/v1/fetch/join", body).await;

    let response = &out["responses"][0];
    assert_eq!(response["request_name"], "checkout");
    let values = response["values"].as_object().expect("join response carries partial values, not a request-level error");
    assert!(values.contains_key("profile_plan") || values.contains_key("user_profile_exception"));
    assert!(values.contains_key("purchases_count") || values.contains_key("purchases_sum_exception"));
}

#[tokio::test]
async fn batch_requests_are_independent_on_partial_failure() {
    let app = test_app().await;
    let body = json!({
        "requests": [
            { "name": "unknown_one", "keys": {} },
            { "name": "user_profile", "keys": { "user": "u1" } },
        ]
    });
    let out = post_json(app, "/v1/fetch/group-bys", body).await;

    assert_eq!(out["responses"][0]["error"]["kind"], "MetadataMissing");
    // the sibling request still resolves its own (missing-batch) outcome
    // independently, rather than being aborted by the first failure.
    assert!(out["responses"][1]["error"].is_object() || out["responses"][1]["values"].is_object());
}
