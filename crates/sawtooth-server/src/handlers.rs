// HTTP request handlers for the fetch server
//
// Implements group-by/join fetch endpoints and health checks.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tracing::debug;

use sawtooth_core::{Request, Response, ValueMap};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct FetchRequestDto {
    pub name: String,
    pub keys: ValueMap,
    #[serde(default)]
    pub at_millis: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FetchBatchDto {
    pub requests: Vec<FetchRequestDto>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FetchResponseDto {
    pub request_name: String,
    pub values: Option<ValueMap>,
    pub error: Option<ErrorDto>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorDto {
    pub kind: &'static str,
    pub message: String,
}

fn to_dto(response: Response) -> FetchResponseDto {
    match response.outcome {
        Ok(values) => FetchResponseDto { request_name: response.request_name, values: Some(values), error: None },
        Err(err) => FetchResponseDto {
            request_name: response.request_name,
            values: None,
            error: Some(ErrorDto { kind: err.kind(), message: err.to_string() }),
        },
    }
}

fn to_requests(dto: FetchBatchDto) -> Vec<Request> {
    dto.requests
        .into_iter()
        .map(|r| Request { name: r.name, keys: r.keys, at_millis: r.at_millis })
        .collect()
}

fn count_keys(requests: &[Request]) -> usize {
    requests.iter().map(|r| r.keys.len()).sum::<usize>()
}

/// POST /v1/fetch/group-bys
pub(crate) async fn handle_fetch_group_bys(
    State(state): State<AppState>,
    Json(body): Json<FetchBatchDto>,
) -> impl IntoResponse {
    let start = Instant::now();
    let requests = to_requests(body);
    counter!("sawtooth.fetch.group_by.requests", requests.len() as u64);
    debug!(count = requests.len(), keys = count_keys(&requests), "fetching group-bys");

    let responses = state.group_by.fetch(requests).await;
    histogram!("sawtooth.fetch.group_by.latency_ms", start.elapsed().as_millis() as f64);

    let out: Vec<FetchResponseDto> = responses.into_iter().map(to_dto).collect();
    (StatusCode::OK, Json(json!({ "responses": out })))
}

/// POST /v1/fetch/join
pub(crate) async fn handle_fetch_join(
    State(state): State<AppState>,
    Json(body): Json<FetchBatchDto>,
) -> impl IntoResponse {
    let start = Instant::now();
    let requests = to_requests(body);
    counter!("sawtooth.fetch.join.requests", requests.len() as u64);
    debug!(count = requests.len(), "fetching joins");

    let responses = state.sampler.fetch(requests).await;
    histogram!("sawtooth.fetch.join.latency_ms", start.elapsed().as_millis() as f64);

    let out: Vec<FetchResponseDto> = responses.into_iter().map(to_dto).collect();
    (StatusCode::OK, Json(json!({ "responses": out })))
}

/// GET /health
pub(crate) async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

/// GET /ready
pub(crate) async fn ready_check(State(_state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ready"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use sawtooth_cache::ServingInfoCache;
    use sawtooth_config::RuntimeConfig;
    use sawtooth_fetch::{GroupByFetcher, JoinPlanner, LoggingSampler};
    use sawtooth_kvstore::InMemoryKvStore;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::registry::{RegistryFile, StaticJoinLoader, StaticMetadataLoader, TracingLogSink};

    fn build_state() -> AppState {
        let registry = RegistryFile::load_from_str(
            r#"
            [feature_sets.user_profile]
            key_schema = [["user", "string"]]
            output_columns = ["plan"]
            accuracy = "snapshot"
            data_model = "events"
            batch_end_millis = 0
            "#,
        )
        .unwrap();

        let loader = StaticMetadataLoader::new(&registry);
        let store = Arc::new(InMemoryKvStore::new());
        let cache = Arc::new(ServingInfoCache::new(loader, Duration::from_secs(60)));
        let group_by = Arc::new(GroupByFetcher::new(cache, store, 4, Duration::from_secs(10)));
        let join_loader = StaticJoinLoader::new(&registry, 1.0);
        let planner = Arc::new(JoinPlanner::new(join_loader, group_by.clone()));
        let sampler =
            Arc::new(LoggingSampler::new(planner, Arc::new(TracingLogSink), Duration::from_secs(60), false));

        AppState { group_by, sampler, config: Arc::new(RuntimeConfig::default()) }
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = crate::router(build_state());
        let response = app
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn fetch_group_bys_returns_missing_metadata_error() {
        let app = crate::router(build_state());
        let body = json!({ "requests": [{ "name": "unknown_feature_set", "keys": {} }] });
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/fetch/group-bys")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
