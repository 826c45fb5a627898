use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use super::server::WebState;
use crate::logs::{CollectError, FileContent, HostResult, LogQuery};

/// API routes
pub fn api_routes() -> Router<Arc<WebState>> {
    Router::new()
        .route("/logs", get(local_logs))
        .route("/cluster/logs", get(cluster_logs))
        .route("/health", get(health))
}

/// Query parameters shared by local and cluster requests. Everything is taken
/// as a raw string so a bad `lines` value falls back to the default instead
/// of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct LogsParams {
    pub lines: Option<String>,
    #[serde(rename = "excludedFileTypes")]
    pub excluded_file_types: Option<String>,
    pub search: Option<String>,
}

impl LogsParams {
    fn to_query(&self, default_lines: usize) -> LogQuery {
        LogQuery::from_params(
            self.lines.as_deref(),
            self.excluded_file_types.as_deref(),
            self.search.as_deref(),
            default_lines,
        )
    }
}

async fn local_logs(
    State(state): State<Arc<WebState>>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Vec<FileContent>>, (StatusCode, String)> {
    let query = params.to_query(state.default_lines);

    match state.collector.collect(&query).await {
        Ok(files) => Ok(Json(files)),
        Err(e) => {
            let status = match e {
                CollectError::DirectoryUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                CollectError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
                CollectError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            };
            Err((status, e.to_string()))
        }
    }
}

async fn cluster_logs(
    State(state): State<Arc<WebState>>,
    Query(params): Query<LogsParams>,
) -> Json<Vec<HostResult>> {
    let query = params.to_query(state.default_lines);
    Json(state.aggregator.aggregate(&query).await)
}

async fn health(State(state): State<Arc<WebState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "peers": state.aggregator.peers().len(),
    }))
}
