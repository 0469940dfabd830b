//! The HTTP rim: per-chain JSON-RPC routes plus health and readiness.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde_json::json;
use tracing::debug;

use gateway_jsonrpc::RequestBody;
use gateway_router::{Router, RouterError};

/// Header clients use to tag themselves in request metrics.
const CLIENT_HEADER: &str = "x-client-id";

#[derive(Clone)]
pub(crate) struct AppState {
    routers: Arc<HashMap<String, Arc<Router>>>,
}

/// Builds the axum application over the per-chain routers.
pub(crate) fn app(routers: HashMap<String, Arc<Router>>) -> axum::Router {
    let state = AppState { routers: Arc::new(routers) };
    axum::Router::new()
        .route("/", post(serve_default_chain))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/:chain", post(serve_chain))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<AppState>) -> Response {
    if state.routers.values().all(|router| router.is_initialized()) {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing").into_response()
    }
}

/// `POST /` serves single-chain deployments without a path segment.
async fn serve_default_chain(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.routers.len() != 1 {
        return (StatusCode::NOT_FOUND, "specify a chain").into_response();
    }
    let router = state.routers.values().next().expect("one router");
    handle(Arc::clone(router), headers, body).await
}

async fn serve_chain(
    Path(chain): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(router) = state.routers.get(&chain) else {
        return (StatusCode::NOT_FOUND, format!("unknown chain {chain}")).into_response();
    };
    handle(Arc::clone(router), headers, body).await
}

async fn handle(router: Arc<Router>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json_content_type(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json").into_response();
    }

    let request = match RequestBody::decode(body) {
        Ok(request) => request,
        Err(err) => {
            debug!(target: "server", %err, "rejecting undecodable request");
            return parse_error_response();
        }
    };

    let client = headers
        .get(CLIENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    match router.route(client, &request).await {
        Ok((_, execution)) => json_response(
            StatusCode::from_u16(execution.raw.status).unwrap_or(StatusCode::OK),
            execution.raw.body,
        ),
        Err(RouterError::NoHealthyUpstreams) => {
            (StatusCode::SERVICE_UNAVAILABLE, "no healthy upstreams").into_response()
        }
        // The upstream answered something unparseable; hand it through as-is.
        Err(RouterError::Decode(err)) => json_response(StatusCode::OK, err.body),
        Err(RouterError::Origin(err)) => {
            let status = err
                .status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (status, err.to_string()).into_response()
        }
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_lowercase().starts_with("application/json"))
}

fn json_response(status: StatusCode, body: Bytes) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn parse_error_response() -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "error": {"code": -32700, "message": "Parse error"},
        "id": null,
    });
    (
        StatusCode::BAD_REQUEST,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
