//! End-to-end routing tests against local origin servers.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use assert_matches::assert_matches;
use axum::{extract::State, response::IntoResponse, routing::post};
use bytes::Bytes;
use serde_json::json;

use gateway_cache::{MemoryBackend, RpcCache};
use gateway_chain_state::{ChainMetadataStore, ChainStateHandle};
use gateway_config::{ChainCacheConfig, ChainConfig, GatewayConfig};
use gateway_health::{test_utils::MockProbe, EthProbe, HealthCheckManager, SyncStatus};
use gateway_jsonrpc::{RequestBody, ResponseBody};
use gateway_router::{default_routing_strategy, RequestExecutor, Router, RouterError};

/// A scriptable origin: counts hits and answers with a fixed body.
#[derive(Clone)]
struct Origin {
    hits: Arc<AtomicUsize>,
    body: Bytes,
    status: u16,
    echo_headers: bool,
}

async fn origin_handler(
    State(origin): State<Origin>,
    headers: axum::http::HeaderMap,
    _body: Bytes,
) -> impl IntoResponse {
    origin.hits.fetch_add(1, Ordering::SeqCst);
    let body = if origin.echo_headers {
        let auth = headers
            .get("authorization")
            .map(|v| v.to_str().unwrap_or_default().to_string())
            .unwrap_or_default();
        let tier = headers
            .get("x-api-tier")
            .map(|v| v.to_str().unwrap_or_default().to_string())
            .unwrap_or_default();
        Bytes::from(
            json!({"jsonrpc": "2.0", "result": {"auth": auth, "tier": tier}, "id": 1}).to_string(),
        )
    } else {
        origin.body.clone()
    };
    (
        axum::http::StatusCode::from_u16(origin.status).unwrap(),
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
}

async fn spawn_origin(body: &str, status: u16, echo_headers: bool) -> (String, Arc<AtomicUsize>) {
    let origin = Origin {
        hits: Arc::new(AtomicUsize::new(0)),
        body: Bytes::from(body.to_string()),
        status,
        echo_headers,
    };
    let hits = Arc::clone(&origin.hits);
    let app = axum::Router::new().route("/", post(origin_handler)).with_state(origin);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), hits)
}

struct TestRouter {
    router: Router,
    // Keeps the store worker alive for the duration of the test.
    _store: ChainStateHandle,
}

async fn build_router(
    chain_yaml: String,
    probes: Vec<(&str, MockProbe)>,
    cache: Option<Arc<RpcCache>>,
) -> TestRouter {
    let chain: ChainConfig =
        GatewayConfig::from_yaml(&chain_yaml).unwrap().chains.remove(0);
    let store = ChainMetadataStore::spawn(chain.upstreams.len());
    let probe_map: HashMap<String, Arc<dyn EthProbe>> = probes
        .into_iter()
        .map(|(id, probe)| (id.to_string(), Arc::new(probe) as Arc<dyn EthProbe>))
        .collect();
    let health = Arc::new(HealthCheckManager::new(&chain, store.clone(), probe_map));
    health.run_checks_once().await;
    let strategy = default_routing_strategy(&chain, &health, &store);
    let router = Router::new(&chain, health, strategy, RequestExecutor::new(cache));
    TestRouter { router, _store: store }
}

fn two_tier_yaml(primary_url: &str, fallback_url: &str) -> String {
    format!(
        r"
chains:
  - chainName: testchain
    groups:
      - {{id: primary, priority: 0}}
      - {{id: fallback, priority: 1}}
    upstreams:
      - {{id: u1, httpUrl: '{primary_url}', group: primary}}
      - {{id: u2, httpUrl: '{fallback_url}', group: fallback}}
"
    )
}

fn decode(raw: &str) -> RequestBody {
    RequestBody::decode(Bytes::from(raw.to_string())).unwrap()
}

#[tokio::test]
async fn routes_to_primary_when_both_healthy() {
    let (primary_url, primary_hits) =
        spawn_origin(r#"{"jsonrpc":"2.0","result":"0x64","id":1}"#, 200, false).await;
    let (fallback_url, fallback_hits) =
        spawn_origin(r#"{"jsonrpc":"2.0","result":"0x64","id":1}"#, 200, false).await;

    let test = build_router(
        two_tier_yaml(&primary_url, &fallback_url),
        vec![("u1", MockProbe::default()), ("u2", MockProbe::default())],
        None,
    )
    .await;

    let body = decode(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#);
    let (upstream_id, execution) = test.router.route("test-client", &body).await.unwrap();

    assert_eq!(upstream_id, "u1");
    assert_eq!(execution.raw.status, 200);
    assert_eq!(primary_hits.load(Ordering::SeqCst), 1);
    assert_eq!(fallback_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fails_over_when_primary_is_syncing() {
    let (primary_url, primary_hits) =
        spawn_origin(r#"{"jsonrpc":"2.0","result":"0x64","id":1}"#, 200, false).await;
    let (fallback_url, fallback_hits) =
        spawn_origin(r#"{"jsonrpc":"2.0","result":"0x64","id":1}"#, 200, false).await;

    let syncing = MockProbe::default();
    syncing.set_sync_status(Ok(SyncStatus::Syncing));

    let test = build_router(
        two_tier_yaml(&primary_url, &fallback_url),
        vec![("u1", syncing), ("u2", MockProbe::default())],
        None,
    )
    .await;

    let body = decode(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#);
    let (upstream_id, execution) = test.router.route("test-client", &body).await.unwrap();

    assert_eq!(upstream_id, "u2");
    let ResponseBody::Single(single) = &execution.response else { panic!("expected single") };
    assert_eq!(single.result, Some(json!("0x64")));
    assert_eq!(primary_hits.load(Ordering::SeqCst), 0);
    assert_eq!(fallback_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_healthy_upstreams_without_always_route() {
    let (url, hits) = spawn_origin(r#"{"jsonrpc":"2.0","result":"0x1","id":1}"#, 200, false).await;

    let syncing = MockProbe::default();
    syncing.set_sync_status(Ok(SyncStatus::Syncing));

    let test = build_router(
        two_tier_yaml(&url, &url),
        vec![("u1", syncing.clone()), ("u2", syncing)],
        None,
    )
    .await;

    let body = decode(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#);
    let err = test.router.route("test-client", &body).await.unwrap_err();
    assert_matches!(err, RouterError::NoHealthyUpstreams);
    assert_eq!(format!("{err}"), "no healthy upstreams");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn always_route_routes_unhealthy_fleet() {
    let (url, hits) = spawn_origin(r#"{"jsonrpc":"2.0","result":"0x1","id":1}"#, 200, false).await;

    let syncing = MockProbe::default();
    syncing.set_sync_status(Ok(SyncStatus::Syncing));

    let yaml = format!(
        r"
chains:
  - chainName: testchain
    upstreams:
      - {{id: u1, httpUrl: '{url}'}}
    routing:
      alwaysRoute: true
"
    );
    let test = build_router(yaml, vec![("u1", syncing)], None).await;

    let body = decode(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#);
    let (upstream_id, _) = test.router.route("test-client", &body).await.unwrap();
    assert_eq!(upstream_id, "u1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn forwards_auth_and_request_headers() {
    let (url, _hits) = spawn_origin("", 200, true).await;

    let yaml = format!(
        r"
chains:
  - chainName: testchain
    upstreams:
      - id: u1
        httpUrl: '{url}'
        basicAuth:
          username: gateway
          password: hunter2
        requestHeaders:
          - {{key: x-api-tier, value: premium}}
"
    );
    let test = build_router(yaml, vec![("u1", MockProbe::default())], None).await;

    let body = decode(r#"{"jsonrpc":"2.0","method":"eth_chainId","params":[],"id":1}"#);
    let (_, execution) = test.router.route("test-client", &body).await.unwrap();

    let ResponseBody::Single(single) = &execution.response else { panic!("expected single") };
    let result = single.result.as_ref().unwrap();
    // "gateway:hunter2" base64-encoded.
    assert_eq!(result["auth"], json!("Basic Z2F0ZXdheTpodW50ZXIy"));
    assert_eq!(result["tier"], json!("premium"));
}

#[tokio::test]
async fn undecodable_body_passes_through_raw() {
    let (url, _hits) = spawn_origin("<html>upstream exploded</html>", 200, false).await;

    let yaml = format!(
        r"
chains:
  - chainName: testchain
    upstreams:
      - {{id: u1, httpUrl: '{url}'}}
"
    );
    let test = build_router(yaml, vec![("u1", MockProbe::default())], None).await;

    let body = decode(r#"{"jsonrpc":"2.0","method":"eth_chainId","params":[],"id":1}"#);
    let err = test.router.route("test-client", &body).await.unwrap_err();
    assert_matches!(
        err,
        RouterError::Decode(decode_err)
            if decode_err.body == Bytes::from_static(b"<html>upstream exploded</html>")
    );
}

#[tokio::test]
async fn batch_bodies_round_trip() {
    let (url, _hits) = spawn_origin(
        r#"[{"jsonrpc":"2.0","result":"0x1","id":1},
            {"jsonrpc":"2.0","error":{"code":-32000,"message":"oops"},"id":2}]"#,
        200,
        false,
    )
    .await;

    let yaml = format!(
        r"
chains:
  - chainName: testchain
    upstreams:
      - {{id: u1, httpUrl: '{url}'}}
"
    );
    let test = build_router(yaml, vec![("u1", MockProbe::default())], None).await;

    let body = decode(
        r#"[{"jsonrpc":"2.0","method":"eth_chainId","id":1},
            {"jsonrpc":"2.0","method":"eth_blockNumber","id":2}]"#,
    );
    let (_, execution) = test.router.route("test-client", &body).await.unwrap();

    let ResponseBody::Batch(batch) = &execution.response else { panic!("expected batch") };
    assert_eq!(batch.len(), 2);
    assert!(execution.response.has_error());
}

#[tokio::test]
async fn cacheable_requests_hit_origin_once() {
    let (url, hits) =
        spawn_origin(r#"{"jsonrpc":"2.0","result":{"status":"0x1"},"id":1}"#, 200, false).await;

    let cache_config = ChainCacheConfig {
        default_ttl: Duration::from_secs(10),
        ..Default::default()
    };
    let backend = Arc::new(MemoryBackend::new());
    let cache =
        Arc::new(RpcCache::new("testchain", cache_config, backend.clone(), backend));

    let yaml = format!(
        r"
chains:
  - chainName: testchain
    upstreams:
      - {{id: u1, httpUrl: '{url}'}}
"
    );
    let test = build_router(yaml, vec![("u1", MockProbe::default())], Some(cache)).await;

    let first = decode(
        r#"{"jsonrpc":"2.0","method":"eth_getTransactionReceipt","params":["0xabc"],"id":7}"#,
    );
    let (_, execution) = test.router.route("test-client", &first).await.unwrap();
    let ResponseBody::Single(single) = &execution.response else { panic!("expected single") };
    assert_eq!(single.id, Some(Some(7)));

    // Identical params, different id: served from cache with the new id.
    let second = decode(
        r#"{"jsonrpc":"2.0","method":"eth_getTransactionReceipt","params":["0xabc"],"id":8}"#,
    );
    let (_, execution) = test.router.route("test-client", &second).await.unwrap();
    let ResponseBody::Single(single) = &execution.response else { panic!("expected single") };
    assert_eq!(single.id, Some(Some(8)));
    assert_eq!(single.result, Some(json!({"status": "0x1"})));

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
