//! The probe transport used by the active health checks.

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use gateway_config::UpstreamConfig;

/// Timeout applied to every probe HTTP call.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A stream of chain-tip heights from a `newHeads` subscription.
pub type NewHeadsStream = Pin<Box<dyn Stream<Item = Result<u64, ProbeError>> + Send>>;

/// Result of an `eth_syncing` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The node reports it is fully synced.
    Synced,
    /// The node reports an active sync.
    Syncing,
}

/// Errors produced by the probe transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    /// The call never produced a JSON-RPC response.
    #[error("probe transport error: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error.
    #[error("probe rpc error {code}: {message}")]
    JsonRpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the node.
        message: String,
    },
    /// The node answered with something unparseable.
    #[error("malformed probe response: {0}")]
    Malformed(String),
}

impl ProbeError {
    /// Whether the node told us it does not serve this method at all.
    ///
    /// Checkers use this as a one-time permanent opt-out.
    pub fn is_method_not_supported(&self) -> bool {
        match self {
            Self::JsonRpc { code, message } => {
                *code == -32601
                    || message.to_lowercase().contains("method not found")
                    || message.to_lowercase().contains("not supported")
            }
            _ => false,
        }
    }
}

/// The capability set health checks need from an Ethereum node.
///
/// Swappable in tests; see `test_utils::MockProbe`.
#[async_trait]
pub trait EthProbe: Send + Sync + 'static {
    /// Current chain-tip height (`eth_blockNumber`).
    async fn block_number(&self) -> Result<u64, ProbeError>;

    /// Sync state (`eth_syncing`).
    async fn sync_status(&self) -> Result<SyncStatus, ProbeError>;

    /// Connected peer count (`net_peerCount`).
    async fn peer_count(&self) -> Result<u64, ProbeError>;

    /// Subscribes to `newHeads` over websocket.
    async fn subscribe_new_heads(&self) -> Result<NewHeadsStream, ProbeError>;
}

/// Probe client speaking plain JSON-RPC over HTTP, with an optional
/// websocket endpoint for `newHeads`.
#[derive(Debug)]
pub struct JsonRpcProbe {
    client: reqwest::Client,
    http_url: String,
    ws_url: Option<String>,
    basic_auth: Option<(String, String)>,
}

// === impl JsonRpcProbe ===

impl JsonRpcProbe {
    /// Builds a probe for `upstream`, reusing its auth and headers so the
    /// probe sees the same view of the node as real traffic.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, ProbeError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for header in &upstream.request_headers {
            let name: reqwest::header::HeaderName = header
                .key
                .parse()
                .map_err(|_| ProbeError::Transport(format!("invalid header {}", header.key)))?;
            let value = header
                .value
                .parse()
                .map_err(|_| ProbeError::Transport(format!("invalid value for {}", header.key)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|err| ProbeError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            http_url: upstream.http_url.clone(),
            ws_url: upstream.ws_url.clone(),
            basic_auth: upstream
                .basic_auth
                .as_ref()
                .filter(|auth| !auth.username.is_empty() && !auth.password.is_empty())
                .map(|auth| (auth.username.clone(), auth.password.clone())),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ProbeError> {
        let mut request = self.client.post(&self.http_url).json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        }));
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|err| ProbeError::Transport(err.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|err| ProbeError::Malformed(err.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(ProbeError::JsonRpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| ProbeError::Malformed("response without result".to_string()))
    }
}

#[async_trait]
impl EthProbe for JsonRpcProbe {
    async fn block_number(&self) -> Result<u64, ProbeError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result)
    }

    async fn sync_status(&self) -> Result<SyncStatus, ProbeError> {
        let result = self.call("eth_syncing", json!([])).await?;
        match result {
            Value::Bool(false) => Ok(SyncStatus::Synced),
            // Anything else (sync-progress object, `true`) means syncing.
            Value::Bool(true) | Value::Object(_) => Ok(SyncStatus::Syncing),
            other => Err(ProbeError::Malformed(format!("unexpected eth_syncing result: {other}"))),
        }
    }

    async fn peer_count(&self) -> Result<u64, ProbeError> {
        let result = self.call("net_peerCount", json!([])).await?;
        parse_hex_u64(&result)
    }

    async fn subscribe_new_heads(&self) -> Result<NewHeadsStream, ProbeError> {
        let url = self
            .ws_url
            .clone()
            .ok_or_else(|| ProbeError::Transport("no ws url configured".to_string()))?;

        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ProbeError::Transport(err.to_string()))?;

        let subscribe = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscribe",
            "params": ["newHeads"],
            "id": 1,
        });
        ws.send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|err| ProbeError::Transport(err.to_string()))?;

        // First frame acknowledges the subscription.
        match ws.next().await {
            Some(Ok(Message::Text(ack))) => {
                let ack: Value = serde_json::from_str(&ack)
                    .map_err(|err| ProbeError::Malformed(err.to_string()))?;
                if ack.get("result").is_none() {
                    return Err(ProbeError::Malformed(format!("subscription rejected: {ack}")));
                }
                debug!(target: "health", %url, "newHeads subscription established");
            }
            Some(Ok(other)) => {
                return Err(ProbeError::Malformed(format!("unexpected ack frame: {other:?}")))
            }
            Some(Err(err)) => return Err(ProbeError::Transport(err.to_string())),
            None => return Err(ProbeError::Transport("ws closed before ack".to_string())),
        }

        let stream = futures::stream::unfold(ws, |mut ws| async move {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(frame))) => {
                        return Some((parse_new_head(&frame), ws));
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(err)) => {
                        return Some((Err(ProbeError::Transport(err.to_string())), ws));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Extracts the block number out of a `newHeads` notification frame.
fn parse_new_head(frame: &str) -> Result<u64, ProbeError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|err| ProbeError::Malformed(err.to_string()))?;
    let number = value
        .pointer("/params/result/number")
        .ok_or_else(|| ProbeError::Malformed(format!("notification without number: {value}")))?;
    parse_hex_u64(number)
}

/// Parses a `0x`-prefixed quantity.
fn parse_hex_u64(value: &Value) -> Result<u64, ProbeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| ProbeError::Malformed(format!("expected hex quantity, got {value}")))?;
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|err| ProbeError::Malformed(format!("bad hex quantity {raw}: {err}")))
}
