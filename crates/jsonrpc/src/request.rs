use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DecodeError;

/// A single JSON-RPC request.
///
/// `id` distinguishes three states: absent (a notification, produces no
/// response), `null`, and a concrete integer. All three survive a round-trip.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SingleRequestBody {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Method name, e.g. `eth_blockNumber`.
    pub method: String,
    /// Positional parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request id; `None` marks a notification.
    #[serde(
        default,
        with = "serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Option<i64>>,
}

impl SingleRequestBody {
    /// Creates a request with the given method, params and id.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<i64>) -> Self {
        Self {
            jsonrpc: crate::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    /// Whether this request is a notification (carries no id at all).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A decoded request body, preserving whether the sender used the single or
/// the batch shape.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// A bare request object.
    Single(SingleRequestBody),
    /// An array of requests. A one-element array stays a batch.
    Batch(Vec<SingleRequestBody>),
}

// === impl RequestBody ===

impl RequestBody {
    /// Decodes a request body, attempting the single shape first and the
    /// batch shape second.
    ///
    /// On failure the raw bytes travel with the error so callers can pass
    /// them through.
    pub fn decode(body: Bytes) -> Result<Self, DecodeError> {
        if let Ok(single) = serde_json::from_slice::<SingleRequestBody>(&body) {
            return Ok(Self::Single(single));
        }
        match serde_json::from_slice::<Vec<SingleRequestBody>>(&body) {
            Ok(batch) => Ok(Self::Batch(batch)),
            Err(source) => Err(DecodeError { body, source }),
        }
    }

    /// Serializes the body back to JSON, in the shape it arrived in.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Method names in request order, one entry per sub-request.
    pub fn methods(&self) -> Vec<&str> {
        match self {
            Self::Single(single) => vec![single.method.as_str()],
            Self::Batch(batch) => batch.iter().map(|r| r.method.as_str()).collect(),
        }
    }

    /// The method of a single-shaped body.
    pub fn single_method(&self) -> Option<&str> {
        match self {
            Self::Single(single) => Some(single.method.as_str()),
            Self::Batch(_) => None,
        }
    }

    /// The request params of a single-shaped body.
    pub fn single_params(&self) -> Option<&Value> {
        match self {
            Self::Single(single) => single.params.as_ref(),
            Self::Batch(_) => None,
        }
    }

    /// Whether the sender used the single shape.
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}
