use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::DecodeError;

/// A single JSON-RPC response.
///
/// `result` distinguishes "omitted" from an explicit `null`; both are
/// preserved through a round-trip. Responses are decoded leniently since the
/// gateway forwards whatever the upstream produced.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SingleResponseBody {
    /// Protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Call result; `Some(Value::Null)` is an explicit `null`.
    #[serde(
        default,
        deserialize_with = "deserialize_explicit",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// JSON-RPC level error, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Response id.
    #[serde(
        default,
        with = "serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Option<i64>>,
}

/// Maps any present value, including `null`, to `Some` so an explicit `null`
/// result is not collapsed into an omitted one.
fn deserialize_explicit<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl SingleResponseBody {
    /// A successful response carrying `result`.
    pub fn new_result(result: Value, id: Option<i64>) -> Self {
        Self {
            jsonrpc: Some(crate::JSONRPC_VERSION.to_string()),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    /// An error response.
    pub fn new_error(error: JsonRpcError, id: Option<i64>) -> Self {
        Self {
            jsonrpc: Some(crate::JSONRPC_VERSION.to_string()),
            result: None,
            error: Some(error),
            id: Some(id),
        }
    }

    /// Whether the upstream reported a JSON-RPC level error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The `error` member of a response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A decoded response body, single or batch, matching the shape on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// A bare response object.
    Single(SingleResponseBody),
    /// An array of responses.
    Batch(Vec<SingleResponseBody>),
}

// === impl ResponseBody ===

impl ResponseBody {
    /// Decodes a response body, single shape first, then batch.
    pub fn decode(body: Bytes) -> Result<Self, DecodeError> {
        if let Ok(single) = serde_json::from_slice::<SingleResponseBody>(&body) {
            return Ok(Self::Single(single));
        }
        match serde_json::from_slice::<Vec<SingleResponseBody>>(&body) {
            Ok(batch) => Ok(Self::Batch(batch)),
            Err(source) => Err(DecodeError { body, source }),
        }
    }

    /// Serializes the body back out in the shape it arrived in.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Iterates over the contained responses regardless of shape.
    pub fn iter(&self) -> impl Iterator<Item = &SingleResponseBody> {
        match self {
            Self::Single(single) => std::slice::from_ref(single).iter(),
            Self::Batch(batch) => batch.iter(),
        }
    }

    /// Whether any contained response carries a JSON-RPC level error.
    pub fn has_error(&self) -> bool {
        self.iter().any(SingleResponseBody::is_error)
    }
}
