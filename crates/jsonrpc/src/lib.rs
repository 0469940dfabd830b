//! JSON-RPC wire types for the gateway.
//!
//! The gateway is a pass-through: bodies are decoded just far enough to route
//! and cache them, and anything that fails to decode is carried verbatim as
//! raw bytes so the client still sees exactly what the upstream said.
//!
//! Decoding always attempts the single-body shape first and falls back to the
//! batch shape, preserving which of the two the sender used: a one-element
//! array stays an array on the way back out.

mod metadata;
mod request;
mod response;

pub use metadata::{
    is_archive_method, is_log_method, is_state_method, is_trace_method, RequestMetadata,
};
pub use request::{RequestBody, SingleRequestBody};
pub use response::{JsonRpcError, ResponseBody, SingleResponseBody};

use bytes::Bytes;

/// The protocol version string every body carries.
pub const JSONRPC_VERSION: &str = "2.0";

/// A body that could not be decoded, with the raw bytes preserved so the
/// surrounding layer can pass them through unchanged.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode json-rpc body: {source}")]
pub struct DecodeError {
    /// The undecodable payload.
    pub body: Bytes,
    /// The underlying parser error (for the batch attempt).
    #[source]
    pub source: serde_json::Error,
}
