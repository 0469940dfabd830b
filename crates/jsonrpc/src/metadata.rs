use crate::RequestBody;

/// Methods that read historical state and therefore need an archive node
/// unless a full node explicitly opts in.
const STATE_METHODS: &[&str] = &[
    "eth_getBalance",
    "eth_getStorageAt",
    "eth_getTransactionCount",
    "eth_getCode",
    "eth_call",
    "eth_estimateGas",
];

/// The `trace_*` family.
const TRACE_METHODS: &[&str] = &[
    "trace_filter",
    "trace_block",
    "trace_get",
    "trace_transaction",
    "trace_call",
    "trace_callMany",
    "trace_rawTransaction",
    "trace_replayBlockTransactions",
    "trace_replayTransaction",
];

const LOG_METHOD: &str = "eth_getLogs";

/// Whether `method` requires historical state.
pub fn is_state_method(method: &str) -> bool {
    STATE_METHODS.contains(&method)
}

/// Whether `method` belongs to the `trace_*` family.
pub fn is_trace_method(method: &str) -> bool {
    TRACE_METHODS.contains(&method)
}

/// Whether `method` is the log query method.
pub fn is_log_method(method: &str) -> bool {
    method == LOG_METHOD
}

/// Whether `method` is archive-class (state or trace family) and must not run
/// on a full node without an explicit opt-in.
pub fn is_archive_method(method: &str) -> bool {
    is_state_method(method) || is_trace_method(method)
}

/// Routing-relevant facts about an incoming request, derived once per
/// request and consumed by the node filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    /// Method names in request order, one per sub-request.
    pub methods: Vec<String>,
    /// Any method requires historical state.
    pub is_state_required: bool,
    /// Any method is a `trace_*` call.
    pub is_trace_method: bool,
    /// Any method queries logs.
    pub is_log_method: bool,
}

impl RequestMetadata {
    /// Derives metadata from a decoded body.
    pub fn from_body(body: &RequestBody) -> Self {
        let methods: Vec<String> = body.methods().into_iter().map(str::to_string).collect();
        Self {
            is_state_required: methods.iter().any(|m| is_state_method(m)),
            is_trace_method: methods.iter().any(|m| is_trace_method(m)),
            is_log_method: methods.iter().any(|m| is_log_method(m)),
            methods,
        }
    }
}
