use std::{collections::HashMap, sync::Arc, time::Duration};

use metrics::counter;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use gateway_config::RoutingConfig;

use super::window::Breaker;

/// The observed outcome of one real client request against an upstream.
#[derive(Debug, Clone, Default)]
pub struct RequestOutcome {
    /// Method the request carried (first method for batches).
    pub method: String,
    /// Total time the upstream took.
    pub duration: Duration,
    /// HTTP status, when a response arrived.
    pub http_code: Option<u16>,
    /// JSON-RPC error code, when the response carried one.
    pub json_rpc_code: Option<i64>,
    /// Transport-level error string, when the request never completed.
    pub error: Option<String>,
}

/// Passive health check fed by real traffic rather than synthetic probes.
///
/// Failures are classified against the configured HTTP/JSON-RPC code
/// patterns and error substrings; slow requests are classified against the
/// (per-method) latency thresholds. Either class trips its breaker when the
/// failure rate over the detection window exceeds the configured rate, and a
/// tripped breaker holds for the ban window.
pub struct ErrorLatencyChecker {
    upstream_id: String,
    routing: RoutingConfig,
    origin: Instant,
    error_breaker: Option<Mutex<Breaker>>,
    latency_breakers: Option<Mutex<HashMap<String, Breaker>>>,
}

impl std::fmt::Debug for ErrorLatencyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLatencyChecker")
            .field("upstream_id", &self.upstream_id)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

// === impl ErrorLatencyChecker ===

impl ErrorLatencyChecker {
    /// Creates a checker for `upstream_id`. With neither an `errors` nor a
    /// `latency` policy configured the checker is inert and always passes.
    pub fn new(upstream_id: impl Into<String>, routing: &RoutingConfig) -> Arc<Self> {
        let error_breaker = routing.errors.as_ref().map(|errors| {
            Mutex::new(Breaker::new(errors.rate, routing.detection_window, routing.ban_window))
        });
        Arc::new(Self {
            upstream_id: upstream_id.into(),
            routing: routing.clone(),
            origin: Instant::now(),
            error_breaker,
            latency_breakers: routing.latency.as_ref().map(|_| Mutex::new(HashMap::new())),
        })
    }

    /// Whether any passive policy is configured.
    pub fn is_enabled(&self) -> bool {
        self.error_breaker.is_some() || self.latency_breakers.is_some()
    }

    /// Feeds one observed request outcome into the windows.
    pub fn record_request(&self, outcome: &RequestOutcome) {
        let now_sec = self.now_sec();

        if let (Some(breaker), Some(errors)) = (&self.error_breaker, &self.routing.errors) {
            let failed = outcome.http_code.is_some_and(|code| {
                errors.http_codes.iter().any(|p| code_matches(p, &code.to_string()))
            }) || outcome.json_rpc_code.is_some_and(|code| {
                errors.json_rpc_codes.iter().any(|p| code_matches(p, &code.to_string()))
            }) || outcome.error.as_deref().is_some_and(|err| {
                errors.error_strings.iter().any(|s| err.contains(s.as_str()))
            });
            if failed {
                counter!(
                    "gateway_upstream_passive_errors_total",
                    "upstream" => self.upstream_id.clone()
                )
                .increment(1);
                debug!(
                    target: "health",
                    upstream = %self.upstream_id,
                    method = %outcome.method,
                    "request counted as failed"
                );
            }
            breaker.lock().record(now_sec, failed);
        }

        if let (Some(breakers), Some(latency)) = (&self.latency_breakers, &self.routing.latency) {
            let slow = outcome.duration > latency.threshold_for(&outcome.method);
            let rate = self
                .routing
                .errors
                .as_ref()
                .map_or(gateway_config::DEFAULT_ERROR_RATE, |errors| errors.rate);
            breakers
                .lock()
                .entry(outcome.method.clone())
                .or_insert_with(|| {
                    Breaker::new(rate, self.routing.detection_window, self.routing.ban_window)
                })
                .record(now_sec, slow);
        }
    }

    /// Whether this upstream may serve the given methods.
    pub fn is_passing(&self, methods: &[String]) -> bool {
        let now_sec = self.now_sec();

        if let Some(breaker) = &self.error_breaker {
            if !breaker.lock().is_passing(now_sec) {
                return false;
            }
        }

        if let Some(breakers) = &self.latency_breakers {
            let mut breakers = breakers.lock();
            for method in methods {
                if let Some(breaker) = breakers.get_mut(method) {
                    if !breaker.is_passing(now_sec) {
                        return false;
                    }
                }
            }
        }

        true
    }

    fn now_sec(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

/// Matches a code against a pattern where `x` wildcards a digit: `5xx`
/// matches any 500-class status, `-32xxx` any -32000-class rpc code.
fn code_matches(pattern: &str, code: &str) -> bool {
    pattern.len() == code.len()
        && pattern
            .chars()
            .zip(code.chars())
            .all(|(p, c)| p.eq_ignore_ascii_case(&'x') && c.is_ascii_digit() || p == c)
}
