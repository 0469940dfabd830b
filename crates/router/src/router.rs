use std::{collections::HashMap, sync::Arc, time::Instant};

use metrics::{counter, histogram};
use tracing::{debug, warn};

use gateway_chain_state::ChainStateHandle;
use gateway_config::{ChainConfig, UpstreamConfig};
use gateway_health::{HealthCheckManager, RequestOutcome};
use gateway_jsonrpc::{DecodeError, RequestBody, RequestMetadata};
use gateway_routing::{
    build_priority_map, AlwaysRouteFilteringStrategy, AndFilter, AreMethodsAllowed,
    FilteringRoutingStrategy, IsAtMaxHeightForGroup, IsCloseToGlobalMaxHeight, NodeFilter,
    PriorityRoundRobinStrategy, PriorityToUpstreamsMap, RoutingError, RoutingStrategy,
    TAG_MAX_HEIGHT_FOR_GROUP, TAG_NEAR_GLOBAL_MAX_HEIGHT,
};

use crate::executor::{ExecuteError, ExecutionResult, OriginError, RequestExecutor};

/// Errors surfaced by [`Router::route`].
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No upstream survived filtering; mapped to HTTP 503.
    #[error("no healthy upstreams")]
    NoHealthyUpstreams,
    /// The outbound call failed; upstream status is preserved when known.
    #[error(transparent)]
    Origin(#[from] OriginError),
    /// The upstream body did not decode; raw bytes pass through at HTTP 200.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<ExecuteError> for RouterError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Origin(err) => Self::Origin(err),
            ExecuteError::Decode(err) => Self::Decode(err),
        }
    }
}

/// The default routing pipeline for a chain: `Healthy`, `NearGlobalMaxHeight`
/// and `MaxHeightForGroup` over the health view, `MethodsAllowed` over the
/// method policy, priority round-robin underneath.
///
/// The height filters are removable, so an entirely-lagging fleet still
/// routes; with `alwaysRoute` set the strategy falls all the way back to the
/// unfiltered map.
pub fn default_routing_strategy(
    chain: &ChainConfig,
    health: &Arc<HealthCheckManager>,
    store: &ChainStateHandle,
) -> Arc<dyn RoutingStrategy> {
    let filters: Vec<Arc<dyn NodeFilter>> = vec![
        Arc::new(AndFilter::healthy(health)),
        Arc::new(IsCloseToGlobalMaxHeight::near_global_max(
            Arc::clone(health),
            store.clone(),
            chain.routing.max_blocks_behind,
        )),
        Arc::new(IsAtMaxHeightForGroup::new(Arc::clone(health), store.clone())),
        Arc::new(AreMethodsAllowed),
    ];
    let backing = Arc::new(PriorityRoundRobinStrategy::default());
    if chain.routing.always_route {
        Arc::new(AlwaysRouteFilteringStrategy::new(
            filters,
            vec![TAG_NEAR_GLOBAL_MAX_HEIGHT, TAG_MAX_HEIGHT_FOR_GROUP],
            backing,
            true,
        ))
    } else {
        Arc::new(FilteringRoutingStrategy::new(
            Arc::new(AndFilter::new(filters, "TopLevel", true)),
            backing,
        ))
    }
}

/// Routes decoded request bodies for one chain.
pub struct Router {
    chain_name: String,
    priority_map: PriorityToUpstreamsMap,
    upstreams_by_id: HashMap<String, Arc<UpstreamConfig>>,
    strategy: Arc<dyn RoutingStrategy>,
    health: Arc<HealthCheckManager>,
    executor: RequestExecutor,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("chain_name", &self.chain_name)
            .field("upstreams", &self.upstreams_by_id.len())
            .finish_non_exhaustive()
    }
}

// === impl Router ===

impl Router {
    /// Builds the router; the priority map is computed once and stays
    /// read-only.
    pub fn new(
        chain: &ChainConfig,
        health: Arc<HealthCheckManager>,
        strategy: Arc<dyn RoutingStrategy>,
        executor: RequestExecutor,
    ) -> Self {
        let priority_map = build_priority_map(&chain.upstreams, &chain.groups);
        let upstreams_by_id = priority_map
            .values()
            .flatten()
            .map(|upstream| (upstream.id.clone(), Arc::clone(upstream)))
            .collect();
        Self {
            chain_name: chain.chain_name.clone(),
            priority_map,
            upstreams_by_id,
            strategy,
            health,
            executor,
        }
    }

    /// The chain this router serves.
    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// Starts the background health checks.
    pub fn start(&self) {
        self.health.start_health_checks();
    }

    /// Whether every upstream completed its first probe round.
    pub fn is_initialized(&self) -> bool {
        self.health.is_initialized()
    }

    /// Stops the background health checks.
    pub fn shutdown(&self) {
        self.health.shutdown();
    }

    /// Picks an upstream for `body` and executes it.
    ///
    /// `client` tags the request metrics; it carries no auth semantics.
    pub async fn route(
        &self,
        client: &str,
        body: &RequestBody,
    ) -> Result<(String, ExecutionResult), RouterError> {
        let metadata = RequestMetadata::from_body(body);
        let started = Instant::now();

        let upstream_id = match self.strategy.route_next_request(&self.priority_map, &metadata).await
        {
            Ok(id) => id,
            Err(RoutingError::NoHealthyUpstreams) => {
                warn!(target: "router", chain = %self.chain_name, "no healthy upstreams");
                return Err(RouterError::NoHealthyUpstreams);
            }
        };

        let upstream = self
            .upstreams_by_id
            .get(&upstream_id)
            .expect("strategy only returns ids from the priority map");

        self.record_request_metrics(client, upstream, &metadata);

        let result = self.executor.execute(upstream, body).await;
        let duration = started.elapsed();
        histogram!(
            "gateway_request_duration_seconds",
            "chain" => self.chain_name.clone(),
            "upstream" => upstream_id.clone()
        )
        .record(duration.as_secs_f64());

        match result {
            Ok(execution) => {
                self.record_response_metrics(upstream, &execution);
                self.health.record_request(
                    &upstream_id,
                    &outcome_for(&metadata, duration, &execution),
                );
                debug!(
                    target: "router",
                    chain = %self.chain_name,
                    upstream = %upstream_id,
                    ?duration,
                    "request routed"
                );
                Ok((upstream_id, execution))
            }
            Err(err) => {
                counter!(
                    "gateway_upstream_errors_total",
                    "chain" => self.chain_name.clone(),
                    "upstream" => upstream_id.clone()
                )
                .increment(1);
                let outcome = RequestOutcome {
                    method: metadata.methods.first().cloned().unwrap_or_default(),
                    duration,
                    http_code: match &err {
                        ExecuteError::Origin(origin) => origin.status,
                        ExecuteError::Decode(_) => None,
                    },
                    json_rpc_code: None,
                    error: Some(err.to_string()),
                };
                self.health.record_request(&upstream_id, &outcome);
                Err(err.into())
            }
        }
    }

    fn record_request_metrics(
        &self,
        client: &str,
        upstream: &UpstreamConfig,
        metadata: &RequestMetadata,
    ) {
        let method_label = if metadata.methods.len() == 1 {
            metadata.methods[0].clone()
        } else {
            "batch".to_string()
        };
        counter!(
            "gateway_requests_total",
            "chain" => self.chain_name.clone(),
            "client" => client.to_string(),
            "upstream" => upstream.id.clone(),
            "url" => upstream.http_url.clone(),
            "method" => method_label
        )
        .increment(1);

        for method in &metadata.methods {
            counter!(
                "gateway_rpc_method_requests_total",
                "chain" => self.chain_name.clone(),
                "method" => method.clone()
            )
            .increment(1);
        }
    }

    fn record_response_metrics(&self, upstream: &UpstreamConfig, execution: &ExecutionResult) {
        for response in execution.response.iter() {
            if response.is_error() {
                counter!(
                    "gateway_rpc_response_errors_total",
                    "chain" => self.chain_name.clone(),
                    "upstream" => upstream.id.clone()
                )
                .increment(1);
            }
        }
    }
}

/// Derives the passive-checker outcome from a successful execution.
fn outcome_for(
    metadata: &RequestMetadata,
    duration: std::time::Duration,
    execution: &ExecutionResult,
) -> RequestOutcome {
    let first_error = execution.response.iter().find_map(|r| r.error.as_ref());
    RequestOutcome {
        method: metadata.methods.first().cloned().unwrap_or_default(),
        duration,
        http_code: Some(execution.raw.status),
        json_rpc_code: first_error.map(|err| err.code),
        error: first_error.map(|err| err.message.clone()),
    }
}
