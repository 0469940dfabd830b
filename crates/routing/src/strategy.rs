use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use tracing::debug;

use gateway_jsonrpc::RequestMetadata;

use crate::{filters::NodeFilter, priority::PriorityToUpstreamsMap, AndFilter};

/// Errors a strategy can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// No upstream survived filtering anywhere in the priority map.
    #[error("no healthy upstreams")]
    NoHealthyUpstreams,
}

/// Picks an upstream id for a request out of the priority map.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    /// Returns the id of the upstream the request should go to.
    async fn route_next_request(
        &self,
        map: &PriorityToUpstreamsMap,
        metadata: &RequestMetadata,
    ) -> Result<String, RoutingError>;
}

/// Leaf strategy: lowest-numbered non-empty priority, round-robin inside
/// the bucket.
///
/// The counter is process-wide and atomic, so concurrent calls spread evenly
/// over the candidates.
#[derive(Debug, Default)]
pub struct PriorityRoundRobinStrategy {
    counter: AtomicU64,
}

// === impl PriorityRoundRobinStrategy ===

impl PriorityRoundRobinStrategy {
    /// Creates the strategy with its counter at `start`.
    pub fn with_counter(start: u64) -> Self {
        Self { counter: AtomicU64::new(start) }
    }
}

#[async_trait]
impl RoutingStrategy for PriorityRoundRobinStrategy {
    async fn route_next_request(
        &self,
        map: &PriorityToUpstreamsMap,
        _metadata: &RequestMetadata,
    ) -> Result<String, RoutingError> {
        for (priority, candidates) in map {
            if candidates.is_empty() {
                continue;
            }
            let count = self.counter.fetch_add(1, Ordering::Relaxed);
            let index = ((count + 1) % candidates.len() as u64) as usize;
            let chosen = &candidates[index];
            debug!(target: "routing", upstream = %chosen.id, %priority, "selected upstream");
            return Ok(chosen.id.clone());
        }
        Err(RoutingError::NoHealthyUpstreams)
    }
}

/// Applies a node filter to every bucket, then delegates to a backing
/// strategy.
pub struct FilteringRoutingStrategy {
    filter: Arc<dyn NodeFilter>,
    backing: Arc<dyn RoutingStrategy>,
}

impl std::fmt::Debug for FilteringRoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteringRoutingStrategy").field("filter", &self.filter.tag()).finish()
    }
}

// === impl FilteringRoutingStrategy ===

impl FilteringRoutingStrategy {
    /// Creates the strategy; `filter` is typically a top-level [`AndFilter`].
    pub fn new(filter: Arc<dyn NodeFilter>, backing: Arc<dyn RoutingStrategy>) -> Self {
        Self { filter, backing }
    }
}

/// Applies `filter` to every upstream of every bucket, keeping bucket order.
async fn filter_map(
    filter: &dyn NodeFilter,
    map: &PriorityToUpstreamsMap,
    metadata: &RequestMetadata,
) -> PriorityToUpstreamsMap {
    let mut filtered = PriorityToUpstreamsMap::new();
    for (priority, upstreams) in map {
        let cohort_size = upstreams.len();
        let mut kept = Vec::with_capacity(cohort_size);
        for upstream in upstreams {
            if filter.apply(metadata, upstream, cohort_size).await {
                kept.push(Arc::clone(upstream));
            }
        }
        filtered.insert(*priority, kept);
    }
    filtered
}

fn has_candidates(map: &PriorityToUpstreamsMap) -> bool {
    map.values().any(|bucket| !bucket.is_empty())
}

#[async_trait]
impl RoutingStrategy for FilteringRoutingStrategy {
    async fn route_next_request(
        &self,
        map: &PriorityToUpstreamsMap,
        metadata: &RequestMetadata,
    ) -> Result<String, RoutingError> {
        let filtered = filter_map(self.filter.as_ref(), map, metadata).await;
        self.backing.route_next_request(&filtered, metadata).await
    }
}

/// Filtering strategy that relaxes removable filters before giving up.
///
/// When the full filter set yields nothing, the last removable filter is
/// dropped (LIFO over the configured list, compared by tag) and filtering is
/// retried. With every removable filter gone and still no candidates, the
/// unfiltered map is routed when `always_route` is set, guaranteeing a
/// destination.
pub struct AlwaysRouteFilteringStrategy {
    filters: Vec<Arc<dyn NodeFilter>>,
    removable: Vec<&'static str>,
    backing: Arc<dyn RoutingStrategy>,
    always_route: bool,
}

impl std::fmt::Debug for AlwaysRouteFilteringStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlwaysRouteFilteringStrategy")
            .field("filters", &self.filters.iter().map(|f| f.tag()).collect::<Vec<_>>())
            .field("removable", &self.removable)
            .field("always_route", &self.always_route)
            .finish_non_exhaustive()
    }
}

// === impl AlwaysRouteFilteringStrategy ===

impl AlwaysRouteFilteringStrategy {
    /// Creates the strategy. `removable` names filter tags from `filters`
    /// that may be dropped, last first.
    pub fn new(
        filters: Vec<Arc<dyn NodeFilter>>,
        removable: Vec<&'static str>,
        backing: Arc<dyn RoutingStrategy>,
        always_route: bool,
    ) -> Self {
        Self { filters, removable, backing, always_route }
    }
}

#[async_trait]
impl RoutingStrategy for AlwaysRouteFilteringStrategy {
    async fn route_next_request(
        &self,
        map: &PriorityToUpstreamsMap,
        metadata: &RequestMetadata,
    ) -> Result<String, RoutingError> {
        let mut active = self.filters.clone();
        let mut removable = self.removable.clone();

        loop {
            let filter = AndFilter::new(active.clone(), "TopLevel", true);
            let filtered = filter_map(&filter, map, metadata).await;
            if has_candidates(&filtered) {
                return self.backing.route_next_request(&filtered, metadata).await;
            }

            match removable.pop() {
                Some(tag) => {
                    debug!(target: "routing", filter = tag, "relaxing removable filter");
                    active.retain(|f| f.tag() != tag);
                }
                None if self.always_route => {
                    debug!(target: "routing", "all filters exhausted, routing unfiltered");
                    return self.backing.route_next_request(map, metadata).await;
                }
                None => return Err(RoutingError::NoHealthyUpstreams),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use gateway_config::UpstreamConfig;
    use gateway_health::{test_utils::MockProbe, SyncStatus};

    use crate::{
        filters::{AreMethodsAllowed, IsCloseToGlobalMaxHeight},
        test_support::{metadata_for, testnet, TestNet, FULL_THEN_ARCHIVE, TWO_TIER},
        AndFilter, TAG_NEAR_GLOBAL_MAX_HEIGHT,
    };

    use super::*;

    fn bucket(ids: &[&str]) -> Vec<Arc<UpstreamConfig>> {
        ids.iter()
            .map(|id| {
                Arc::new(UpstreamConfig {
                    id: (*id).to_string(),
                    http_url: format!("http://{id}:8545"),
                    ws_url: None,
                    group: None,
                    node_type: Default::default(),
                    basic_auth: None,
                    methods: Default::default(),
                    request_headers: Vec::new(),
                    use_ws_for_block_height: false,
                    skip_peer_count_check: false,
                })
            })
            .collect()
    }

    fn default_filters(net: &TestNet) -> Vec<Arc<dyn NodeFilter>> {
        vec![
            Arc::new(AndFilter::healthy(&net.health)),
            Arc::new(IsCloseToGlobalMaxHeight::near_global_max(
                Arc::clone(&net.health),
                net.store.clone(),
                net.chain.routing.max_blocks_behind,
            )),
            Arc::new(AreMethodsAllowed),
        ]
    }

    #[tokio::test]
    async fn round_robin_cycles_from_counter_plus_one() {
        let strategy = PriorityRoundRobinStrategy::default();
        let mut map = PriorityToUpstreamsMap::new();
        map.insert(0, bucket(&["a", "b", "c"]));
        let meta = metadata_for(&["eth_blockNumber"]);

        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(strategy.route_next_request(&map, &meta).await.unwrap());
        }
        // Counter starts at 0, so the first pick is index 1.
        assert_eq!(picks, vec!["b", "c", "a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn round_robin_starts_where_the_counter_points() {
        let strategy = PriorityRoundRobinStrategy::with_counter(4);
        let mut map = PriorityToUpstreamsMap::new();
        map.insert(0, bucket(&["a", "b", "c"]));
        let meta = metadata_for(&["eth_blockNumber"]);

        // (4 + 1) mod 3 == 2.
        assert_eq!(strategy.route_next_request(&map, &meta).await.unwrap(), "c");
    }

    #[tokio::test]
    async fn round_robin_prefers_lowest_priority_with_candidates() {
        let strategy = PriorityRoundRobinStrategy::default();
        let mut map = PriorityToUpstreamsMap::new();
        map.insert(0, Vec::new());
        map.insert(1, bucket(&["fallback-1"]));
        let meta = metadata_for(&["eth_blockNumber"]);

        assert_eq!(strategy.route_next_request(&map, &meta).await.unwrap(), "fallback-1");
    }

    #[tokio::test]
    async fn round_robin_fails_on_empty_map() {
        let strategy = PriorityRoundRobinStrategy::default();
        let mut map = PriorityToUpstreamsMap::new();
        map.insert(0, Vec::new());
        let meta = metadata_for(&["eth_blockNumber"]);

        assert_matches!(
            strategy.route_next_request(&map, &meta).await,
            Err(RoutingError::NoHealthyUpstreams)
        );
    }

    #[tokio::test]
    async fn filtering_strategy_routes_to_healthy_priority() {
        // S1: both healthy, the primary tier wins.
        let net = testnet(TWO_TIER, &[("u1", MockProbe::default()), ("u2", MockProbe::default())])
            .await;
        let strategy = FilteringRoutingStrategy::new(
            Arc::new(AndFilter::new(default_filters(&net), "TopLevel", true)),
            Arc::new(PriorityRoundRobinStrategy::default()),
        );
        let meta = metadata_for(&["eth_blockNumber"]);
        assert_eq!(strategy.route_next_request(&net.map, &meta).await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn filtering_strategy_falls_back_when_primary_unhealthy() {
        // S2: u1 fails its sync check, u2 takes over.
        let syncing = MockProbe::default();
        syncing.set_sync_status(Ok(SyncStatus::Syncing));
        let net = testnet(TWO_TIER, &[("u1", syncing), ("u2", MockProbe::default())]).await;

        let strategy = FilteringRoutingStrategy::new(
            Arc::new(AndFilter::new(default_filters(&net), "TopLevel", true)),
            Arc::new(PriorityRoundRobinStrategy::default()),
        );
        let meta = metadata_for(&["eth_blockNumber"]);
        assert_eq!(strategy.route_next_request(&net.map, &meta).await.unwrap(), "u2");
    }

    #[tokio::test]
    async fn state_methods_route_past_the_full_node() {
        // S3/S4: the full node sits at priority 0 but cannot serve state.
        let net = testnet(
            FULL_THEN_ARCHIVE,
            &[("full-node", MockProbe::default()), ("archive-node", MockProbe::default())],
        )
        .await;
        let strategy = FilteringRoutingStrategy::new(
            Arc::new(AndFilter::new(default_filters(&net), "TopLevel", true)),
            Arc::new(PriorityRoundRobinStrategy::default()),
        );

        let single = metadata_for(&["eth_getTransactionCount"]);
        assert_eq!(strategy.route_next_request(&net.map, &single).await.unwrap(), "archive-node");

        let batch = metadata_for(&["eth_getTransactionCount", "eth_getBlockTransactionCountByNumber"]);
        assert_eq!(strategy.route_next_request(&net.map, &batch).await.unwrap(), "archive-node");

        // Plain lookups still hit the preferred tier.
        let plain = metadata_for(&["eth_blockNumber"]);
        assert_eq!(strategy.route_next_request(&net.map, &plain).await.unwrap(), "full-node");
    }

    #[tokio::test]
    async fn always_route_drops_removable_filters_lifo() {
        // Everyone trails the recorded global max, failing NearGlobalMaxHeight.
        let net = testnet(TWO_TIER, &[("u1", MockProbe::default()), ("u2", MockProbe::default())])
            .await;
        net.store.process_block_height_update("primary", "ghost", 1_000_000).await;

        let strategy = AlwaysRouteFilteringStrategy::new(
            default_filters(&net),
            vec![TAG_NEAR_GLOBAL_MAX_HEIGHT],
            Arc::new(PriorityRoundRobinStrategy::default()),
            true,
        );
        let meta = metadata_for(&["eth_blockNumber"]);
        // Dropping the height filter leaves both healthy upstreams.
        assert_eq!(strategy.route_next_request(&net.map, &meta).await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn always_route_falls_back_to_unfiltered_map() {
        // Both upstreams fail Healthy, which is not removable.
        let syncing = MockProbe::default();
        syncing.set_sync_status(Ok(SyncStatus::Syncing));
        let net = testnet(TWO_TIER, &[("u1", syncing.clone()), ("u2", syncing)]).await;

        let strategy = AlwaysRouteFilteringStrategy::new(
            default_filters(&net),
            vec![TAG_NEAR_GLOBAL_MAX_HEIGHT],
            Arc::new(PriorityRoundRobinStrategy::default()),
            true,
        );
        let meta = metadata_for(&["eth_blockNumber"]);
        // alwaysRoute guarantees a destination regardless.
        assert_eq!(strategy.route_next_request(&net.map, &meta).await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn without_always_route_exhaustion_is_an_error() {
        let syncing = MockProbe::default();
        syncing.set_sync_status(Ok(SyncStatus::Syncing));
        let net = testnet(TWO_TIER, &[("u1", syncing.clone()), ("u2", syncing)]).await;

        let strategy = AlwaysRouteFilteringStrategy::new(
            default_filters(&net),
            vec![TAG_NEAR_GLOBAL_MAX_HEIGHT],
            Arc::new(PriorityRoundRobinStrategy::default()),
            false,
        );
        let meta = metadata_for(&["eth_blockNumber"]);
        assert_matches!(
            strategy.route_next_request(&net.map, &meta).await,
            Err(RoutingError::NoHealthyUpstreams)
        );
    }
}
