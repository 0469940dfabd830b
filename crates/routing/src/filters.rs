use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use gateway_chain_state::ChainStateHandle;
use gateway_config::UpstreamConfig;
use gateway_health::HealthCheckManager;
use gateway_jsonrpc::{is_archive_method, RequestMetadata};

/// Tag of the [`AndFilter`] combining peers, syncing and the passive check.
pub const TAG_HEALTHY: &str = "Healthy";
/// Tag of [`IsCloseToGlobalMaxHeight`] with zero tolerance.
pub const TAG_GLOBAL_MAX_HEIGHT: &str = "GlobalMaxHeight";
/// Tag of [`IsCloseToGlobalMaxHeight`] with the configured tolerance.
pub const TAG_NEAR_GLOBAL_MAX_HEIGHT: &str = "NearGlobalMaxHeight";
/// Tag of [`IsAtMaxHeightForGroup`].
pub const TAG_MAX_HEIGHT_FOR_GROUP: &str = "MaxHeightForGroup";
/// Tag of [`AreMethodsAllowed`].
pub const TAG_METHODS_ALLOWED: &str = "MethodsAllowed";

/// A conjunctive predicate over one upstream.
///
/// Filters never fail; they only admit or reject. `cohort_size` is the
/// number of upstreams sharing the candidate's priority so group-local
/// predicates can degenerate gracefully. Identity for removable-filter
/// relaxation is the stable [`tag`](NodeFilter::tag), so every new filter
/// kind must declare one.
#[async_trait]
pub trait NodeFilter: Send + Sync {
    /// Whether `upstream` may serve the request described by `metadata`.
    async fn apply(
        &self,
        metadata: &RequestMetadata,
        upstream: &UpstreamConfig,
        cohort_size: usize,
    ) -> bool;

    /// Stable identity used by the removable-filter strategy.
    fn tag(&self) -> &'static str;
}

/// Admits upstreams whose peer-count check passes.
#[derive(Debug)]
pub struct HasEnoughPeers {
    health: Arc<HealthCheckManager>,
}

impl HasEnoughPeers {
    /// Creates the filter over the chain's health view.
    pub fn new(health: Arc<HealthCheckManager>) -> Self {
        Self { health }
    }
}

#[async_trait]
impl NodeFilter for HasEnoughPeers {
    async fn apply(
        &self,
        _metadata: &RequestMetadata,
        upstream: &UpstreamConfig,
        _cohort_size: usize,
    ) -> bool {
        self.health
            .upstream_status(&upstream.id)
            .is_some_and(|status| status.peer_count.is_passing())
    }

    fn tag(&self) -> &'static str {
        "HasEnoughPeers"
    }
}

/// Admits upstreams whose syncing check passes.
#[derive(Debug)]
pub struct IsDoneSyncing {
    health: Arc<HealthCheckManager>,
}

impl IsDoneSyncing {
    /// Creates the filter over the chain's health view.
    pub fn new(health: Arc<HealthCheckManager>) -> Self {
        Self { health }
    }
}

#[async_trait]
impl NodeFilter for IsDoneSyncing {
    async fn apply(
        &self,
        _metadata: &RequestMetadata,
        upstream: &UpstreamConfig,
        _cohort_size: usize,
    ) -> bool {
        self.health
            .upstream_status(&upstream.id)
            .is_some_and(|status| status.syncing.is_passing())
    }

    fn tag(&self) -> &'static str {
        "IsDoneSyncing"
    }
}

/// Admits upstreams whose passive error/latency windows have not tripped for
/// the requested methods. Inert (always passing) without a passive policy.
#[derive(Debug)]
struct IsNotBanned {
    health: Arc<HealthCheckManager>,
}

#[async_trait]
impl NodeFilter for IsNotBanned {
    async fn apply(
        &self,
        metadata: &RequestMetadata,
        upstream: &UpstreamConfig,
        _cohort_size: usize,
    ) -> bool {
        self.health
            .upstream_status(&upstream.id)
            .is_some_and(|status| status.passive.is_passing(&metadata.methods))
    }

    fn tag(&self) -> &'static str {
        "IsNotBanned"
    }
}

/// Admits upstreams within `max_blocks_behind` of the global max height.
///
/// The block-height checker's own error is authoritative here; the store's
/// error field is reporting-only.
#[derive(Debug)]
pub struct IsCloseToGlobalMaxHeight {
    health: Arc<HealthCheckManager>,
    store: ChainStateHandle,
    /// Allowed lag behind the global tip.
    pub max_blocks_behind: u64,
    tag: &'static str,
}

impl IsCloseToGlobalMaxHeight {
    /// Zero-tolerance variant, tagged [`TAG_GLOBAL_MAX_HEIGHT`].
    pub fn at_global_max(health: Arc<HealthCheckManager>, store: ChainStateHandle) -> Self {
        Self { health, store, max_blocks_behind: 0, tag: TAG_GLOBAL_MAX_HEIGHT }
    }

    /// Tolerant variant, tagged [`TAG_NEAR_GLOBAL_MAX_HEIGHT`].
    pub fn near_global_max(
        health: Arc<HealthCheckManager>,
        store: ChainStateHandle,
        max_blocks_behind: u64,
    ) -> Self {
        Self { health, store, max_blocks_behind, tag: TAG_NEAR_GLOBAL_MAX_HEIGHT }
    }
}

#[async_trait]
impl NodeFilter for IsCloseToGlobalMaxHeight {
    async fn apply(
        &self,
        _metadata: &RequestMetadata,
        upstream: &UpstreamConfig,
        _cohort_size: usize,
    ) -> bool {
        let Some(status) = self.health.upstream_status(&upstream.id) else { return false };
        if status.block_height.error().is_some() {
            return false;
        }
        let height = status.block_height.block_height();
        let group = upstream.group.clone().unwrap_or_default();
        let snapshot = self.store.block_height_status(group, &upstream.id).await;
        height + self.max_blocks_behind >= snapshot.global_max_height
    }

    fn tag(&self) -> &'static str {
        self.tag
    }
}

/// Admits upstreams at their group's max height.
///
/// A single upstream in its cohort is vacuously at the group's max.
#[derive(Debug)]
pub struct IsAtMaxHeightForGroup {
    health: Arc<HealthCheckManager>,
    store: ChainStateHandle,
}

impl IsAtMaxHeightForGroup {
    /// Creates the filter, tagged [`TAG_MAX_HEIGHT_FOR_GROUP`].
    pub fn new(health: Arc<HealthCheckManager>, store: ChainStateHandle) -> Self {
        Self { health, store }
    }
}

#[async_trait]
impl NodeFilter for IsAtMaxHeightForGroup {
    async fn apply(
        &self,
        _metadata: &RequestMetadata,
        upstream: &UpstreamConfig,
        cohort_size: usize,
    ) -> bool {
        if cohort_size == 1 {
            return true;
        }
        let Some(status) = self.health.upstream_status(&upstream.id) else { return false };
        if status.block_height.error().is_some() {
            return false;
        }
        let height = status.block_height.block_height();
        let group = upstream.group.clone().unwrap_or_default();
        let snapshot = self.store.block_height_status(group, &upstream.id).await;
        height >= snapshot.group_max_height
    }

    fn tag(&self) -> &'static str {
        TAG_MAX_HEIGHT_FOR_GROUP
    }
}

/// Admits upstreams allowed to serve every method in the request.
///
/// A method is denied when the upstream disables it, or when it is
/// archive-class (state or trace family) on a full node without an explicit
/// opt-in.
#[derive(Debug, Default)]
pub struct AreMethodsAllowed;

#[async_trait]
impl NodeFilter for AreMethodsAllowed {
    async fn apply(
        &self,
        metadata: &RequestMetadata,
        upstream: &UpstreamConfig,
        _cohort_size: usize,
    ) -> bool {
        metadata.methods.iter().all(|method| {
            if upstream.methods.disabled.contains(method) {
                return false;
            }
            if is_archive_method(method)
                && !upstream.is_archive()
                && !upstream.methods.enabled.contains(method)
            {
                return false;
            }
            true
        })
    }

    fn tag(&self) -> &'static str {
        TAG_METHODS_ALLOWED
    }
}

/// Conjunction of filters, short-circuiting on the first denial.
pub struct AndFilter {
    filters: Vec<Arc<dyn NodeFilter>>,
    tag: &'static str,
    is_top_level: bool,
}

impl std::fmt::Debug for AndFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AndFilter")
            .field("tag", &self.tag)
            .field("filters", &self.filters.iter().map(|f| f.tag()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// === impl AndFilter ===

impl AndFilter {
    /// Combines `filters` under `tag`. Top-level filters log denials at
    /// debug so operators can see why an upstream fell out of rotation.
    pub fn new(filters: Vec<Arc<dyn NodeFilter>>, tag: &'static str, is_top_level: bool) -> Self {
        Self { filters, tag, is_top_level }
    }

    /// The `Healthy` composite: enough peers, done syncing and, when a
    /// passive policy is configured, not banned by it.
    pub fn healthy(health: &Arc<HealthCheckManager>) -> Self {
        Self::new(
            vec![
                Arc::new(HasEnoughPeers::new(Arc::clone(health))),
                Arc::new(IsDoneSyncing::new(Arc::clone(health))),
                Arc::new(IsNotBanned { health: Arc::clone(health) }),
            ],
            TAG_HEALTHY,
            false,
        )
    }
}

#[async_trait]
impl NodeFilter for AndFilter {
    async fn apply(
        &self,
        metadata: &RequestMetadata,
        upstream: &UpstreamConfig,
        cohort_size: usize,
    ) -> bool {
        for filter in &self.filters {
            if !filter.apply(metadata, upstream, cohort_size).await {
                if self.is_top_level {
                    debug!(
                        target: "routing",
                        upstream = %upstream.id,
                        filter = filter.tag(),
                        "upstream filtered out"
                    );
                } else {
                    trace!(
                        target: "routing",
                        upstream = %upstream.id,
                        filter = filter.tag(),
                        "upstream filtered out"
                    );
                }
                return false;
            }
        }
        true
    }

    fn tag(&self) -> &'static str {
        self.tag
    }
}
