use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gateway_chain_state::ChainStateHandle;
use gateway_config::ChainConfig;

use crate::{
    checkers::{
        BlockHeightChecker, ErrorLatencyChecker, PeerCountChecker, RequestOutcome, SyncingChecker,
    },
    probe::{EthProbe, JsonRpcProbe, ProbeError},
};

/// How often every enabled checker runs.
pub const PERIODIC_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// The live health view of one upstream.
///
/// Owned by the [`HealthCheckManager`]; everyone else reads the sub-checkers
/// through their pure accessors.
#[derive(Debug)]
pub struct UpstreamStatus {
    /// The upstream this status describes.
    pub upstream_id: String,
    /// Its group, empty when ungrouped.
    pub group_id: String,
    /// Chain-tip tracking.
    pub block_height: Arc<BlockHeightChecker>,
    /// Peer-count probe.
    pub peer_count: Arc<PeerCountChecker>,
    /// Sync-status probe.
    pub syncing: Arc<SyncingChecker>,
    /// Passive error/latency windows.
    pub passive: Arc<ErrorLatencyChecker>,
    /// Whether this upstream feeds heights over websocket.
    use_ws: bool,
}

impl UpstreamStatus {
    fn has_completed_round(&self) -> bool {
        self.block_height.has_checked()
            && self.peer_count.has_checked()
            && self.syncing.has_checked()
    }
}

/// Schedules the periodic probes for every upstream of a chain and publishes
/// per-upstream status snapshots.
#[derive(Debug)]
pub struct HealthCheckManager {
    statuses: HashMap<String, Arc<UpstreamStatus>>,
    interval: Duration,
    token: CancellationToken,
    started: AtomicBool,
}

// === impl HealthCheckManager ===

impl HealthCheckManager {
    /// Wires one status per upstream using the provided probes.
    ///
    /// `probes` must contain an entry per upstream id; tests inject mocks
    /// here.
    pub fn new(
        chain: &ChainConfig,
        store: ChainStateHandle,
        probes: HashMap<String, Arc<dyn EthProbe>>,
    ) -> Self {
        let mut statuses = HashMap::new();
        for upstream in &chain.upstreams {
            let probe = probes
                .get(&upstream.id)
                .cloned()
                .unwrap_or_else(|| panic!("missing probe for upstream {}", upstream.id));
            let group_id = upstream.group.clone().unwrap_or_default();
            let status = UpstreamStatus {
                block_height: BlockHeightChecker::new(
                    &upstream.id,
                    &group_id,
                    Arc::clone(&probe),
                    store.clone(),
                ),
                peer_count: PeerCountChecker::new(
                    &upstream.id,
                    Arc::clone(&probe),
                    upstream.skip_peer_count_check,
                ),
                syncing: SyncingChecker::new(&upstream.id, Arc::clone(&probe)),
                passive: ErrorLatencyChecker::new(&upstream.id, &chain.routing),
                upstream_id: upstream.id.clone(),
                group_id,
                use_ws: upstream.use_ws_for_block_height,
            };
            statuses.insert(upstream.id.clone(), Arc::new(status));
        }
        Self {
            statuses,
            interval: PERIODIC_HEALTH_CHECK_INTERVAL,
            token: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Builds production probes from the chain config.
    pub fn from_config(chain: &ChainConfig, store: ChainStateHandle) -> Result<Self, ProbeError> {
        let mut probes: HashMap<String, Arc<dyn EthProbe>> = HashMap::new();
        for upstream in &chain.upstreams {
            probes.insert(upstream.id.clone(), Arc::new(JsonRpcProbe::new(upstream)?));
        }
        Ok(Self::new(chain, store, probes))
    }

    /// Overrides the probe period; tests tighten it.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Starts the websocket subscriptions and the periodic probe driver.
    ///
    /// Idempotent; the second call is a no-op.
    pub fn start_health_checks(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(target: "health", upstreams = self.statuses.len(), "starting health checks");

        for status in self.statuses.values() {
            if status.use_ws {
                status.block_height.spawn_ws_subscription(self.token.child_token());
            }
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.interval);
            loop {
                tokio::select! {
                    _ = manager.token.cancelled() => {
                        debug!(target: "health", "health check driver stopped");
                        return;
                    }
                    _ = ticker.tick() => manager.run_round(),
                }
            }
        });
    }

    /// Schedules one probe round, one task per upstream-checker.
    fn run_round(&self) {
        for status in self.statuses.values() {
            let s = Arc::clone(status);
            tokio::spawn(async move { s.block_height.run_check().await });
            let s = Arc::clone(status);
            tokio::spawn(async move { s.peer_count.run_check().await });
            let s = Arc::clone(status);
            tokio::spawn(async move { s.syncing.run_check().await });
        }
    }

    /// Whether every enabled checker on every upstream has completed at
    /// least one round.
    pub fn is_initialized(&self) -> bool {
        self.statuses.values().all(|status| status.has_completed_round())
    }

    /// The live status handle for `upstream_id`.
    pub fn upstream_status(&self, upstream_id: &str) -> Option<&Arc<UpstreamStatus>> {
        self.statuses.get(upstream_id)
    }

    /// Runs every active probe once and waits for completion.
    ///
    /// Drives the same code path as the periodic ticker; tests use it to
    /// advance the health view deterministically.
    pub async fn run_checks_once(&self) {
        for status in self.statuses.values() {
            status.block_height.run_check().await;
            status.peer_count.run_check().await;
            status.syncing.run_check().await;
        }
    }

    /// Feeds a request outcome into the upstream's passive checker.
    pub fn record_request(&self, upstream_id: &str, outcome: &RequestOutcome) {
        if let Some(status) = self.statuses.get(upstream_id) {
            status.passive.record_request(outcome);
        }
    }

    /// Stops the driver and every subscription task.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}
