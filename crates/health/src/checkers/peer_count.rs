use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::probe::EthProbe;

/// Fewest peers an upstream may have and still pass the check.
pub const MINIMUM_PEER_COUNT: u64 = 1;

#[derive(Debug, Default)]
struct PeerCountState {
    peer_count: u64,
    error: Option<String>,
    checked: bool,
}

/// Tracks the peer count of one upstream.
///
/// Disables itself permanently when the upstream is configured to skip the
/// check or when the node reports `net_peerCount` as unsupported.
pub struct PeerCountChecker {
    upstream_id: String,
    probe: Arc<dyn EthProbe>,
    state: RwLock<PeerCountState>,
    should_run: AtomicBool,
}

impl std::fmt::Debug for PeerCountChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerCountChecker")
            .field("upstream_id", &self.upstream_id)
            .field("should_run", &self.should_run())
            .finish_non_exhaustive()
    }
}

// === impl PeerCountChecker ===

impl PeerCountChecker {
    /// Creates a checker; `skip` comes from the upstream config.
    pub fn new(upstream_id: impl Into<String>, probe: Arc<dyn EthProbe>, skip: bool) -> Arc<Self> {
        Arc::new(Self {
            upstream_id: upstream_id.into(),
            probe,
            state: RwLock::default(),
            should_run: AtomicBool::new(!skip),
        })
    }

    /// Probes `net_peerCount` once.
    pub async fn run_check(&self) {
        if !self.should_run() {
            self.state.write().checked = true;
            return;
        }
        match self.probe.peer_count().await {
            Ok(count) => {
                let mut state = self.state.write();
                state.peer_count = count;
                state.error = None;
                state.checked = true;
            }
            Err(err) => {
                if err.is_method_not_supported() {
                    // One-time permanent opt-out.
                    info!(
                        target: "health",
                        upstream = %self.upstream_id,
                        "peer count unsupported, disabling check"
                    );
                    self.should_run.store(false, Ordering::Release);
                } else {
                    debug!(target: "health", upstream = %self.upstream_id, %err, "peer count probe failed");
                }
                let mut state = self.state.write();
                state.error = Some(err.to_string());
                state.checked = true;
            }
        }
    }

    /// Last observed peer count.
    pub fn peer_count(&self) -> u64 {
        self.state.read().peer_count
    }

    /// Last probe error.
    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// Whether the check still participates in routing decisions.
    pub fn should_run(&self) -> bool {
        self.should_run.load(Ordering::Acquire)
    }

    /// Whether at least one probe round has completed.
    pub fn has_checked(&self) -> bool {
        self.state.read().checked
    }

    /// The passing predicate.
    pub fn is_passing(&self) -> bool {
        if !self.should_run() {
            return true;
        }
        let state = self.state.read();
        state.error.is_none() && state.peer_count >= MINIMUM_PEER_COUNT
    }
}
