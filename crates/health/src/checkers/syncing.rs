use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::probe::{EthProbe, SyncStatus};

#[derive(Debug, Default)]
struct SyncingState {
    is_syncing: bool,
    error: Option<String>,
    checked: bool,
}

/// Tracks whether one upstream is still syncing.
///
/// Disables itself permanently when the node reports `eth_syncing` as
/// unsupported.
pub struct SyncingChecker {
    upstream_id: String,
    probe: Arc<dyn EthProbe>,
    state: RwLock<SyncingState>,
    should_run: AtomicBool,
}

impl std::fmt::Debug for SyncingChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncingChecker")
            .field("upstream_id", &self.upstream_id)
            .field("is_syncing", &self.is_syncing())
            .finish_non_exhaustive()
    }
}

// === impl SyncingChecker ===

impl SyncingChecker {
    /// Creates a checker for `upstream_id`.
    pub fn new(upstream_id: impl Into<String>, probe: Arc<dyn EthProbe>) -> Arc<Self> {
        Arc::new(Self {
            upstream_id: upstream_id.into(),
            probe,
            state: RwLock::default(),
            should_run: AtomicBool::new(true),
        })
    }

    /// Probes `eth_syncing` once.
    pub async fn run_check(&self) {
        if !self.should_run() {
            self.state.write().checked = true;
            return;
        }
        match self.probe.sync_status().await {
            Ok(status) => {
                let mut state = self.state.write();
                state.is_syncing = status == SyncStatus::Syncing;
                state.error = None;
                state.checked = true;
            }
            Err(err) => {
                if err.is_method_not_supported() {
                    info!(
                        target: "health",
                        upstream = %self.upstream_id,
                        "eth_syncing unsupported, disabling check"
                    );
                    self.should_run.store(false, Ordering::Release);
                } else {
                    debug!(target: "health", upstream = %self.upstream_id, %err, "sync probe failed");
                }
                let mut state = self.state.write();
                state.error = Some(err.to_string());
                state.checked = true;
            }
        }
    }

    /// Whether the node last reported an active sync.
    pub fn is_syncing(&self) -> bool {
        self.state.read().is_syncing
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
        state.error.is_none() && !state.is_syncing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;
    use crate::test_utils::MockProbe;

    #[tokio::test]
    async fn synced_node_passes() {
        let probe = MockProbe::default();
        probe.set_sync_status(Ok(SyncStatus::Synced));
        let checker = SyncingChecker::new("u1", Arc::new(probe));

        checker.run_check().await;
        assert!(!checker.is_syncing());
        assert!(checker.is_passing());
    }

    #[tokio::test]
    async fn syncing_node_fails() {
        let probe = MockProbe::default();
        probe.set_sync_status(Ok(SyncStatus::Syncing));
        let checker = SyncingChecker::new("u1", Arc::new(probe.clone()));

        checker.run_check().await;
        assert!(checker.is_syncing());
        assert!(!checker.is_passing());

        // Recovery flips it back.
        probe.set_sync_status(Ok(SyncStatus::Synced));
        checker.run_check().await;
        assert!(checker.is_passing());
    }

    #[tokio::test]
    async fn probe_error_fails_until_recovery() {
        let probe = MockProbe::default();
        probe.set_sync_status(Err(ProbeError::Transport("timeout".to_string())));
        let checker = SyncingChecker::new("u1", Arc::new(probe));

        checker.run_check().await;
        assert!(!checker.is_passing());
        assert!(checker.error().is_some());
    }

    #[tokio::test]
    async fn method_not_supported_disables_permanently() {
        let probe = MockProbe::default();
        probe.set_sync_status(Err(ProbeError::JsonRpc {
            code: -32601,
            message: "method not found".to_string(),
        }));
        let checker = SyncingChecker::new("u1", Arc::new(probe));

        checker.run_check().await;
        assert!(!checker.should_run());
        assert!(checker.is_passing());
    }
}
