use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use futures::StreamExt;
use metrics::gauge;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gateway_chain_state::ChainStateHandle;

use crate::probe::{EthProbe, ProbeError};

/// How long to wait before retrying a failed `newHeads` subscription.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct BlockHeightState {
    height: u64,
    error: Option<String>,
    checked: bool,
}

/// Tracks the chain tip of one upstream.
///
/// In HTTP mode the tip is polled on every health-check tick. When the
/// upstream is configured for websocket heights, a `newHeads` subscription
/// feeds the same code path and polling is suspended while the subscription
/// is live; a broken subscription falls back to polling until a resubscribe
/// attempt succeeds.
pub struct BlockHeightChecker {
    upstream_id: String,
    group_id: String,
    probe: Arc<dyn EthProbe>,
    store: ChainStateHandle,
    state: RwLock<BlockHeightState>,
    ws_active: AtomicBool,
}

impl std::fmt::Debug for BlockHeightChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHeightChecker")
            .field("upstream_id", &self.upstream_id)
            .field("height", &self.block_height())
            .finish_non_exhaustive()
    }
}

// === impl BlockHeightChecker ===

impl BlockHeightChecker {
    /// Creates a checker for `upstream_id` in `group_id`.
    pub fn new(
        upstream_id: impl Into<String>,
        group_id: impl Into<String>,
        probe: Arc<dyn EthProbe>,
        store: ChainStateHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            upstream_id: upstream_id.into(),
            group_id: group_id.into(),
            probe,
            store,
            state: RwLock::default(),
            ws_active: AtomicBool::new(false),
        })
    }

    /// Polls the tip over HTTP unless a live subscription is already
    /// delivering heights.
    pub async fn run_check(&self) {
        if self.ws_active.load(Ordering::Acquire) {
            return;
        }
        match self.probe.block_number().await {
            Ok(height) => self.on_height(height).await,
            Err(err) => self.on_error(&err).await,
        }
    }

    /// Spawns the `newHeads` subscription task for ws-configured upstreams.
    pub fn spawn_ws_subscription(self: &Arc<Self>, token: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match this.probe.subscribe_new_heads().await {
                    Ok(mut stream) => {
                        this.ws_active.store(true, Ordering::Release);
                        debug!(target: "health", upstream = %this.upstream_id, "ws heights active");
                        loop {
                            tokio::select! {
                                _ = token.cancelled() => return,
                                item = stream.next() => match item {
                                    Some(Ok(height)) => this.on_height(height).await,
                                    Some(Err(err)) => {
                                        this.on_error(&err).await;
                                        break;
                                    }
                                    None => break,
                                },
                            }
                        }
                        // Subscription is gone; poll until resubscribed.
                        this.ws_active.store(false, Ordering::Release);
                        warn!(target: "health", upstream = %this.upstream_id, "ws subscription lost, polling");
                    }
                    Err(err) => {
                        this.ws_active.store(false, Ordering::Release);
                        debug!(
                            target: "health",
                            upstream = %this.upstream_id,
                            %err,
                            "newHeads subscribe failed"
                        );
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => {}
                }
            }
        });
    }

    async fn on_height(&self, height: u64) {
        {
            let mut state = self.state.write();
            state.height = height;
            state.error = None;
            state.checked = true;
        }
        gauge!("gateway_upstream_block_height", "upstream" => self.upstream_id.clone())
            .set(height as f64);
        self.store
            .process_block_height_update(&self.group_id, &self.upstream_id, height)
            .await;
    }

    async fn on_error(&self, err: &ProbeError) {
        debug!(target: "health", upstream = %self.upstream_id, %err, "block height probe failed");
        {
            let mut state = self.state.write();
            state.error = Some(err.to_string());
            state.checked = true;
        }
        self.store
            .process_error_update(&self.group_id, &self.upstream_id, err.to_string())
            .await;
    }

    /// Last observed height.
    pub fn block_height(&self) -> u64 {
        self.state.read().height
    }

    /// Last probe error, if the most recent observation failed.
    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// Whether at least one probe round has completed.
    pub fn has_checked(&self) -> bool {
        self.state.read().checked
    }

    /// Whether the height subscription currently delivers heights.
    pub fn is_ws_active(&self) -> bool {
        self.ws_active.load(Ordering::Acquire)
    }

    /// The passing predicate against an observed maximum height.
    pub fn is_passing(&self, max_height: u64, max_blocks_behind: u64) -> bool {
        let state = self.state.read();
        state.error.is_none() && state.height + max_blocks_behind >= max_height
    }
}
