use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Queue slots reserved per upstream when sizing the action channel.
const QUEUE_SLOTS_PER_UPSTREAM: usize = 8;

/// A point-in-time view of one upstream's height relative to its group and
/// the chain, assembled atomically by the store worker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeightStatus {
    /// Last error reported for the upstream, cleared by a successful update.
    pub error: Option<String>,
    /// Group the upstream belongs to (empty for ungrouped upstreams).
    pub group_id: String,
    /// The upstream this snapshot describes.
    pub upstream_id: String,
    /// Last height reported by the upstream itself.
    pub block_height: u64,
    /// Highest height ever reported within the group.
    pub group_max_height: u64,
    /// Highest height ever reported on the chain.
    pub global_max_height: u64,
}

enum StoreAction {
    ProcessBlockHeightUpdate {
        group_id: String,
        upstream_id: String,
        height: u64,
    },
    ProcessErrorUpdate {
        group_id: String,
        upstream_id: String,
        error: String,
    },
    GetBlockHeightStatus {
        group_id: String,
        upstream_id: String,
        reply: oneshot::Sender<BlockHeightStatus>,
    },
}

/// Serializes all reads and writes of chain-tip state for one chain.
///
/// Expected to be driven by [`ChainMetadataStore::run`] on its own task;
/// [`ChainStateHandle`] is the shared front end.
#[derive(Debug)]
pub struct ChainMetadataStore {
    incoming: mpsc::Receiver<StoreAction>,
    max_height_by_group_id: HashMap<String, u64>,
    height_by_upstream_id: HashMap<String, u64>,
    error_by_upstream_id: HashMap<String, String>,
    global_max_height: u64,
}

// === impl ChainMetadataStore ===

impl ChainMetadataStore {
    /// Creates the store and its handle. The queue is bounded by the number
    /// of upstreams feeding it.
    pub fn new(upstream_count: usize) -> (Self, ChainStateHandle) {
        let capacity = upstream_count.max(1) * QUEUE_SLOTS_PER_UPSTREAM;
        let (sender, incoming) = mpsc::channel(capacity);
        let store = Self {
            incoming,
            max_height_by_group_id: HashMap::new(),
            height_by_upstream_id: HashMap::new(),
            error_by_upstream_id: HashMap::new(),
            global_max_height: 0,
        };
        (store, ChainStateHandle { sender })
    }

    /// Creates the store and spawns its worker task, returning the handle.
    pub fn spawn(upstream_count: usize) -> ChainStateHandle {
        let (store, handle) = Self::new(upstream_count);
        tokio::spawn(store.run());
        handle
    }

    /// Drains the action queue until every handle is dropped.
    ///
    /// Actions are applied strictly in enqueue order, so a read enqueued
    /// after a write observes that write.
    pub async fn run(mut self) {
        while let Some(action) = self.incoming.recv().await {
            match action {
                StoreAction::ProcessBlockHeightUpdate { group_id, upstream_id, height } => {
                    self.apply_height_update(group_id, upstream_id, height);
                }
                StoreAction::ProcessErrorUpdate { group_id: _, upstream_id, error } => {
                    self.error_by_upstream_id.insert(upstream_id, error);
                }
                StoreAction::GetBlockHeightStatus { group_id, upstream_id, reply } => {
                    // The receiver may have been cancelled; nothing to do then.
                    let _ = reply.send(self.snapshot(group_id, upstream_id));
                }
            }
        }
        debug!(target: "chain_state", "metadata store worker stopped");
    }

    fn apply_height_update(&mut self, group_id: String, upstream_id: String, height: u64) {
        self.global_max_height = self.global_max_height.max(height);
        let group_max = self.max_height_by_group_id.entry(group_id).or_insert(0);
        *group_max = (*group_max).max(height);
        // Per-upstream heights are stored verbatim so a rolled-back node is
        // immediately visible as behind.
        self.height_by_upstream_id.insert(upstream_id.clone(), height);
        self.error_by_upstream_id.remove(&upstream_id);
    }

    fn snapshot(&self, group_id: String, upstream_id: String) -> BlockHeightStatus {
        BlockHeightStatus {
            error: self.error_by_upstream_id.get(&upstream_id).cloned(),
            block_height: self.height_by_upstream_id.get(&upstream_id).copied().unwrap_or(0),
            group_max_height: self.max_height_by_group_id.get(&group_id).copied().unwrap_or(0),
            global_max_height: self.global_max_height,
            group_id,
            upstream_id,
        }
    }
}

/// Shared front end of the metadata store.
#[derive(Debug, Clone)]
pub struct ChainStateHandle {
    sender: mpsc::Sender<StoreAction>,
}

// === impl ChainStateHandle ===

impl ChainStateHandle {
    /// Records a new height for `upstream_id`, raising the group and global
    /// maxima and clearing any stored error for the upstream.
    pub async fn process_block_height_update(
        &self,
        group_id: impl Into<String>,
        upstream_id: impl Into<String>,
        height: u64,
    ) {
        self.send(StoreAction::ProcessBlockHeightUpdate {
            group_id: group_id.into(),
            upstream_id: upstream_id.into(),
            height,
        })
        .await;
    }

    /// Records a probe error for `upstream_id`. The stored height is kept.
    pub async fn process_error_update(
        &self,
        group_id: impl Into<String>,
        upstream_id: impl Into<String>,
        error: impl Into<String>,
    ) {
        self.send(StoreAction::ProcessErrorUpdate {
            group_id: group_id.into(),
            upstream_id: upstream_id.into(),
            error: error.into(),
        })
        .await;
    }

    /// Returns a consistent snapshot for `upstream_id` within `group_id`.
    pub async fn block_height_status(
        &self,
        group_id: impl Into<String>,
        upstream_id: impl Into<String>,
    ) -> BlockHeightStatus {
        let group_id = group_id.into();
        let upstream_id = upstream_id.into();
        let (reply, rx) = oneshot::channel();
        self.send(StoreAction::GetBlockHeightStatus {
            group_id: group_id.clone(),
            upstream_id: upstream_id.clone(),
            reply,
        })
        .await;
        match rx.await {
            Ok(status) => status,
            // Worker gone, the server is shutting down; report an empty view.
            Err(_) => BlockHeightStatus { group_id, upstream_id, ..Default::default() },
        }
    }

    async fn send(&self, action: StoreAction) {
        if self.sender.send(action).await.is_err() {
            debug!(target: "chain_state", "metadata store queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn spawn_store() -> ChainStateHandle {
        ChainMetadataStore::spawn(4)
    }

    #[tokio::test]
    async fn tracks_global_and_group_maxima() {
        let store = spawn_store();

        store.process_block_height_update("primary", "u1", 100).await;
        store.process_block_height_update("fallback", "u2", 90).await;
        store.process_block_height_update("primary", "u3", 95).await;

        let status = store.block_height_status("primary", "u1").await;
        assert_eq!(status.block_height, 100);
        assert_eq!(status.group_max_height, 100);
        assert_eq!(status.global_max_height, 100);

        let status = store.block_height_status("fallback", "u2").await;
        assert_eq!(status.block_height, 90);
        assert_eq!(status.group_max_height, 90);
        assert_eq!(status.global_max_height, 100);
    }

    #[tokio::test]
    async fn upstream_height_moves_backward_while_maxima_hold() {
        let store = spawn_store();

        store.process_block_height_update("primary", "u1", 100).await;
        // A re-orged node reports an older tip; stored verbatim.
        store.process_block_height_update("primary", "u1", 42).await;

        let status = store.block_height_status("primary", "u1").await;
        assert_eq!(status.block_height, 42);
        assert_eq!(status.group_max_height, 100);
        assert_eq!(status.global_max_height, 100);
    }

    #[tokio::test]
    async fn global_max_covers_all_groups() {
        let store = spawn_store();

        for (group, upstream, height) in
            [("a", "u1", 10), ("b", "u2", 30), ("a", "u3", 20), ("b", "u4", 5)]
        {
            store.process_block_height_update(group, upstream, height).await;
        }

        let status = store.block_height_status("a", "u1").await;
        assert_eq!(status.global_max_height, 30);
        assert_eq!(status.group_max_height, 20);
    }

    #[tokio::test]
    async fn error_is_stored_and_cleared_by_success() {
        let store = spawn_store();

        store.process_block_height_update("primary", "u1", 7).await;
        store.process_error_update("primary", "u1", "connection refused").await;

        let status = store.block_height_status("primary", "u1").await;
        assert_eq!(status.error.as_deref(), Some("connection refused"));
        // The error update left the height alone.
        assert_eq!(status.block_height, 7);

        store.process_block_height_update("primary", "u1", 8).await;
        let status = store.block_height_status("primary", "u1").await;
        assert_eq!(status.error, None);
        assert_eq!(status.block_height, 8);
    }

    #[tokio::test]
    async fn unknown_upstream_reads_as_empty() {
        let store = spawn_store();
        let status = store.block_height_status("primary", "ghost").await;
        assert_eq!(status.block_height, 0);
        assert_eq!(status.error, None);
        assert_eq!(status.upstream_id, "ghost");
    }

    #[tokio::test]
    async fn read_after_write_observes_the_write() {
        let store = spawn_store();
        for height in 1..=100u64 {
            store.process_block_height_update("primary", "u1", height).await;
            let status = store.block_height_status("primary", "u1").await;
            assert_eq!(status.block_height, height);
        }
    }
}
