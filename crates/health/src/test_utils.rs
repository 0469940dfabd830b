//! Probe doubles for tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::probe::{EthProbe, NewHeadsStream, ProbeError, SyncStatus};

#[derive(Debug)]
struct MockState {
    block_number: Result<u64, ProbeError>,
    sync_status: Result<SyncStatus, ProbeError>,
    peer_count: Result<u64, ProbeError>,
    new_heads: Option<Vec<Result<u64, ProbeError>>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            block_number: Ok(0),
            sync_status: Ok(SyncStatus::Synced),
            peer_count: Ok(25),
            new_heads: None,
        }
    }
}

/// A scriptable [`EthProbe`] for tests.
///
/// Defaults to a healthy node at height 0 with 25 peers and no websocket.
/// Clones share state, so a probe handed to a checker can be re-scripted
/// mid-test.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

// === impl MockProbe ===

impl MockProbe {
    /// Scripts the next `block_number` results.
    pub fn set_block_number(&self, result: Result<u64, ProbeError>) {
        self.state.lock().block_number = result;
    }

    /// Scripts the next `sync_status` results.
    pub fn set_sync_status(&self, result: Result<SyncStatus, ProbeError>) {
        self.state.lock().sync_status = result;
    }

    /// Scripts the next `peer_count` results.
    pub fn set_peer_count(&self, result: Result<u64, ProbeError>) {
        self.state.lock().peer_count = result;
    }

    /// Scripts a `newHeads` subscription delivering the given items and then
    /// staying open.
    pub fn set_new_heads(&self, heads: Vec<Result<u64, ProbeError>>) {
        self.state.lock().new_heads = Some(heads);
    }
}

#[async_trait]
impl EthProbe for MockProbe {
    async fn block_number(&self) -> Result<u64, ProbeError> {
        self.state.lock().block_number.clone()
    }

    async fn sync_status(&self) -> Result<SyncStatus, ProbeError> {
        self.state.lock().sync_status.clone()
    }

    async fn peer_count(&self) -> Result<u64, ProbeError> {
        self.state.lock().peer_count.clone()
    }

    async fn subscribe_new_heads(&self) -> Result<NewHeadsStream, ProbeError> {
        use futures::StreamExt;

        let heads = self.state.lock().new_heads.take();
        match heads {
            // The subscription stays open after the scripted heads, like a
            // real websocket would.
            Some(heads) => {
                Ok(Box::pin(futures::stream::iter(heads).chain(futures::stream::pending())))
            }
            None => Err(ProbeError::Transport("no ws endpoint".to_string())),
        }
    }
}
