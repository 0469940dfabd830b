//! The individual checker state machines.

mod block_height;
mod error_latency;
mod peer_count;
mod syncing;
mod window;

pub use block_height::BlockHeightChecker;
pub use error_latency::{ErrorLatencyChecker, RequestOutcome};
pub use peer_count::{PeerCountChecker, MINIMUM_PEER_COUNT};
pub use syncing::SyncingChecker;
