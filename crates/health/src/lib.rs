//! Upstream health checking.
//!
//! The [`HealthCheckManager`] owns one [`UpstreamStatus`] per configured
//! upstream and drives four probes against each: chain-tip height (polled or
//! via a `newHeads` subscription), peer count, sync status, and a passive
//! error/latency check fed by real request outcomes. Observations are
//! published into the chain metadata store; routing filters read them back
//! through the pure accessors on each checker.

mod checkers;
mod manager;
mod probe;

pub use checkers::{
    BlockHeightChecker, ErrorLatencyChecker, PeerCountChecker, RequestOutcome, SyncingChecker,
    MINIMUM_PEER_COUNT,
};
pub use manager::{HealthCheckManager, UpstreamStatus, PERIODIC_HEALTH_CHECK_INTERVAL};
pub use probe::{EthProbe, JsonRpcProbe, NewHeadsStream, ProbeError, SyncStatus};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
