//! Aggregated chain-tip state for one chain.
//!
//! Every probe on every upstream reports its observations here, and every
//! routing filter reads its height snapshots from here. All access is
//! funneled through a single worker task so concurrent probes compose
//! without call-site locking: writers enqueue, readers enqueue and wait on a
//! one-shot reply, and the worker applies everything in enqueue order.

mod store;

pub use store::{BlockHeightStatus, ChainMetadataStore, ChainStateHandle};
