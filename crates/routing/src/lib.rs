//! Upstream selection.
//!
//! Routing composes three layers: pure [`NodeFilter`] predicates over the
//! health view, a filtering strategy that applies them per priority bucket
//! (optionally relaxing removable filters until something routes), and a
//! priority round-robin selector at the leaf.

mod filters;
mod priority;
mod strategy;

pub use filters::{
    AndFilter, AreMethodsAllowed, HasEnoughPeers, IsAtMaxHeightForGroup,
    IsCloseToGlobalMaxHeight, IsDoneSyncing, NodeFilter, TAG_GLOBAL_MAX_HEIGHT, TAG_HEALTHY,
    TAG_MAX_HEIGHT_FOR_GROUP, TAG_METHODS_ALLOWED, TAG_NEAR_GLOBAL_MAX_HEIGHT,
};
pub use priority::{build_priority_map, PriorityToUpstreamsMap};
pub use strategy::{
    AlwaysRouteFilteringStrategy, FilteringRoutingStrategy, PriorityRoundRobinStrategy,
    RoutingError, RoutingStrategy,
};
