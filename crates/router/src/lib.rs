//! The per-chain router: request in, upstream picked, response out.
//!
//! [`Router`] owns the read-only priority map, asks the routing strategy for
//! an upstream, and hands the request to the [`RequestExecutor`], which
//! forwards it over HTTP with the upstream's auth and headers and routes
//! cacheable single requests through the response cache. Request outcomes
//! feed the passive health checker and the request metrics.

mod executor;
mod router;

pub use executor::{ExecutionResult, OriginError, RawResponse, RequestExecutor};
pub use router::{default_routing_strategy, Router, RouterError};
