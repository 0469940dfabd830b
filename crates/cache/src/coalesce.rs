//! Single-flight registry keyed by cache key.
//!
//! The first caller for a key becomes the builder and owns the in-flight
//! origin call; everyone else attaches to a watch channel and receives the
//! same outcome. Entries are removed as soon as they resolve, so failures
//! are never memoized. A builder that is dropped mid-flight (caller
//! cancelled) publishes a cancellation outcome instead of leaving waiters
//! hanging, and waiters then retry from the top without evicting each other.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::watch;

use crate::CacheError;

type Registry = Arc<DashMap<String, watch::Receiver<Option<OnceOutcome>>>>;

/// What an attached waiter observes.
#[derive(Debug, Clone)]
pub(crate) enum OnceOutcome {
    /// The build finished; success and failure are both shared.
    Resolved(Result<Bytes, CacheError>),
    /// The builder went away before finishing.
    Cancelled,
}

/// How a caller participates in the flight for a key.
#[derive(Debug)]
pub(crate) enum Role {
    /// First in; must run the build and resolve the [`Completion`].
    Builder(Completion),
    /// Attached to an existing flight.
    Waiter(watch::Receiver<Option<OnceOutcome>>),
}

#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    inflight: Registry,
}

// === impl SingleFlight ===

impl SingleFlight {
    /// Joins the flight for `key`, either as its builder or as a waiter.
    pub(crate) fn join(&self, key: &str) -> Role {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => Role::Waiter(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                Role::Builder(Completion {
                    key: key.to_string(),
                    tx: Some(tx),
                    registry: Arc::clone(&self.inflight),
                })
            }
        }
    }
}

/// Waits until the flight resolves or its builder disappears.
pub(crate) async fn wait(mut rx: watch::Receiver<Option<OnceOutcome>>) -> OnceOutcome {
    loop {
        if let Some(outcome) = rx.borrow().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return OnceOutcome::Cancelled;
        }
    }
}

/// The builder's obligation to publish an outcome.
///
/// Dropping it without resolving publishes [`OnceOutcome::Cancelled`].
#[derive(Debug)]
pub(crate) struct Completion {
    key: String,
    tx: Option<watch::Sender<Option<OnceOutcome>>>,
    registry: Registry,
}

// === impl Completion ===

impl Completion {
    /// Publishes the build result to every waiter and retires the flight.
    pub(crate) fn resolve(mut self, result: Result<Bytes, CacheError>) {
        if let Some(tx) = self.tx.take() {
            self.registry.remove(&self.key);
            let _ = tx.send(Some(OnceOutcome::Resolved(result)));
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.registry.remove(&self.key);
            let _ = tx.send(Some(OnceOutcome::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn first_caller_builds_waiters_share() {
        let flight = SingleFlight::default();

        let Role::Builder(completion) = flight.join("k") else { panic!("expected builder") };
        let Role::Waiter(rx) = flight.join("k") else { panic!("expected waiter") };

        completion.resolve(Ok(Bytes::from_static(b"value")));
        assert_matches!(
            wait(rx).await,
            OnceOutcome::Resolved(Ok(bytes)) if bytes == Bytes::from_static(b"value")
        );

        // The flight retired with the resolution.
        assert_matches!(flight.join("k"), Role::Builder(_));
    }

    #[tokio::test]
    async fn failure_is_shared_but_not_memoized() {
        let flight = SingleFlight::default();

        let Role::Builder(completion) = flight.join("k") else { panic!("expected builder") };
        let Role::Waiter(rx) = flight.join("k") else { panic!("expected waiter") };

        completion.resolve(Err(CacheError::origin("boom")));
        assert_matches!(wait(rx).await, OnceOutcome::Resolved(Err(CacheError::Origin(_))));
        assert_matches!(flight.join("k"), Role::Builder(_));
    }

    #[tokio::test]
    async fn dropped_builder_cancels_waiters() {
        let flight = SingleFlight::default();

        let Role::Builder(completion) = flight.join("k") else { panic!("expected builder") };
        let Role::Waiter(rx) = flight.join("k") else { panic!("expected waiter") };

        drop(completion);
        assert_matches!(wait(rx).await, OnceOutcome::Cancelled);
        // The key is free for the next caller.
        assert_matches!(flight.join("k"), Role::Builder(_));
    }

    #[tokio::test]
    async fn keys_do_not_interfere() {
        let flight = SingleFlight::default();
        assert_matches!(flight.join("a"), Role::Builder(_));
        assert_matches!(flight.join("b"), Role::Builder(_));
    }
}
