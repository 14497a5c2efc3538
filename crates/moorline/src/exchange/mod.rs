//! Typed client for the Exchange coordination service.
//!
//! Provides:
//! - [`HttpExchangeClient`]: authenticated request/response calls with
//!   transport/application error classification
//! - definition lookup for workloads, microservices, organizations, and
//!   blockchain clients
//! - [`ExchangeGateway`]: the narrow seam the change worker consumes

pub mod client;
pub mod definitions;
pub mod wire;

use std::time::Duration;

pub use client::{ExchangeError, HttpExchangeClient, NodeAuth, RetryPolicy};
pub use wire::{ApiSpec, ChangesPage, HeartbeatIntervals};

/// Oldest Exchange the agent knows how to talk to. Older versions are
/// reported, not refused.
pub const MINIMUM_EXCHANGE_VERSION: &str = "2.0.0";

/// Interval between unbounded retries of calls the agent cannot proceed
/// without.
const RESEED_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// The Exchange operations the change worker depends on, as a seam for test
/// doubles. Identity travels with every call because the worker can be
/// re-identified at registration time.
pub trait ExchangeGateway: Send + Sync {
    /// One page of the change feed, doubling as the node heartbeat.
    fn changes_since(
        &self,
        auth: &NodeAuth,
        change_id: u64,
        max_records: u32,
    ) -> Result<ChangesPage, ExchangeError>;

    /// The current global maximum change id. Implementations retry transport
    /// failures unboundedly: the worker must not advance from an unknown
    /// starting point. Application errors still surface.
    fn current_max_change_id(&self, auth: &NodeAuth) -> Result<u64, ExchangeError>;

    /// The node's own stored heartbeat intervals, `None` when the node
    /// record is absent.
    fn node_heartbeat_intervals(
        &self,
        auth: &NodeAuth,
    ) -> Result<Option<HeartbeatIntervals>, ExchangeError>;
}

impl ExchangeGateway for HttpExchangeClient {
    fn changes_since(
        &self,
        auth: &NodeAuth,
        change_id: u64,
        max_records: u32,
    ) -> Result<ChangesPage, ExchangeError> {
        self.fetch_changes(auth, &auth.identity.org, change_id, max_records, &self.retry())
    }

    fn current_max_change_id(&self, auth: &NodeAuth) -> Result<u64, ExchangeError> {
        self.max_change_id(
            auth,
            &auth.identity.org,
            &RetryPolicy::unbounded(RESEED_RETRY_INTERVAL),
        )
    }

    fn node_heartbeat_intervals(
        &self,
        auth: &NodeAuth,
    ) -> Result<Option<HeartbeatIntervals>, ExchangeError> {
        let node = self.get_node(auth, &auth.identity)?;
        Ok(node.map(|record| record.heartbeat_intervals))
    }
}
