//! Exchange synchronization core for an edge-node agent.
//!
//! The agent stays causally aligned with a remote coordination service (the
//! Exchange) that publishes a monotonically increasing stream of
//! resource-change events. This crate provides:
//!
//! - a typed, blocking [`exchange`] client with transport/application error
//!   classification and per-call retry policies,
//! - definition lookup for workloads and microservices by name, organization,
//!   and version range,
//! - a durable [`store`] for the change cursor, registration identity, and
//!   heartbeat event log,
//! - the [`daemon`] pieces: internal bus, adaptive poll governor, heartbeat
//!   tracker, and the change worker that ties them together.
//!
//! Workload execution, container management, and the CLI live elsewhere in
//! the agent; they consume this crate through the bus events and the
//! definition-lookup API.

#![forbid(unsafe_code)]

pub use moorline_core as core;

pub mod config;
pub mod daemon;
pub mod error;
pub mod exchange;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
