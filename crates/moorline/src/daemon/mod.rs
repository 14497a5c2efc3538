//! Daemon module - the agent-side synchronization service.
//!
//! Provides:
//! - the internal message bus and its event vocabulary
//! - the adaptive poll governor and heartbeat tracker
//! - the change worker and its thread wiring

pub mod bus;
pub mod clock;
pub mod event;
pub mod heartbeat;
pub mod poll;
pub mod run;
pub mod worker;

pub use bus::MessageBus;
pub use clock::{Clock, SystemClock};
pub use event::{
    CancelationReason, CompletionReason, Event, HeartbeatStatus, NodeShutdownReason, StopReason,
};
pub use heartbeat::{HeartbeatEdge, HeartbeatTracker};
pub use poll::PollGovernor;
pub use run::{WorkerHandle, default_gateway, spawn_worker, spawn_worker_with_clock};
pub use worker::{ChangesWorker, Command, WorkerPhase};
