//! Worker wiring: event intake and the worker thread.
//!
//! Two threads per worker. The intake thread demultiplexes bus events into
//! typed commands and never touches worker state; the worker thread owns the
//! state and drains the command queue alongside its idle tick.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Sender, unbounded};
use tracing::debug;

use crate::config::Config;
use crate::exchange::{ExchangeGateway, HttpExchangeClient, RetryPolicy};
use crate::store::{AgentStore, StoreError};

use super::bus::MessageBus;
use super::clock::{Clock, SystemClock};
use super::event::{CancelationReason, CompletionReason, Event, StopReason};
use super::worker::{ChangesWorker, Command};

pub struct WorkerHandle {
    commands: Sender<Command>,
    bus: MessageBus,
    intake: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl WorkerHandle {
    /// Direct command access, for embedders that bypass the bus.
    pub fn commands(&self) -> Sender<Command> {
        self.commands.clone()
    }

    /// Ask the worker to stop and wait for both threads.
    pub fn stop(self) {
        self.bus.publish(Event::ChangesShutdown {
            reason: StopReason::MessageStop,
        });
        self.join();
    }

    /// Wait for both threads; some published shutdown event must end them.
    pub fn join(self) {
        let _ = self.intake.join();
        let _ = self.worker.join();
    }
}

/// The gateway a production worker runs against: the HTTP client with the
/// short worker retry policy, so transport failures surface quickly and the
/// tick loop itself retries.
pub fn default_gateway(config: &Config) -> Arc<dyn ExchangeGateway> {
    Arc::new(
        HttpExchangeClient::new(&config.normalized_exchange_url(), &config.http)
            .with_retry(RetryPolicy::worker()),
    )
}

/// Spawn the change worker against the given store, gateway, and bus.
pub fn spawn_worker(
    store: AgentStore,
    gateway: Arc<dyn ExchangeGateway>,
    bus: MessageBus,
    config: &Config,
) -> Result<WorkerHandle, StoreError> {
    spawn_worker_with_clock(store, gateway, bus, config, Arc::new(SystemClock))
}

pub fn spawn_worker_with_clock(
    store: AgentStore,
    gateway: Arc<dyn ExchangeGateway>,
    bus: MessageBus,
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<WorkerHandle, StoreError> {
    let worker = ChangesWorker::new(store, gateway, bus.clone(), config, clock)?;

    let (command_tx, command_rx) = unbounded::<Command>();
    let events = bus.subscribe();

    let intake_tx = command_tx.clone();
    let intake = thread::spawn(move || {
        for event in events.iter() {
            let Some(command) = command_for(&event) else {
                continue;
            };
            let stop = matches!(command, Command::Terminate { .. });
            if intake_tx.send(command).is_err() {
                break;
            }
            if stop {
                debug!("event intake stopped");
                break;
            }
        }
    });

    let worker_thread = thread::spawn(move || worker.run(&command_rx));

    Ok(WorkerHandle {
        commands: command_tx,
        bus,
        intake,
        worker: worker_thread,
    })
}

/// Map a bus event to the worker command it triggers. Events the worker
/// itself emits map to nothing.
fn command_for(event: &Event) -> Option<Command> {
    match event {
        Event::DeviceRegistered { org, id, token } => Some(Command::DeviceRegistered {
            org: org.clone(),
            id: id.clone(),
            token: token.clone(),
        }),
        Event::AgreementReached => Some(Command::AgreementReached),
        Event::NodePolicyChanged | Event::NodeUserInputChanged => Some(Command::ResetInterval),
        Event::WorkloadCancelation {
            reason: CancelationReason::AgreementEnded,
        }
        | Event::AgreementCancelation {
            reason: CancelationReason::AgreementEnded,
        } => Some(Command::ResetInterval),
        Event::ChangesShutdown {
            reason: StopReason::MessageStop,
        } => Some(Command::Terminate {
            reason: "stop requested",
        }),
        Event::NodeShutdownComplete {
            reason: CompletionReason::UnconfigureComplete,
        } => Some(Command::Terminate {
            reason: "unconfigure complete",
        }),
        Event::ExchangeChange { .. }
        | Event::HeartbeatStateChange { .. }
        | Event::NodeShutdown { .. } => None,
    }
}
