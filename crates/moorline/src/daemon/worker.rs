//! The change worker: heartbeat, change-feed consumption, typed dispatch.
//!
//! All mutable worker state lives here and is touched only by the thread
//! running [`ChangesWorker::run`]: commands arrive over a queue, the idle
//! tick over a timer channel, and both are drained by the same
//! `crossbeam::select!`. That makes the fetch-classify-dispatch-advance
//! sequence single-flight by construction.

use std::sync::Arc;

use crossbeam::channel::{Receiver, after};
use tracing::{debug, error, info, trace, warn};

use moorline_core::{ChangeKind, NodeIdentity, Version};

use crate::config::Config;
use crate::exchange::{
    ChangesPage, ExchangeError, ExchangeGateway, MINIMUM_EXCHANGE_VERSION, NodeAuth,
};
use crate::store::{
    AgentStore, EVENT_HEARTBEAT_FAILED, EVENT_HEARTBEAT_RESTORED, Severity, StoreError,
};

use super::bus::MessageBus;
use super::clock::Clock;
use super::event::{Event, HeartbeatStatus, NodeShutdownReason};
use super::heartbeat::{HeartbeatEdge, HeartbeatTracker};
use super::poll::PollGovernor;

/// Commands drained by the worker thread. Every external input to the
/// worker arrives in this form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Activity elsewhere in the agent; keep the poll interval short.
    ResetInterval,
    /// The node has at least one agreement; the interval may now grow.
    AgreementReached,
    /// The node obtained its Exchange identity.
    DeviceRegistered {
        org: String,
        id: String,
        token: String,
    },
    /// Unified shutdown with a reason code.
    Terminate { reason: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerPhase {
    /// No Exchange identity yet; ticks are no-ops.
    Unregistered,
    /// Re-seeding the cursor after registration.
    Bootstrapping,
    /// Consuming the feed with a healthy heartbeat.
    Steady,
    /// Consuming attempts continue but the heartbeat is failed.
    Degraded,
    ShuttingDown,
}

pub struct ChangesWorker {
    store: AgentStore,
    gateway: Arc<dyn ExchangeGateway>,
    bus: MessageBus,
    clock: Arc<dyn Clock>,
    auth: Option<NodeAuth>,
    phase: WorkerPhase,
    /// Next change id to consume; 0 means uninitialized.
    change_id: u64,
    poll: PollGovernor,
    heartbeat: HeartbeatTracker,
    max_records: u32,
    /// When the tick body last ran, for early dispatch from the command
    /// handler.
    last_dispatch_ms: u64,
}

impl ChangesWorker {
    pub fn new(
        store: AgentStore,
        gateway: Arc<dyn ExchangeGateway>,
        bus: MessageBus,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let change_id = store.load_cursor()?;
        if change_id != 0 {
            debug!(change_id, "restored change cursor");
        }
        let auth = store
            .load_registration()?
            .map(|registration| NodeAuth::new(registration.node, registration.token));
        let phase = if auth.is_some() {
            WorkerPhase::Steady
        } else {
            WorkerPhase::Unregistered
        };
        let now_ms = clock.now_ms();
        Ok(Self {
            store,
            gateway,
            bus,
            auth,
            phase,
            change_id,
            poll: PollGovernor::new(&config.poll),
            heartbeat: HeartbeatTracker::new(config.effective_heartbeat_grace_secs(), now_ms),
            max_records: config.max_records_per_fetch,
            last_dispatch_ms: now_ms,
            clock,
        })
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub fn cursor(&self) -> u64 {
        self.change_id
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        self.poll.current()
    }

    /// First-boot alignment. If the node is registered but has never
    /// consumed a change, seed the cursor from the Exchange's current
    /// maximum and broadcast every change kind so downstream workers re-read
    /// the world.
    pub fn initialize(&mut self) {
        let Some(auth) = self.auth.clone() else {
            return;
        };
        if self.change_id == 0 {
            self.phase = WorkerPhase::Bootstrapping;
            self.reseed_cursor(&auth);
            self.broadcast_all_kinds();
            self.phase = WorkerPhase::Steady;
        }
        self.refresh_node_intervals(&auth);
    }

    /// Drain commands and run the idle tick until terminated. The tick
    /// period follows the poll governor.
    pub fn run(mut self, commands: &Receiver<Command>) {
        info!("starting exchange changes worker");
        self.initialize();
        loop {
            let tick = after(self.poll.current());
            crossbeam::select! {
                recv(commands) -> msg => match msg {
                    Ok(command) => {
                        if !self.dispatch(command) {
                            break;
                        }
                    }
                    // Command senders are gone; nothing can reach us.
                    Err(_) => break,
                },
                recv(tick) -> _ => self.tick(),
            }
        }
        self.phase = WorkerPhase::ShuttingDown;
        info!("exchange changes worker stopped");
    }

    /// Handle one command. Returns false when the worker must stop.
    pub fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::ResetInterval => {
                self.poll.record_activity();
                self.maybe_early_dispatch();
            }
            Command::AgreementReached => {
                self.poll.mark_agreement();
                self.poll.record_activity();
                self.maybe_early_dispatch();
            }
            Command::DeviceRegistered { org, id, token } => {
                self.handle_registration(org, id, token);
            }
            Command::Terminate { reason } => {
                info!(reason, "terminate command received");
                return false;
            }
        }
        true
    }

    /// One no-work pass: heartbeat plus change processing.
    pub fn tick(&mut self) {
        if self.auth.is_none() {
            debug!("waiting for exchange registration");
            return;
        }
        self.find_and_process_changes();
    }

    /// A steady stream of commands can starve the idle tick. When the tick
    /// body has not run for a full poll interval, run it from the command
    /// handler to guarantee progress.
    fn maybe_early_dispatch(&mut self) {
        if self.auth.is_none() {
            return;
        }
        let now_ms = self.clock.now_ms();
        let interval_ms = self.poll.current_secs().saturating_mul(1_000);
        if now_ms.saturating_sub(self.last_dispatch_ms) >= interval_ms {
            trace!("early dispatch checking for changes");
            self.find_and_process_changes();
        }
    }

    fn find_and_process_changes(&mut self) {
        self.last_dispatch_ms = self.clock.now_ms();
        let Some(auth) = self.auth.clone() else {
            return;
        };
        if self.change_id == 0 {
            warn!("no starting change id");
            return;
        }

        debug!(change_id = self.change_id, "looking for changes");
        let page = match self
            .gateway
            .changes_since(&auth, self.change_id, self.max_records)
        {
            Ok(page) => page,
            Err(err) => {
                self.handle_fetch_error(&auth, &err);
                return;
            }
        };

        self.note_heartbeat_success(&auth);
        self.check_exchange_version(&page);

        let mut emit = [false; ChangeKind::ALL.len()];
        for change in &page.changes {
            trace!(?change, "change");
            match change.classify(&auth.identity) {
                Some(kind) => {
                    emit[kind as usize] = true;
                    // The node record itself moved; its stored poll bounds
                    // may have changed with it.
                    if kind == ChangeKind::Node {
                        self.refresh_node_intervals(&auth);
                    }
                }
                None => trace!(
                    resource = %change.resource,
                    org = %change.org_id,
                    id = %change.id,
                    "unhandled change"
                ),
            }
        }

        let interesting = emit.iter().any(|set| *set);
        for kind in ChangeKind::ALL {
            if emit[kind as usize] {
                self.bus.publish(Event::ExchangeChange { kind });
            }
        }

        // Persist the cursor only after the events are on the bus: a crash
        // in between duplicates delivery, never loses it. Uninteresting
        // changes advance the cursor too.
        if page.most_recent_change_id != 0 {
            self.persist_cursor(page.most_recent_change_id + 1);
        }

        // A flood of uninteresting changes must not keep the interval short.
        if interesting {
            self.poll.record_activity();
        } else if self.poll.record_idle() {
            let (_, _, step) = self.poll.bounds();
            debug!(
                interval = self.poll.current_secs(),
                step, "increased change poll interval"
            );
        }
        debug!("done looking for changes");
    }

    fn handle_fetch_error(&mut self, auth: &NodeAuth, err: &ExchangeError) {
        error!(%err, "heartbeat and change retrieval failed");

        if err.is_auth_dead() {
            // The node entry no longer exists; a full quiesce must begin.
            self.bus.publish(Event::NodeShutdown {
                reason: NodeShutdownReason::StartUnconfigure,
            });
            return;
        }

        // Client retries are short, so errors land here quickly; keep the
        // tick interval minimal and let the worker itself retry soon.
        self.poll.record_activity();

        if let Some(HeartbeatEdge::Failed) = self.heartbeat.note_failure(self.clock.now_ms()) {
            self.phase = WorkerPhase::Degraded;
            let org = auth.identity.org.clone();
            let id = auth.identity.id.clone();
            self.log_node_event(
                Severity::Error,
                EVENT_HEARTBEAT_FAILED,
                vec![org.clone(), id.clone(), err.to_string()],
            );
            self.bus.publish(Event::HeartbeatStateChange {
                status: HeartbeatStatus::Failed,
                org,
                id,
            });
        }
    }

    fn note_heartbeat_success(&mut self, auth: &NodeAuth) {
        if let Some(HeartbeatEdge::Restored) = self.heartbeat.note_success(self.clock.now_ms()) {
            self.phase = WorkerPhase::Steady;
            info!("node heartbeat restored");
            let org = auth.identity.org.clone();
            let id = auth.identity.id.clone();
            self.log_node_event(
                Severity::Info,
                EVENT_HEARTBEAT_RESTORED,
                vec![org.clone(), id.clone()],
            );
            self.bus.publish(Event::HeartbeatStateChange {
                status: HeartbeatStatus::Restored,
                org,
                id,
            });
        }
    }

    fn handle_registration(&mut self, org: String, id: String, token: String) {
        info!(%org, %id, "device registered with the exchange");
        let auth = NodeAuth::new(NodeIdentity::new(org, id), token);
        self.auth = Some(auth.clone());
        self.phase = WorkerPhase::Bootstrapping;

        self.refresh_node_intervals(&auth);
        self.reseed_cursor(&auth);

        // Safety measure so the agent re-reads everything it depends on.
        self.broadcast_all_kinds();
        self.phase = WorkerPhase::Steady;
    }

    /// Align the cursor with the current head of the feed. The gateway
    /// retries transport failures unboundedly here; consuming from an
    /// unknown starting point is worse than waiting.
    fn reseed_cursor(&mut self, auth: &NodeAuth) {
        match self.gateway.current_max_change_id(auth) {
            Ok(max_change_id) => {
                debug!(max_change_id, "seeding cursor from exchange maximum");
                self.persist_cursor(max_change_id);
            }
            Err(err) => error!(%err, "failed to retrieve max change id"),
        }
    }

    fn persist_cursor(&mut self, change_id: u64) {
        self.change_id = change_id;
        if let Err(err) = self.store.save_cursor(change_id) {
            // Keep going on the in-memory cursor; replay after a restart is
            // safe because dispatch is idempotent.
            error!(%err, change_id, "failed to persist change cursor");
        }
    }

    fn broadcast_all_kinds(&mut self) {
        for kind in ChangeKind::ALL {
            self.bus.publish(Event::ExchangeChange { kind });
        }
    }

    fn refresh_node_intervals(&mut self, auth: &NodeAuth) {
        match self.gateway.node_heartbeat_intervals(auth) {
            Ok(Some(intervals)) => {
                if self.poll.apply_node_intervals(&intervals) {
                    let (min, max, step) = self.poll.bounds();
                    info!(min, max, step, "poll intervals taken from node record");
                }
            }
            Ok(None) => debug!("node record not found while reading heartbeat intervals"),
            Err(err) => error!(%err, "failed to retrieve node heartbeat intervals"),
        }
    }

    fn check_exchange_version(&self, page: &ChangesPage) {
        if page.exchange_version.is_empty() {
            return;
        }
        match Version::parse(&page.exchange_version) {
            Ok(version) => {
                if let Ok(minimum) = Version::parse(MINIMUM_EXCHANGE_VERSION)
                    && version < minimum
                {
                    error!(
                        exchange_version = %page.exchange_version,
                        minimum = MINIMUM_EXCHANGE_VERSION,
                        "exchange version is below the supported minimum"
                    );
                }
            }
            Err(err) => error!(%err, "exchange reported an unparseable version"),
        }
    }

    fn log_node_event(&self, severity: Severity, message_id: &str, params: Vec<String>) {
        if let Err(err) =
            self.store
                .append_event(self.clock.now_ms(), severity, message_id, &params)
        {
            error!(%err, message_id, "failed to append event log entry");
        }
    }
}
