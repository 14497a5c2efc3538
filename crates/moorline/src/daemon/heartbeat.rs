//! Heartbeat state tracking.
//!
//! The heartbeat rides on the change-feed request, so every fetch outcome
//! feeds the tracker. Failures within the grace window are tolerated (the
//! Exchange may just be under load), and state changes are reported on
//! edges only, never on levels.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatEdge {
    Failed,
    Restored,
}

#[derive(Clone, Debug)]
pub struct HeartbeatTracker {
    last_success_ms: u64,
    failed: bool,
    grace_ms: u64,
}

impl HeartbeatTracker {
    /// `now_ms` seeds the success window, so grace is honored from startup
    /// even before the first successful fetch.
    pub fn new(grace_secs: u64, now_ms: u64) -> Self {
        Self {
            last_success_ms: now_ms,
            failed: false,
            grace_ms: grace_secs.saturating_mul(1_000),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn note_success(&mut self, now_ms: u64) -> Option<HeartbeatEdge> {
        self.last_success_ms = now_ms;
        if self.failed {
            self.failed = false;
            return Some(HeartbeatEdge::Restored);
        }
        None
    }

    pub fn note_failure(&mut self, now_ms: u64) -> Option<HeartbeatEdge> {
        if !self.failed && now_ms.saturating_sub(self.last_success_ms) > self.grace_ms {
            self.failed = true;
            return Some(HeartbeatEdge::Failed);
        }
        None
    }
}
