//! Adaptive poll-interval governor.
//!
//! A stepping function that balances freshness against Exchange load. The
//! interval starts at the minimum, grows slowly while nothing interesting
//! happens, and snaps back to the minimum on any activity. Growth waits for
//! `max / cur` consecutive idle polls, so an already-long interval climbs
//! faster.

use std::time::Duration;

use crate::config::PollConfig;
use crate::exchange::HeartbeatIntervals;

pub struct PollGovernor {
    cur: u64,
    min: u64,
    max: u64,
    step: u64,
    no_msg_count: u64,
    /// Latched for the process lifetime once the first agreement lands.
    agreement_reached: bool,
    /// When false the interval never grows; resets still apply.
    dynamic: bool,
}

impl PollGovernor {
    pub fn new(config: &PollConfig) -> Self {
        let min = config.interval_secs.max(1);
        Self {
            cur: min,
            min,
            max: config.max_interval_secs.max(min),
            step: config.increment_secs.max(1),
            no_msg_count: 0,
            agreement_reached: false,
            dynamic: config.dynamic,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_secs(self.cur)
    }

    pub fn current_secs(&self) -> u64 {
        self.cur
    }

    pub fn bounds(&self) -> (u64, u64, u64) {
        (self.min, self.max, self.step)
    }

    pub fn mark_agreement(&mut self) {
        self.agreement_reached = true;
    }

    /// Activity in the system may cause further Exchange changes soon: snap
    /// back to the minimum interval. Returns true when the interval moved.
    pub fn record_activity(&mut self) -> bool {
        let changed = self.cur != self.min;
        self.cur = self.min;
        self.no_msg_count = 0;
        changed
    }

    /// One poll came back with nothing interesting. Returns true when the
    /// interval stepped up.
    pub fn record_idle(&mut self) -> bool {
        if !self.dynamic || !self.agreement_reached || self.cur >= self.max {
            return false;
        }
        self.no_msg_count += 1;
        if self.no_msg_count >= self.max / self.cur {
            self.cur = (self.cur + self.step).min(self.max);
            self.no_msg_count = 0;
            return true;
        }
        false
    }

    /// Non-zero intervals stored on the node's Exchange record override the
    /// configured bounds. Returns true when anything changed; the interval
    /// is then reset to the (possibly new) minimum.
    pub fn apply_node_intervals(&mut self, intervals: &HeartbeatIntervals) -> bool {
        let mut updated = false;
        if intervals.min_interval != 0 {
            self.min = intervals.min_interval;
            updated = true;
        }
        if intervals.max_interval != 0 {
            self.max = intervals.max_interval;
            updated = true;
        }
        if intervals.interval_adjustment != 0 {
            self.step = intervals.interval_adjustment;
            updated = true;
        }
        if updated {
            self.record_activity();
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(min: u64, max: u64, step: u64) -> PollGovernor {
        PollGovernor::new(&PollConfig {
            interval_secs: min,
            max_interval_secs: max,
            increment_secs: step,
            dynamic: true,
        })
    }

    fn idle_until_step(governor: &mut PollGovernor) -> u64 {
        let mut polls = 0;
        while !governor.record_idle() {
            polls += 1;
            assert!(polls < 1_000, "interval never stepped");
        }
        polls + 1
    }

    #[test]
    fn holds_until_first_agreement() {
        let mut governor = governor(10, 60, 10);
        for _ in 0..100 {
            assert!(!governor.record_idle());
        }
        assert_eq!(governor.current_secs(), 10);
    }

    #[test]
    fn steps_up_after_dwell_and_caps_at_max() {
        let mut governor = governor(10, 60, 10);
        governor.mark_agreement();

        // Dwell is max / cur polls: 6 at the minimum interval.
        assert_eq!(idle_until_step(&mut governor), 6);
        assert_eq!(governor.current_secs(), 20);

        loop {
            let before = governor.current_secs();
            if before == 60 {
                break;
            }
            idle_until_step(&mut governor);
            assert!(governor.current_secs() > before);
        }
        // At the ceiling the interval stops moving.
        for _ in 0..20 {
            assert!(!governor.record_idle());
        }
        assert_eq!(governor.current_secs(), 60);
    }

    #[test]
    fn dwell_shrinks_as_the_interval_grows() {
        let mut governor = governor(10, 60, 10);
        governor.mark_agreement();

        let first_dwell = idle_until_step(&mut governor);
        let second_dwell = idle_until_step(&mut governor);
        assert!(second_dwell < first_dwell, "{second_dwell} < {first_dwell}");
    }

    #[test]
    fn activity_resets_to_minimum() {
        let mut governor = governor(10, 60, 10);
        governor.mark_agreement();
        idle_until_step(&mut governor);
        assert_eq!(governor.current_secs(), 20);

        assert!(governor.record_activity());
        assert_eq!(governor.current_secs(), 10);

        // The idle streak starts over as well.
        assert_eq!(idle_until_step(&mut governor), 6);
    }

    #[test]
    fn static_mode_never_grows_but_still_resets() {
        let mut governor = PollGovernor::new(&PollConfig {
            interval_secs: 10,
            max_interval_secs: 60,
            increment_secs: 10,
            dynamic: false,
        });
        governor.mark_agreement();
        for _ in 0..50 {
            assert!(!governor.record_idle());
        }
        assert_eq!(governor.current_secs(), 10);
        assert!(!governor.record_activity());
        assert_eq!(governor.current_secs(), 10);
    }

    #[test]
    fn node_intervals_override_bounds_and_reset() {
        let mut governor = governor(10, 60, 10);
        governor.mark_agreement();
        idle_until_step(&mut governor);
        assert_eq!(governor.current_secs(), 20);

        let updated = governor.apply_node_intervals(&HeartbeatIntervals {
            min_interval: 5,
            max_interval: 30,
            interval_adjustment: 0,
        });
        assert!(updated);
        assert_eq!(governor.bounds(), (5, 30, 10));
        assert_eq!(governor.current_secs(), 5);

        // All-zero intervals are "no override".
        assert!(!governor.apply_node_intervals(&HeartbeatIntervals::default()));
    }

    #[test]
    fn step_never_exceeds_max() {
        let mut governor = governor(50, 60, 25);
        governor.mark_agreement();
        idle_until_step(&mut governor);
        assert_eq!(governor.current_secs(), 60);
    }
}
