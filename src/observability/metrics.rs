//! Stage metrics.
//!
//! Counters for the quantities a supervisor of the runtime itself would
//! watch: gigs finished and stopped, interrupts handled per dispatch class,
//! verdicts by kind, live agents.

use core::fmt;
use std::cell::Cell;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: Cell<u64>,
}

impl Counter {
    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.set(self.value.get().wrapping_add(value));
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.get()
    }
}

/// A gauge that can go up and down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: Cell<i64>,
}

impl Gauge {
    /// Increments the gauge by 1.
    pub fn increment(&self) {
        self.value.set(self.value.get() + 1);
    }

    /// Decrements the gauge by 1.
    pub fn decrement(&self) {
        self.value.set(self.value.get() - 1);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.get()
    }
}

/// The fixed metric set the stage maintains.
#[derive(Debug, Default)]
pub struct StageMetrics {
    /// Gigs that reached a fate with a prompt.
    pub gigs_prompted: Counter,
    /// Gigs that reached a fate with a blooper.
    pub gigs_bloopered: Counter,
    /// Gigs stopped before completion.
    pub gigs_stopped: Counter,
    /// Scene steps performed.
    pub scene_steps: Counter,
    /// Immediate interrupts handled.
    pub interrupts_immediate: Counter,
    /// Fast (microtask) interrupts handled.
    pub interrupts_fast: Counter,
    /// Normal (macrotask) interrupts handled.
    pub interrupts_normal: Counter,
    /// Forgive verdicts issued.
    pub verdicts_forgive: Counter,
    /// Punish verdicts issued.
    pub verdicts_punish: Counter,
    /// Escalate verdicts issued.
    pub verdicts_escalate: Counter,
    /// Recast verdicts issued.
    pub verdicts_recast: Counter,
    /// Currently live agents.
    pub live_agents: Gauge,
}

impl fmt::Display for StageMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gigs: {}+/{}-/{}x, steps: {}, interrupts: {}i/{}f/{}n, agents: {}",
            self.gigs_prompted.get(),
            self.gigs_bloopered.get(),
            self.gigs_stopped.get(),
            self.scene_steps.get(),
            self.interrupts_immediate.get(),
            self.interrupts_fast.get(),
            self.interrupts_normal.get(),
            self.live_agents.get(),
        )
    }
}
