//! The lab platform: deterministic virtual-time host for tests.
//!
//! Thunks run in strict FIFO order, every pending microtask before the next
//! macrotask, and time only advances when the test calls
//! [`LabPlatform::advance`]. Timer thunks fire in deadline order (armed
//! order breaks ties), and the task queues drain after each firing, so a
//! timer's consequences are fully settled before the next timer runs.

use super::{Platform, PortalDock, PortalPump, Thunk};
use crate::types::{Time, TimerKey};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

struct LabCore {
    now: Time,
    fast: VecDeque<Thunk>,
    normal: VecDeque<Thunk>,
    timers: BTreeMap<(Time, u64), Thunk>,
    next_timer: u64,
    pump: Option<PortalPump>,
}

/// A deterministic single-threaded platform on virtual time.
#[derive(Clone)]
pub struct LabPlatform {
    core: Rc<RefCell<LabCore>>,
    dock: Arc<PortalDock>,
}

impl Default for LabPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LabPlatform {
    /// Creates a lab platform at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Rc::new(RefCell::new(LabCore {
                now: Time::ZERO,
                fast: VecDeque::new(),
                normal: VecDeque::new(),
                timers: BTreeMap::new(),
                next_timer: 0,
                pump: None,
            })),
            dock: PortalDock::new(),
        }
    }

    /// Runs queued thunks until both queues are empty and the portal pump
    /// reports no new work. Returns the number of thunks run.
    pub fn run_until_idle(&self) -> u64 {
        let mut steps = 0;
        loop {
            let thunk = {
                let mut core = self.core.borrow_mut();
                core.fast.pop_front().or_else(|| core.normal.pop_front())
            };
            if let Some(thunk) = thunk {
                steps += 1;
                thunk();
                continue;
            }
            let pumped = {
                // The pump re-enters the platform to post follow-up thunks;
                // it must run without the core borrowed.
                let pump = self.core.borrow_mut().pump.take();
                match pump {
                    Some(pump) => {
                        let produced = !self.dock.is_idle() && pump();
                        self.core.borrow_mut().pump = Some(pump);
                        produced
                    }
                    None => false,
                }
            };
            if !pumped {
                return steps;
            }
        }
    }

    /// Advances virtual time, firing due timers in deadline order and
    /// draining the task queues after each firing.
    pub fn advance(&self, delta: Duration) {
        self.run_until_idle();
        let target = self.core.borrow().now + delta;
        loop {
            let due = {
                let mut core = self.core.borrow_mut();
                let key = core
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                key.map(|key| {
                    core.now = key.0;
                    (key, core.timers.remove(&key).expect("timer vanished"))
                })
            };
            match due {
                Some((_, thunk)) => {
                    thunk();
                    self.run_until_idle();
                }
                None => break,
            }
        }
        self.core.borrow_mut().now = target;
    }

    /// Returns the number of armed timers.
    #[must_use]
    pub fn armed_timers(&self) -> usize {
        self.core.borrow().timers.len()
    }
}

impl Platform for LabPlatform {
    fn post_fast(&self, thunk: Thunk) {
        self.core.borrow_mut().fast.push_back(thunk);
    }

    fn post_normal(&self, thunk: Thunk) {
        self.core.borrow_mut().normal.push_back(thunk);
    }

    fn arm_timer(&self, delay: Duration, thunk: Thunk) -> TimerKey {
        let mut core = self.core.borrow_mut();
        let deadline = core.now + delay;
        let serial = core.next_timer;
        core.next_timer += 1;
        core.timers.insert((deadline, serial), thunk);
        TimerKey::from_raw(serial)
    }

    fn disarm_timer(&self, key: TimerKey) {
        let mut core = self.core.borrow_mut();
        let found = core
            .timers
            .keys()
            .find(|(_, serial)| *serial == key.raw())
            .copied();
        if let Some(found) = found {
            core.timers.remove(&found);
        }
    }

    fn now(&self) -> Time {
        self.core.borrow().now
    }

    fn dock(&self) -> Arc<PortalDock> {
        Arc::clone(&self.dock)
    }

    fn set_portal_pump(&self, pump: PortalPump) {
        self.core.borrow_mut().pump = Some(pump);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Thunk) {
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let writer = Rc::clone(&log);
        let note = move |tag: &'static str| -> Thunk {
            let log = Rc::clone(&writer);
            Box::new(move || log.borrow_mut().push(tag))
        };
        (log, note)
    }

    #[test]
    fn fast_runs_before_normal() {
        let platform = LabPlatform::new();
        let (log, note) = recorder();
        platform.post_normal(note("normal"));
        platform.post_fast(note("fast"));
        platform.run_until_idle();
        assert_eq!(&*log.borrow(), &["fast", "normal"]);
    }

    #[test]
    fn queues_are_fifo() {
        let platform = LabPlatform::new();
        let (log, note) = recorder();
        platform.post_fast(note("a"));
        platform.post_fast(note("b"));
        platform.run_until_idle();
        assert_eq!(&*log.borrow(), &["a", "b"]);
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let platform = LabPlatform::new();
        let (log, note) = recorder();
        platform.arm_timer(Duration::from_millis(20), note("late"));
        platform.arm_timer(Duration::from_millis(10), note("early"));
        platform.advance(Duration::from_millis(30));
        assert_eq!(&*log.borrow(), &["early", "late"]);
        assert_eq!(platform.now(), Time::from_millis(30));
    }

    #[test]
    fn disarmed_timer_never_fires() {
        let platform = LabPlatform::new();
        let (log, note) = recorder();
        let key = platform.arm_timer(Duration::from_millis(5), note("boom"));
        platform.disarm_timer(key);
        platform.advance(Duration::from_millis(10));
        assert!(log.borrow().is_empty());
        assert_eq!(platform.armed_timers(), 0);
    }

    #[test]
    fn advance_only_fires_due_timers() {
        let platform = LabPlatform::new();
        let (log, note) = recorder();
        platform.arm_timer(Duration::from_millis(50), note("far"));
        platform.advance(Duration::from_millis(10));
        assert!(log.borrow().is_empty());
        platform.advance(Duration::from_millis(40));
        assert_eq!(&*log.borrow(), &["far"]);
    }

    #[test]
    fn timer_consequences_settle_between_firings() {
        let platform = LabPlatform::new();
        let (log, note) = recorder();
        let inner = platform.clone();
        let chased = note("chased");
        platform.arm_timer(
            Duration::from_millis(10),
            Box::new(move || inner.post_fast(chased)),
        );
        platform.arm_timer(Duration::from_millis(20), note("second"));
        platform.advance(Duration::from_millis(25));
        assert_eq!(&*log.borrow(), &["chased", "second"]);
    }
}
