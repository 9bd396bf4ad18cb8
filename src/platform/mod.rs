//! The host kernel seam.
//!
//! The theater never touches the host event loop directly; it asks a
//! [`Platform`] to post microtasks and macrotasks, arm timers, and report
//! monotonic time. The stage's dispatch classes map onto these primitives:
//! immediate interrupts run synchronously, fast interrupts ride microtasks,
//! normal interrupts ride macrotasks.
//!
//! The [`PortalDock`] is the one `Send + Sync` surface: wakers for foreign
//! promises drop their portal key there, and the theater's portal pump polls
//! the woken portals from inside the single-threaded stage.

mod lab;

pub use lab::LabPlatform;

use crate::types::{PortalKey, Time, TimerKey};
use parking_lot::Mutex;
use std::sync::Arc;
use std::task::{Wake, Waker};
use std::time::Duration;

/// A deferred unit of host work.
pub type Thunk = Box<dyn FnOnce()>;

/// A callback the theater installs to poll woken portals.
///
/// Returns true if it produced new work for the platform's queues.
pub type PortalPump = Box<dyn Fn() -> bool>;

/// The host kernel contract.
///
/// Implementations must deliver posted thunks on the same thread, fast
/// (microtask) thunks before previously posted normal (macrotask) thunks,
/// and each queue in FIFO order. A host integration should invoke the
/// installed portal pump whenever the dock reports woken portals.
pub trait Platform {
    /// Posts a thunk on the microtask queue.
    fn post_fast(&self, thunk: Thunk);

    /// Posts a thunk on the macrotask queue.
    fn post_normal(&self, thunk: Thunk);

    /// Arms a one-shot timer. The thunk runs once the delay elapses unless
    /// the timer is disarmed first.
    fn arm_timer(&self, delay: Duration, thunk: Thunk) -> TimerKey;

    /// Disarms a previously armed timer. Disarming a fired or unknown timer
    /// is a no-op.
    fn disarm_timer(&self, key: TimerKey);

    /// Returns the current monotonic time.
    fn now(&self) -> Time;

    /// Returns the shared portal dock.
    fn dock(&self) -> Arc<PortalDock>;

    /// Installs the theater's portal pump.
    fn set_portal_pump(&self, pump: PortalPump);
}

/// Where foreign-promise wakers report readiness.
#[derive(Debug, Default)]
pub struct PortalDock {
    woken: Mutex<Vec<PortalKey>>,
}

impl PortalDock {
    /// Creates an empty dock.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records a woken portal.
    pub fn notify(&self, key: PortalKey) {
        self.woken.lock().push(key);
    }

    /// Takes every woken portal key recorded so far.
    #[must_use]
    pub fn drain(&self) -> Vec<PortalKey> {
        std::mem::take(&mut *self.woken.lock())
    }

    /// Returns true if no portal has been woken.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.woken.lock().is_empty()
    }

    /// Builds a waker that notifies this dock for the given portal.
    #[must_use]
    pub fn waker(self: &Arc<Self>, key: PortalKey) -> Waker {
        Waker::from(Arc::new(PortalWaker {
            key,
            dock: Arc::clone(self),
        }))
    }
}

struct PortalWaker {
    key: PortalKey,
    dock: Arc<PortalDock>,
}

impl Wake for PortalWaker {
    fn wake(self: Arc<Self>) {
        self.dock.notify(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dock_drains_in_notification_order() {
        let dock = PortalDock::new();
        dock.notify(PortalKey(2));
        dock.notify(PortalKey(5));
        assert_eq!(dock.drain(), vec![PortalKey(2), PortalKey(5)]);
        assert!(dock.is_idle());
    }

    #[test]
    fn waker_notifies_dock() {
        let dock = PortalDock::new();
        let waker = dock.waker(PortalKey(9));
        waker.wake();
        assert_eq!(dock.drain(), vec![PortalKey(9)]);
    }
}
