//! The cue state machine, teleprompters, and rollback handles.

use crate::types::Signal;
use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

/// An event node listening for one child's signal.
///
/// Parents implement this; a child propagates its signal to the parent
/// exactly once, tagged with the slot the child occupies.
pub(crate) trait Audience<T> {
    /// Delivers a child's signal. `slot` is the child's insertion index.
    fn propagate(&self, slot: usize, signal: Signal<T>);
}

/// A node that can be cancelled top-down.
///
/// Unblocking is idempotent on used nodes: a family cancels every child it
/// staged, including the one whose revelation resolved it.
pub(crate) trait Retire {
    /// Cancels this node and every still-pending descendant.
    fn unblock(&self);
}

enum CueState<T: 'static> {
    Unused {
        begin: Box<dyn FnOnce(&Cue<T>)>,
        end: Option<Box<dyn FnOnce(bool, &Cue<T>)>>,
    },
    Pending {
        end: Option<Box<dyn FnOnce(bool, &Cue<T>)>>,
        audience: Option<(Rc<dyn Audience<T>>, usize)>,
    },
    Used {
        revealed: bool,
    },
    /// Transient marker while a transition is running its callbacks.
    Shifting,
}

impl<T> CueState<T> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Unused { .. } => "unused",
            Self::Pending { .. } => "pending",
            Self::Used { revealed: true } => "revealed",
            Self::Used { revealed: false } => "cancelled",
            Self::Shifting => "shifting",
        }
    }
}

/// A one-shot asynchronous event.
///
/// Cheap to clone; clones share the same state. A cue is in at most one
/// state, revelation happens at most once, cancellation happens at most
/// once, and their union is "used".
pub struct Cue<T: 'static> {
    state: Rc<RefCell<CueState<T>>>,
}

impl<T> Clone for Cue<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Cue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cue({})", self.state.borrow().name())
    }
}

impl<T> Cue<T> {
    /// Creates an unused cue with a `begin` callback.
    pub fn new(begin: impl FnOnce(&Cue<T>) + 'static) -> Self {
        Self {
            state: Rc::new(RefCell::new(CueState::Unused {
                begin: Box::new(begin),
                end: None,
            })),
        }
    }

    /// Creates an unused cue with `begin` and `end` callbacks.
    pub fn with_end(
        begin: impl FnOnce(&Cue<T>) + 'static,
        end: impl FnOnce(bool, &Cue<T>) + 'static,
    ) -> Self {
        Self {
            state: Rc::new(RefCell::new(CueState::Unused {
                begin: Box::new(begin),
                end: Some(Box::new(end)),
            })),
        }
    }

    /// Returns true if the cue is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.borrow(), CueState::Pending { .. })
    }

    /// Returns true if the cue has been revealed or cancelled.
    #[must_use]
    pub fn is_used(&self) -> bool {
        matches!(&*self.state.borrow(), CueState::Used { .. })
    }

    /// Returns true if `other` is the same cue.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Blocks the cue against an audience, running its `begin` callback.
    ///
    /// `begin` may reveal the cue synchronously; the signal then propagates
    /// to the audience before `block` returns.
    ///
    /// # Panics
    ///
    /// Panics if the cue is not unused.
    pub(crate) fn block(&self, audience: Rc<dyn Audience<T>>, slot: usize) {
        let begin = {
            let mut state = self.state.borrow_mut();
            match std::mem::replace(&mut *state, CueState::Shifting) {
                CueState::Unused { begin, end } => {
                    *state = CueState::Pending {
                        end,
                        audience: Some((audience, slot)),
                    };
                    begin
                }
                other => {
                    let name = other.name();
                    *state = other;
                    panic!("blocking a {name} cue");
                }
            }
        };
        begin(self);
    }

    /// Reveals the cue with a signal.
    ///
    /// Runs `end(true, _)`, then propagates the signal to the audience.
    ///
    /// # Panics
    ///
    /// Panics if the cue is not pending.
    pub fn reveal(&self, signal: Signal<T>) {
        assert!(
            self.finish(true, Some(signal)),
            "revealing a non-pending cue"
        );
    }

    /// Reveals the cue if it is still pending; returns whether it did.
    ///
    /// For revealers that may race cancellation, such as timer thunks and
    /// destiny seals.
    pub fn try_reveal(&self, signal: Signal<T>) -> bool {
        self.finish(true, Some(signal))
    }

    fn finish(&self, revealed: bool, signal: Option<Signal<T>>) -> bool {
        let (end, audience) = {
            let mut state = self.state.borrow_mut();
            match std::mem::replace(&mut *state, CueState::Shifting) {
                CueState::Pending { end, audience } => {
                    *state = CueState::Used { revealed };
                    (end, audience)
                }
                other => {
                    *state = other;
                    return false;
                }
            }
        };
        if let Some(end) = end {
            end(revealed, self);
        }
        if let Some(signal) = signal {
            if let Some((audience, slot)) = audience {
                audience.propagate(slot, signal);
            }
        }
        true
    }
}

impl<T> Retire for Cue<T> {
    fn unblock(&self) {
        // Idempotent on used cues; the end callback sees revealing = false.
        self.finish(false, None);
    }
}

/// A restartable source of fresh unused cues for one completion.
pub struct Teleprompter<T: 'static> {
    factory: Rc<dyn Fn() -> Cue<T>>,
}

impl<T> Clone for Teleprompter<T> {
    fn clone(&self) -> Self {
        Self {
            factory: Rc::clone(&self.factory),
        }
    }
}

impl<T> fmt::Debug for Teleprompter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Teleprompter(..)")
    }
}

impl<T> Teleprompter<T> {
    /// Creates a teleprompter from a cue factory.
    pub fn from_factory(factory: impl Fn() -> Cue<T> + 'static) -> Self {
        Self {
            factory: Rc::new(factory),
        }
    }

    /// Produces a fresh unused cue.
    #[must_use]
    pub fn autocue(&self) -> Cue<T> {
        (self.factory)()
    }
}

/// The handle to cancel a pending commitment.
///
/// Returned by [`crate::cue::commit`] when the tree is still pending.
/// Cancelling unblocks the commit and every still-pending descendant,
/// running each leaf's `end(false, _)` exactly once. At most one of
/// {effect fired, rollback cancelled} ever has observable effect.
pub struct Rollback {
    retire: Rc<dyn Retire>,
}

impl Rollback {
    pub(crate) fn new(retire: Rc<dyn Retire>) -> Self {
        Self { retire }
    }

    /// Cancels the commitment, top-down.
    pub fn cancel(self) {
        self.retire.unblock();
    }
}

impl fmt::Debug for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rollback(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Sink<T: 'static> {
        received: RefCell<Vec<(usize, Signal<T>)>>,
    }

    impl<T> Sink<T> {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                received: RefCell::new(Vec::new()),
            })
        }
    }

    impl<T> Audience<T> for Sink<T> {
        fn propagate(&self, slot: usize, signal: Signal<T>) {
            self.received.borrow_mut().push((slot, signal));
        }
    }

    #[test]
    fn begin_runs_on_block() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let cue: Cue<i32> = Cue::new(move |_| flag.set(true));
        cue.block(Sink::new(), 0);
        assert!(ran.get());
        assert!(cue.is_pending());
    }

    #[test]
    fn reveal_propagates_once() {
        let sink = Sink::new();
        let cue: Cue<i32> = Cue::new(|_| {});
        cue.block(Rc::clone(&sink) as Rc<dyn Audience<i32>>, 3);
        cue.reveal(Signal::Prompt(7));
        let received = sink.received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, 3);
        assert!(matches!(received[0].1, Signal::Prompt(7)));
    }

    #[test]
    fn synchronous_reveal_during_begin() {
        let sink = Sink::new();
        let cue: Cue<i32> = Cue::new(|cue| cue.reveal(Signal::Prompt(1)));
        cue.block(Rc::clone(&sink) as Rc<dyn Audience<i32>>, 0);
        assert!(cue.is_used());
        assert_eq!(sink.received.borrow().len(), 1);
    }

    #[test]
    fn end_sees_cancellation() {
        let revealing = Rc::new(Cell::new(None));
        let seen = Rc::clone(&revealing);
        let cue: Cue<i32> = Cue::with_end(|_| {}, move |r, _| seen.set(Some(r)));
        cue.block(Sink::new(), 0);
        cue.unblock();
        assert_eq!(revealing.get(), Some(false));
        assert!(cue.is_used());
    }

    #[test]
    fn unblock_after_reveal_is_noop() {
        let ends = Rc::new(Cell::new(0));
        let count = Rc::clone(&ends);
        let cue: Cue<i32> = Cue::with_end(|_| {}, move |_, _| count.set(count.get() + 1));
        cue.block(Sink::new(), 0);
        cue.reveal(Signal::Prompt(1));
        cue.unblock();
        assert_eq!(ends.get(), 1);
    }

    #[test]
    #[should_panic(expected = "blocking a pending cue")]
    fn double_block_is_fatal() {
        let cue: Cue<i32> = Cue::new(|_| {});
        cue.block(Sink::new(), 0);
        cue.block(Sink::new(), 0);
    }

    #[test]
    #[should_panic(expected = "revealing a non-pending cue")]
    fn double_reveal_is_fatal() {
        let cue: Cue<i32> = Cue::new(|_| {});
        cue.block(Sink::new(), 0);
        cue.reveal(Signal::Prompt(1));
        cue.reveal(Signal::Prompt(2));
    }

    #[test]
    fn try_reveal_tolerates_used() {
        let cue: Cue<i32> = Cue::new(|_| {});
        cue.block(Sink::new(), 0);
        cue.unblock();
        assert!(!cue.try_reveal(Signal::Prompt(1)));
    }

    #[test]
    fn teleprompter_produces_fresh_cues() {
        let prompter = Teleprompter::from_factory(|| Cue::<i32>::new(|_| {}));
        let a = prompter.autocue();
        let b = prompter.autocue();
        assert!(!a.ptr_eq(&b));
    }
}
