//! Destinies: one-shot completion publishing.
//!
//! A destiny is the completion side of any object that finishes at most
//! once: a gig's fate, an agent's death. It exposes a teleprompter over the
//! completion; each [`Destiny::autocue`] produces a fresh cue. If the fate
//! is already sealed the cue reveals as soon as it is blocked; otherwise it
//! joins the pending waiter table and is removed again on cancellation.
//!
//! Sealing reveals every pending waiter in insertion order.

use crate::cue::{Cue, Teleprompter};
use crate::types::Signal;
use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

struct DestinyCore<T: 'static> {
    fate: Option<Signal<T>>,
    waiters: Vec<Cue<T>>,
}

/// A one-shot completion with a pending waiter table.
pub struct Destiny<T: 'static> {
    core: Rc<RefCell<DestinyCore<T>>>,
}

impl<T> Clone for Destiny<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone> Default for Destiny<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Destiny<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        write!(
            f,
            "Destiny(sealed: {}, waiters: {})",
            core.fate.is_some(),
            core.waiters.len()
        )
    }
}

impl<T: Clone> Destiny<T> {
    /// Creates an unsealed destiny.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Rc::new(RefCell::new(DestinyCore {
                fate: None,
                waiters: Vec::new(),
            })),
        }
    }

    /// Returns true once the fate has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.core.borrow().fate.is_some()
    }

    /// Returns a copy of the sealed fate, if any.
    #[must_use]
    pub fn fate(&self) -> Option<Signal<T>> {
        self.core.borrow().fate.clone()
    }

    /// Seals the fate and reveals every pending waiter in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the destiny is already sealed.
    pub fn seal(&self, signal: Signal<T>) {
        let waiters = {
            let mut core = self.core.borrow_mut();
            assert!(core.fate.is_none(), "destiny sealed twice");
            core.fate = Some(signal.clone());
            std::mem::take(&mut core.waiters)
        };
        for waiter in waiters {
            // A waiter revealed earlier in the drain may have rolled back a
            // later waiter's commitment; skip anything no longer pending.
            waiter.try_reveal(signal.clone());
        }
    }

    /// Produces a fresh cue over the completion.
    ///
    /// If the fate is sealed, the cue reveals synchronously when blocked.
    #[must_use]
    pub fn autocue(&self) -> Cue<T> {
        let join = Rc::clone(&self.core);
        let leave = Rc::clone(&self.core);
        Cue::with_end(
            move |cue: &Cue<T>| {
                let sealed = {
                    let mut core = join.borrow_mut();
                    match &core.fate {
                        Some(fate) => Some(fate.clone()),
                        None => {
                            core.waiters.push(cue.clone());
                            None
                        }
                    }
                };
                if let Some(fate) = sealed {
                    cue.reveal(fate);
                }
            },
            move |revealing, cue| {
                if !revealing {
                    let mut core = leave.borrow_mut();
                    core.waiters.retain(|waiter| !waiter.ptr_eq(cue));
                }
            },
        )
    }

    /// The teleprompter view: a restartable source of completion cues.
    #[must_use]
    pub fn teleprompter(&self) -> Teleprompter<T> {
        let destiny = self.clone();
        Teleprompter::from_factory(move || destiny.autocue())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::{commit, Hint};
    use std::cell::Cell;

    #[test]
    fn waiters_revealed_in_insertion_order() {
        let destiny: Destiny<i32> = Destiny::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Rc::clone(&order);
            let rollback = commit(Hint::from(destiny.autocue()), move |signal| {
                if let Signal::Prompt(v) = signal {
                    seen.borrow_mut().push((tag, v));
                }
            });
            assert!(rollback.is_some());
        }

        destiny.seal(Signal::Prompt(9));
        assert_eq!(&*order.borrow(), &[("first", 9), ("second", 9)]);
    }

    #[test]
    fn sealed_destiny_reveals_synchronously() {
        let destiny: Destiny<i32> = Destiny::new();
        destiny.seal(Signal::Prompt(4));

        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let rollback = commit(Hint::from(destiny.autocue()), move |_| flag.set(true));
        assert!(rollback.is_none());
        assert!(fired.get());
    }

    #[test]
    fn cancelled_waiter_leaves_table() {
        let destiny: Destiny<i32> = Destiny::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);

        let rollback = commit(Hint::from(destiny.autocue()), move |_| flag.set(true))
            .expect("waiter should be pending");
        rollback.cancel();
        destiny.seal(Signal::Prompt(1));
        assert!(!fired.get());
    }

    #[test]
    fn teleprompter_restarts_waiting() {
        let destiny: Destiny<i32> = Destiny::new();
        let prompter = destiny.teleprompter();
        let hits = Rc::new(Cell::new(0));

        for _ in 0..2 {
            let count = Rc::clone(&hits);
            commit(Hint::from(prompter.autocue()), move |_| {
                count.set(count.get() + 1);
            });
        }
        destiny.seal(Signal::Prompt(0));
        assert_eq!(hits.get(), 2);
    }

    #[test]
    #[should_panic(expected = "destiny sealed twice")]
    fn double_seal_is_fatal() {
        let destiny: Destiny<i32> = Destiny::new();
        destiny.seal(Signal::Prompt(1));
        destiny.seal(Signal::Prompt(2));
    }
}
