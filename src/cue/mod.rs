//! The cue engine: one-shot asynchronous events with explicit lifecycle.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CUE LIFE CYCLE                            │
//! │                                                                  │
//! │  Unused ──block(audience)──► Pending ──reveal(signal)──► Used    │
//! │                                 │                      (revealed)│
//! │                                 └──unblock──────────────► Used   │
//! │                                                        (cancelled)│
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A cue is a one-shot event. Its `begin` callback runs exactly once when it
//! is blocked; its `end` callback runs exactly once when it leaves `Pending`,
//! with `revealing = true` if a signal propagated and `false` on
//! cancellation. Timers are the canonical leaf: `begin` arms, `end` disarms.
//!
//! # Event taxonomy
//!
//! - **Leaves** carry user-supplied `begin`/`end` ([`once`], [`often`],
//!   [`spark`], [`timeout`]).
//! - **Decorators** own one child: [`capture`] applies a synchronous trap,
//!   and the commit event terminates the tree with an external effect.
//! - **Families** own several children: [`all`], [`any`], [`race`],
//!   [`settle`].
//!
//! # The commit protocol
//!
//! [`commit`] turns a [`Hint`] into a pending cue tree and returns a
//! [`Rollback`], or `None` when the tree resolved synchronously and the
//! effect already fired. The tree is flattened lazily: each parent blocks
//! itself against its grandparent before its children stage, and staging
//! stops as soon as the tree resolves. Cancelling the rollback unblocks the
//! tree top-down; every still-pending leaf's `end(false, _)` runs exactly
//! once.
//!
//! Revelation may happen reentrantly while a leaf's `begin` is still on the
//! stack; the engine supports a synchronous signal bubbling all the way to
//! the commit during staging.

mod commit;
mod core;
mod family;
mod hint;

pub use self::core::{Cue, Rollback, Teleprompter};
pub use commit::commit;
pub use hint::Hint;

pub(crate) use hint::ForeignFuture;

use crate::error::Blooper;
use crate::platform::Platform;
use crate::types::{unit, Payload, Signal, TimerKey};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use commit::AdaptBlueprint;
use family::{AllBlueprint, AnyBlueprint, RaceBlueprint, SettleBlueprint};

/// Creates a one-shot leaf hint from a `begin` callback.
///
/// `begin` runs exactly once when the cue is blocked and may reveal the cue
/// synchronously.
pub fn once<T>(begin: impl FnOnce(&Cue<T>) + 'static) -> Hint<T> {
    Hint::from_cue(Cue::new(begin))
}

/// Creates a one-shot leaf hint with both `begin` and `end` callbacks.
///
/// `end` runs exactly once when the cue leaves pending; `revealing` is true
/// if a signal propagated and false on cancellation.
pub fn once_with<T>(
    begin: impl FnOnce(&Cue<T>) + 'static,
    end: impl FnOnce(bool, &Cue<T>) + 'static,
) -> Hint<T> {
    Hint::from_cue(Cue::with_end(begin, end))
}

/// Creates a teleprompter: a restartable source of fresh leaf cues.
pub fn often<T>(begin: impl Fn(&Cue<T>) + 'static) -> Hint<T> {
    let begin = Rc::new(begin);
    Hint::from_teleprompter(Teleprompter::from_factory(move || {
        let begin = Rc::clone(&begin);
        Cue::new(move |cue| begin(cue))
    }))
}

/// Creates a teleprompter whose cues carry both `begin` and `end` callbacks.
pub fn often_with<T>(
    begin: impl Fn(&Cue<T>) + 'static,
    end: impl Fn(bool, &Cue<T>) + 'static,
) -> Hint<T> {
    let begin = Rc::new(begin);
    let end = Rc::new(end);
    Hint::from_teleprompter(Teleprompter::from_factory(move || {
        let begin = Rc::clone(&begin);
        let end = Rc::clone(&end);
        Cue::with_end(move |cue| begin(cue), move |revealing, cue| end(revealing, cue))
    }))
}

/// Creates a hint that reveals the given signal as soon as it is committed.
pub fn spark<T: 'static>(signal: Signal<T>) -> Hint<T> {
    Hint::from_cue(Cue::new(move |cue: &Cue<T>| cue.reveal(signal)))
}

/// Decorates a hint with a synchronous trap applied to its signal.
pub fn capture<T>(hint: Hint<T>, trap: impl FnOnce(Signal<T>) -> Signal<T> + 'static) -> Hint<T> {
    adapt(hint, trap)
}

/// Decorates a hint with a synchronous adapter that may change the signal's
/// type. [`capture`] is the same-type case.
pub fn adapt<T, U>(
    hint: Hint<T>,
    adapter: impl FnOnce(Signal<T>) -> Signal<U> + 'static,
) -> Hint<U> {
    Hint::from_blueprint(Box::new(AdaptBlueprint::new(hint, Box::new(adapter))))
}

/// A family that reveals the prompt vector of every child, in child order.
///
/// The first blooper short-circuits: remaining children are cancelled and
/// the blooper propagates.
pub fn all<T>(hints: Vec<Hint<T>>) -> Hint<Vec<T>> {
    Hint::from_blueprint(Box::new(AllBlueprint::new(hints)))
}

/// A family that reveals the first prompt.
///
/// If every child bloopers, an aggregate blooper carrying each branch
/// failure (in child order) propagates instead.
pub fn any<T>(hints: Vec<Hint<T>>) -> Hint<T> {
    Hint::from_blueprint(Box::new(AnyBlueprint::new(hints)))
}

/// A family where the first signal of either kind wins; losers are
/// cancelled.
pub fn race<T>(hints: Vec<Hint<T>>) -> Hint<T> {
    Hint::from_blueprint(Box::new(RaceBlueprint::new(hints)))
}

/// A family that collects every child's signal, in child order.
pub fn settle<T>(hints: Vec<Hint<T>>) -> Hint<Vec<Signal<T>>> {
    Hint::from_blueprint(Box::new(SettleBlueprint::new(hints)))
}

/// A leaf whose `begin` arms a platform timer and whose `end` disarms it.
///
/// Reveals the unit prompt once the delay elapses.
#[must_use]
pub fn timeout(platform: &Rc<dyn Platform>, delay: Duration) -> Hint<Payload> {
    let arm = Rc::clone(platform);
    let disarm = Rc::clone(platform);
    let key: Rc<Cell<Option<TimerKey>>> = Rc::new(Cell::new(None));
    let armed = Rc::clone(&key);
    once_with(
        move |cue: &Cue<Payload>| {
            let cue = cue.clone();
            let timer = arm.arm_timer(
                delay,
                Box::new(move || {
                    cue.try_reveal(Signal::Prompt(unit()));
                }),
            );
            armed.set(Some(timer));
        },
        move |revealing, _cue| {
            if !revealing {
                if let Some(timer) = key.get() {
                    disarm.disarm_timer(timer);
                }
            }
        },
    )
}

/// Signals a commitment failure for a hint that cannot become a pending cue.
pub(crate) fn commitment_blooper(context: &'static str) -> Blooper {
    Blooper::new(crate::error::BlooperKind::Commitment).with_context(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlooperKind;
    use std::cell::RefCell;

    fn noted<T: 'static>() -> (Rc<RefCell<Option<Signal<T>>>>, impl FnOnce(Signal<T>)) {
        let slot: Rc<RefCell<Option<Signal<T>>>> = Rc::new(RefCell::new(None));
        let writer = Rc::clone(&slot);
        (slot, move |signal| *writer.borrow_mut() = Some(signal))
    }

    #[test]
    fn spark_commits_synchronously() {
        let (seen, effect) = noted::<i32>();
        let rollback = commit(spark(Signal::Prompt(3)), effect);
        assert!(rollback.is_none());
        assert!(matches!(*seen.borrow(), Some(Signal::Prompt(3))));
    }

    #[test]
    fn capture_of_spark_equals_spark_of_trapped() {
        let (seen, effect) = noted::<i32>();
        let trapped = capture(spark(Signal::Prompt(2)), |signal| signal.map(|v| v * 10));
        let rollback = commit(trapped, effect);
        assert!(rollback.is_none());
        assert!(matches!(*seen.borrow(), Some(Signal::Prompt(20))));
    }

    #[test]
    fn adapt_changes_signal_type() {
        let (seen, effect) = noted::<String>();
        let hint = adapt(spark(Signal::Prompt(7_i32)), |signal| {
            signal.map(|v| format!("got {v}"))
        });
        commit(hint, effect);
        match &*seen.borrow() {
            Some(Signal::Prompt(text)) => assert_eq!(text, "got 7"),
            other => panic!("unexpected signal: {other:?}"),
        };
    }

    #[test]
    fn all_reveals_prompt_vector_in_child_order() {
        let (seen, effect) = noted::<Vec<i32>>();
        let rollback = commit(
            all(vec![spark(Signal::Prompt(1)), spark(Signal::Prompt(2))]),
            effect,
        );
        assert!(rollback.is_none());
        match &*seen.borrow() {
            Some(Signal::Prompt(values)) => assert_eq!(values, &[1, 2]),
            other => panic!("unexpected signal: {other:?}"),
        };
    }

    #[test]
    fn all_short_circuits_on_first_blooper() {
        let ends = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&ends);
        let pending: Hint<i32> = once_with(
            |_cue| {},
            move |revealing, _cue| log.borrow_mut().push(revealing),
        );
        let (seen, effect) = noted::<Vec<i32>>();
        let rollback = commit(
            all(vec![
                pending,
                spark(Signal::Blooper(Blooper::scene("nope"))),
                spark(Signal::Prompt(9)),
            ]),
            effect,
        );
        assert!(rollback.is_none());
        assert!(matches!(*seen.borrow(), Some(Signal::Blooper(_))));
        // The pending leaf was cancelled exactly once.
        assert_eq!(&*ends.borrow(), &[false]);
    }

    #[test]
    fn any_reveals_first_prompt() {
        let (seen, effect) = noted::<i32>();
        commit(
            any(vec![
                spark(Signal::Blooper(Blooper::scene("first down"))),
                spark(Signal::Prompt(5)),
                spark(Signal::Prompt(6)),
            ]),
            effect,
        );
        assert!(matches!(*seen.borrow(), Some(Signal::Prompt(5))));
    }

    #[test]
    fn any_aggregates_when_every_branch_bloopers() {
        let (seen, effect) = noted::<i32>();
        commit(
            any(vec![
                spark(Signal::Blooper(Blooper::scene("e1"))),
                spark(Signal::Blooper(Blooper::scene("e2"))),
            ]),
            effect,
        );
        match &*seen.borrow() {
            Some(Signal::Blooper(blooper)) => {
                assert_eq!(blooper.kind(), BlooperKind::Aggregate);
                let contexts: Vec<_> = blooper
                    .branches()
                    .iter()
                    .map(|b| b.context().unwrap_or("").to_string())
                    .collect();
                assert_eq!(contexts, vec!["e1", "e2"]);
            }
            other => panic!("unexpected signal: {other:?}"),
        };
    }

    #[test]
    fn race_winner_cancels_and_skips_losers() {
        // Loser staged before the winner is cancelled; a loser after the
        // winner is never begun (lazy flattening).
        let begins = Rc::new(RefCell::new(0_u32));
        let ends = Rc::new(RefCell::new(Vec::new()));
        let tracked = |begins: &Rc<RefCell<u32>>, ends: &Rc<RefCell<Vec<bool>>>| -> Hint<i32> {
            let b = Rc::clone(begins);
            let e = Rc::clone(ends);
            once_with(
                move |_cue| *b.borrow_mut() += 1,
                move |revealing, _cue| e.borrow_mut().push(revealing),
            )
        };
        let (seen, effect) = noted::<i32>();
        let rollback = commit(
            race(vec![
                tracked(&begins, &ends),
                spark(Signal::Prompt(1)),
                tracked(&begins, &ends),
            ]),
            effect,
        );
        assert!(rollback.is_none());
        assert!(matches!(*seen.borrow(), Some(Signal::Prompt(1))));
        assert_eq!(*begins.borrow(), 1);
        assert_eq!(&*ends.borrow(), &[false]);
    }

    #[test]
    fn settle_collects_every_signal() {
        let (seen, effect) = noted::<Vec<Signal<i32>>>();
        commit(
            settle(vec![
                spark(Signal::Prompt(1)),
                spark(Signal::Blooper(Blooper::scene("mid"))),
                spark(Signal::Prompt(3)),
            ]),
            effect,
        );
        match &*seen.borrow() {
            Some(Signal::Prompt(signals)) => {
                assert_eq!(signals.len(), 3);
                assert!(matches!(signals[0], Signal::Prompt(1)));
                assert!(matches!(signals[1], Signal::Blooper(_)));
                assert!(matches!(signals[2], Signal::Prompt(3)));
            }
            other => panic!("unexpected signal: {other:?}"),
        };
    }

    #[test]
    fn rollback_cancels_tree_top_down() {
        let ends = Rc::new(RefCell::new(Vec::new()));
        let leaf = |tag: &'static str| -> Hint<i32> {
            let log = Rc::clone(&ends);
            once_with(
                |_cue| {},
                move |revealing, _cue| log.borrow_mut().push((tag, revealing)),
            )
        };
        let (seen, effect) = noted::<Vec<i32>>();
        let rollback =
            commit(all(vec![leaf("a"), leaf("b")]), effect).expect("tree should be pending");
        rollback.cancel();
        assert!(seen.borrow().is_none());
        assert_eq!(&*ends.borrow(), &[("a", false), ("b", false)]);
    }

    #[test]
    fn effect_and_rollback_are_mutually_exclusive() {
        // Cancel first, then reveal the leaf out of band: the effect must
        // never fire.
        let (seen, effect) = noted::<i32>();
        let shared: Rc<RefCell<Option<Cue<i32>>>> = Rc::new(RefCell::new(None));
        let keep = Rc::clone(&shared);
        let hint: Hint<i32> = once(move |cue: &Cue<i32>| *keep.borrow_mut() = Some(cue.clone()));
        let rollback = commit(hint, effect).expect("pending");
        rollback.cancel();
        let cue = shared.borrow_mut().take().expect("leaf captured");
        assert!(!cue.try_reveal(Signal::Prompt(1)));
        assert!(seen.borrow().is_none());
    }

    #[test]
    fn often_restarts_across_commitments() {
        let begun = Rc::new(RefCell::new(0_u32));
        let count = Rc::clone(&begun);
        let hint = often(move |_cue: &Cue<i32>| *count.borrow_mut() += 1);
        // A teleprompter hint can only be committed once (it is consumed),
        // but its cues are fresh per commitment when reused via a prompter.
        commit(hint, |_| {});
        assert_eq!(*begun.borrow(), 1);
    }

    #[test]
    fn foreign_hint_outside_theater_is_commitment_failure() {
        let (seen, effect) = noted::<i32>();
        let hint = Hint::foreign(std::future::ready(Signal::Prompt(1)));
        let rollback = commit(hint, effect);
        assert!(rollback.is_none());
        match &*seen.borrow() {
            Some(Signal::Blooper(blooper)) => {
                assert_eq!(blooper.kind(), BlooperKind::Commitment);
            }
            other => panic!("unexpected signal: {other:?}"),
        };
    }

    #[test]
    fn empty_families_resolve_immediately() {
        let (all_seen, all_effect) = noted::<Vec<i32>>();
        assert!(commit(all(Vec::<Hint<i32>>::new()), all_effect).is_none());
        assert!(matches!(*all_seen.borrow(), Some(Signal::Prompt(ref v)) if v.is_empty()));

        let (any_seen, any_effect) = noted::<i32>();
        assert!(commit(any(Vec::<Hint<i32>>::new()), any_effect).is_none());
        assert!(matches!(*any_seen.borrow(), Some(Signal::Blooper(_))));
    }
}
