//! The commit protocol and the adapt/capture decorators.
//!
//! A commit event terminates a cue tree: when a signal reaches it, the
//! external effect fires. Staging is lazy and supports a signal resolving
//! the whole tree synchronously, in which case the effect fires inline and
//! no rollback is returned.

use super::core::{Audience, Retire, Rollback};
use super::hint::{Blueprint, Hint};
use crate::types::Signal;
use std::cell::RefCell;
use std::rc::Rc;

/// Commits to a hint: stages its cue tree and fires `effect` on revelation.
///
/// Returns `None` when the tree resolved during staging (the effect has
/// already fired); otherwise returns the [`Rollback`] that cancels the whole
/// commitment top-down.
pub fn commit<T>(hint: Hint<T>, effect: impl FnOnce(Signal<T>) + 'static) -> Option<Rollback> {
    let node = Rc::new(CommitNode {
        inner: RefCell::new(CommitInner {
            effect: Some(Box::new(effect)),
            child: None,
            used: false,
        }),
    });
    let child = hint.stage(Rc::clone(&node) as Rc<dyn Audience<T>>, 0);
    let mut inner = node.inner.borrow_mut();
    if inner.used {
        return None;
    }
    inner.child = Some(child);
    drop(inner);
    Some(Rollback::new(node))
}

struct CommitNode<T: 'static> {
    inner: RefCell<CommitInner<T>>,
}

struct CommitInner<T> {
    effect: Option<Box<dyn FnOnce(Signal<T>)>>,
    child: Option<Rc<dyn Retire>>,
    used: bool,
}

impl<T> Audience<T> for CommitNode<T> {
    fn propagate(&self, _slot: usize, signal: Signal<T>) {
        let effect = {
            let mut inner = self.inner.borrow_mut();
            assert!(!inner.used, "commit received a second signal");
            inner.used = true;
            inner.child = None;
            inner.effect.take()
        };
        if let Some(effect) = effect {
            effect(signal);
        }
    }
}

impl<T> Retire for CommitNode<T> {
    fn unblock(&self) {
        let child = {
            let mut inner = self.inner.borrow_mut();
            if inner.used {
                return;
            }
            inner.used = true;
            inner.effect = None;
            inner.child.take()
        };
        if let Some(child) = child {
            child.unblock();
        }
    }
}

/// Decorator blueprint: applies a synchronous adapter to the child's
/// signal, possibly changing its type. The same-type case is the capture
/// trap.
pub(crate) struct AdaptBlueprint<T: 'static, U: 'static> {
    child: Hint<T>,
    adapter: Box<dyn FnOnce(Signal<T>) -> Signal<U>>,
}

impl<T, U> AdaptBlueprint<T, U> {
    pub(crate) fn new(
        child: Hint<T>,
        adapter: Box<dyn FnOnce(Signal<T>) -> Signal<U>>,
    ) -> Self {
        Self { child, adapter }
    }
}

impl<T, U> Blueprint<U> for AdaptBlueprint<T, U> {
    fn stage(self: Box<Self>, audience: Rc<dyn Audience<U>>, slot: usize) -> Rc<dyn Retire> {
        let node = Rc::new(AdaptNode {
            inner: RefCell::new(AdaptInner {
                adapter: Some(self.adapter),
                audience: Some((audience, slot)),
                child: None,
                used: false,
            }),
        });
        let child = self.child.stage(Rc::clone(&node) as Rc<dyn Audience<T>>, 0);
        let mut inner = node.inner.borrow_mut();
        if !inner.used {
            inner.child = Some(child);
        }
        drop(inner);
        node
    }
}

struct AdaptNode<T: 'static, U: 'static> {
    inner: RefCell<AdaptInner<T, U>>,
}

struct AdaptInner<T, U> {
    adapter: Option<Box<dyn FnOnce(Signal<T>) -> Signal<U>>>,
    audience: Option<(Rc<dyn Audience<U>>, usize)>,
    child: Option<Rc<dyn Retire>>,
    used: bool,
}

impl<T, U> Audience<T> for AdaptNode<T, U> {
    fn propagate(&self, _slot: usize, signal: Signal<T>) {
        let (adapter, audience) = {
            let mut inner = self.inner.borrow_mut();
            assert!(!inner.used, "capture received a second signal");
            inner.used = true;
            inner.child = None;
            (inner.adapter.take(), inner.audience.take())
        };
        let adapter = adapter.expect("capture adapter missing");
        let adapted = adapter(signal);
        if let Some((audience, slot)) = audience {
            audience.propagate(slot, adapted);
        }
    }
}

impl<T, U> Retire for AdaptNode<T, U> {
    fn unblock(&self) {
        let child = {
            let mut inner = self.inner.borrow_mut();
            if inner.used {
                return;
            }
            inner.used = true;
            inner.adapter = None;
            inner.audience = None;
            inner.child.take()
        };
        if let Some(child) = child {
            child.unblock();
        }
    }
}
