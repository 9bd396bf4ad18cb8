//! Cue families: events owning several children.
//!
//! Families record child signals in insertion order and emit result arrays
//! in that order. Resolution cancels whichever children are still pending;
//! children not yet staged when the family resolves are never begun (lazy
//! flattening).
//!
//! A family receives at most one propagation per child; a second is a fatal
//! engine error.

use super::core::{Audience, Retire};
use super::hint::{Blueprint, Hint};
use crate::error::Blooper;
use crate::types::Signal;
use std::cell::RefCell;
use std::rc::Rc;

/// Stages `children` against `node`, stopping early once the node resolves.
fn stage_children<U, N>(children: Vec<Hint<U>>, node: &Rc<N>)
where
    N: Audience<U> + FamilyNode + 'static,
{
    for (slot, child) in children.into_iter().enumerate() {
        if node.is_used() {
            break;
        }
        let handle = child.stage(Rc::clone(node) as Rc<dyn Audience<U>>, slot);
        node.set_child(slot, handle);
    }
}

/// Internal plumbing shared by the four family node types.
trait FamilyNode {
    fn is_used(&self) -> bool;
    fn set_child(&self, slot: usize, handle: Rc<dyn Retire>);
}

// ============================================================================
// All
// ============================================================================

/// Prompt vector in child order; the first blooper short-circuits.
pub(crate) struct AllBlueprint<T: 'static> {
    children: Vec<Hint<T>>,
}

impl<T> AllBlueprint<T> {
    pub(crate) fn new(children: Vec<Hint<T>>) -> Self {
        Self { children }
    }
}

impl<T> Blueprint<Vec<T>> for AllBlueprint<T> {
    fn stage(self: Box<Self>, audience: Rc<dyn Audience<Vec<T>>>, slot: usize) -> Rc<dyn Retire> {
        let n = self.children.len();
        let node = Rc::new(AllNode {
            inner: RefCell::new(Roster {
                audience: Some((audience, slot)),
                results: (0..n).map(|_| None).collect(),
                remaining: n,
                children: (0..n).map(|_| None).collect(),
                used: false,
            }),
        });
        if n == 0 {
            let audience = node.inner.borrow_mut().resolve_now();
            if let Some((audience, slot)) = audience {
                audience.propagate(slot, Signal::Prompt(Vec::new()));
            }
            return node;
        }
        stage_children(self.children, &node);
        node
    }
}

/// Per-family bookkeeping: parent link, per-slot storage, child handles.
struct Roster<P, S> {
    audience: Option<(Rc<dyn Audience<P>>, usize)>,
    results: Vec<Option<S>>,
    remaining: usize,
    children: Vec<Option<Rc<dyn Retire>>>,
    used: bool,
}

impl<P, S> Roster<P, S> {
    /// Marks the roster used and takes the parent link.
    fn resolve_now(&mut self) -> Option<(Rc<dyn Audience<P>>, usize)> {
        self.used = true;
        self.children.clear();
        self.audience.take()
    }

    /// Marks the roster used, taking the parent link and the child handles
    /// so the caller can cancel the losers.
    fn resolve_cancelling(
        &mut self,
    ) -> (Option<(Rc<dyn Audience<P>>, usize)>, Vec<Rc<dyn Retire>>) {
        self.used = true;
        let children = self.children.drain(..).flatten().collect();
        (self.audience.take(), children)
    }

    fn record(&mut self, slot: usize, value: S) {
        assert!(
            self.results[slot].is_none(),
            "duplicate propagation from child {slot}"
        );
        self.results[slot] = Some(value);
        self.remaining -= 1;
    }
}

struct AllNode<T: 'static> {
    inner: RefCell<Roster<Vec<T>, T>>,
}

impl<T> FamilyNode for AllNode<T> {
    fn is_used(&self) -> bool {
        self.inner.borrow().used
    }
    fn set_child(&self, slot: usize, handle: Rc<dyn Retire>) {
        let mut inner = self.inner.borrow_mut();
        // The node may have resolved while this child was being staged; a
        // propagating child is fully settled, so its handle can be dropped.
        if inner.used {
            return;
        }
        inner.children[slot] = Some(handle);
    }
}

impl<T> Audience<T> for AllNode<T> {
    fn propagate(&self, slot: usize, signal: Signal<T>) {
        match signal {
            Signal::Prompt(value) => {
                let audience = {
                    let mut inner = self.inner.borrow_mut();
                    if inner.used {
                        return;
                    }
                    inner.record(slot, value);
                    if inner.remaining > 0 {
                        return;
                    }
                    inner.resolve_now()
                };
                let results: Vec<T> = {
                    let mut inner = self.inner.borrow_mut();
                    inner
                        .results
                        .drain(..)
                        .map(|r| r.expect("family result missing"))
                        .collect()
                };
                if let Some((audience, slot)) = audience {
                    audience.propagate(slot, Signal::Prompt(results));
                }
            }
            Signal::Blooper(blooper) => {
                let (audience, children) = {
                    let mut inner = self.inner.borrow_mut();
                    if inner.used {
                        return;
                    }
                    inner.resolve_cancelling()
                };
                for child in children {
                    child.unblock();
                }
                if let Some((audience, slot)) = audience {
                    audience.propagate(slot, Signal::Blooper(blooper));
                }
            }
        }
    }
}

impl<T> Retire for AllNode<T> {
    fn unblock(&self) {
        retire_roster(&self.inner);
    }
}

/// Shared cancellation: mark used and unblock every staged child.
fn retire_roster<P, S>(inner: &RefCell<Roster<P, S>>) {
    let children = {
        let mut inner = inner.borrow_mut();
        if inner.used {
            return;
        }
        let (_, children) = inner.resolve_cancelling();
        children
    };
    for child in children {
        child.unblock();
    }
}

// ============================================================================
// Any
// ============================================================================

/// First prompt wins; if every child bloopers, an aggregate blooper carrying
/// all of them (in child order) propagates.
pub(crate) struct AnyBlueprint<T: 'static> {
    children: Vec<Hint<T>>,
}

impl<T> AnyBlueprint<T> {
    pub(crate) fn new(children: Vec<Hint<T>>) -> Self {
        Self { children }
    }
}

impl<T> Blueprint<T> for AnyBlueprint<T> {
    fn stage(self: Box<Self>, audience: Rc<dyn Audience<T>>, slot: usize) -> Rc<dyn Retire> {
        let n = self.children.len();
        let node = Rc::new(AnyNode {
            inner: RefCell::new(Roster {
                audience: Some((audience, slot)),
                results: (0..n).map(|_| None).collect(),
                remaining: n,
                children: (0..n).map(|_| None).collect(),
                used: false,
            }),
        });
        if n == 0 {
            let audience = node.inner.borrow_mut().resolve_now();
            if let Some((audience, slot)) = audience {
                audience.propagate(slot, Signal::Blooper(Blooper::aggregate(Vec::new())));
            }
            return node;
        }
        stage_children(self.children, &node);
        node
    }
}

struct AnyNode<T: 'static> {
    inner: RefCell<Roster<T, Blooper>>,
}

impl<T> FamilyNode for AnyNode<T> {
    fn is_used(&self) -> bool {
        self.inner.borrow().used
    }
    fn set_child(&self, slot: usize, handle: Rc<dyn Retire>) {
        let mut inner = self.inner.borrow_mut();
        // The node may have resolved while this child was being staged; a
        // propagating child is fully settled, so its handle can be dropped.
        if inner.used {
            return;
        }
        inner.children[slot] = Some(handle);
    }
}

impl<T> Audience<T> for AnyNode<T> {
    fn propagate(&self, slot: usize, signal: Signal<T>) {
        match signal {
            Signal::Prompt(value) => {
                let (audience, children) = {
                    let mut inner = self.inner.borrow_mut();
                    if inner.used {
                        return;
                    }
                    inner.resolve_cancelling()
                };
                for child in children {
                    child.unblock();
                }
                if let Some((audience, slot)) = audience {
                    audience.propagate(slot, Signal::Prompt(value));
                }
            }
            Signal::Blooper(blooper) => {
                let audience = {
                    let mut inner = self.inner.borrow_mut();
                    if inner.used {
                        return;
                    }
                    inner.record(slot, blooper);
                    if inner.remaining > 0 {
                        return;
                    }
                    inner.resolve_now()
                };
                let branches: Vec<Blooper> = {
                    let mut inner = self.inner.borrow_mut();
                    inner
                        .results
                        .drain(..)
                        .map(|r| r.expect("family result missing"))
                        .collect()
                };
                if let Some((audience, slot)) = audience {
                    audience.propagate(slot, Signal::Blooper(Blooper::aggregate(branches)));
                }
            }
        }
    }
}

impl<T> Retire for AnyNode<T> {
    fn unblock(&self) {
        retire_roster(&self.inner);
    }
}

// ============================================================================
// Race
// ============================================================================

/// First signal of either kind wins; losers are cancelled.
pub(crate) struct RaceBlueprint<T: 'static> {
    children: Vec<Hint<T>>,
}

impl<T> RaceBlueprint<T> {
    pub(crate) fn new(children: Vec<Hint<T>>) -> Self {
        Self { children }
    }
}

impl<T> Blueprint<T> for RaceBlueprint<T> {
    fn stage(self: Box<Self>, audience: Rc<dyn Audience<T>>, slot: usize) -> Rc<dyn Retire> {
        let n = self.children.len();
        let node = Rc::new(RaceNode {
            inner: RefCell::new(Roster {
                audience: Some((audience, slot)),
                results: Vec::<Option<()>>::new(),
                remaining: n,
                children: (0..n).map(|_| None).collect(),
                used: false,
            }),
        });
        if n == 0 {
            let audience = node.inner.borrow_mut().resolve_now();
            if let Some((audience, slot)) = audience {
                audience.propagate(slot, Signal::Blooper(Blooper::aggregate(Vec::new())));
            }
            return node;
        }
        stage_children(self.children, &node);
        node
    }
}

struct RaceNode<T: 'static> {
    inner: RefCell<Roster<T, ()>>,
}

impl<T> FamilyNode for RaceNode<T> {
    fn is_used(&self) -> bool {
        self.inner.borrow().used
    }
    fn set_child(&self, slot: usize, handle: Rc<dyn Retire>) {
        let mut inner = self.inner.borrow_mut();
        // The node may have resolved while this child was being staged; a
        // propagating child is fully settled, so its handle can be dropped.
        if inner.used {
            return;
        }
        inner.children[slot] = Some(handle);
    }
}

impl<T> Audience<T> for RaceNode<T> {
    fn propagate(&self, _slot: usize, signal: Signal<T>) {
        let (audience, children) = {
            let mut inner = self.inner.borrow_mut();
            if inner.used {
                return;
            }
            inner.resolve_cancelling()
        };
        for child in children {
            child.unblock();
        }
        if let Some((audience, slot)) = audience {
            audience.propagate(slot, signal);
        }
    }
}

impl<T> Retire for RaceNode<T> {
    fn unblock(&self) {
        retire_roster(&self.inner);
    }
}

// ============================================================================
// Settle
// ============================================================================

/// Collects every child's signal, in child order.
pub(crate) struct SettleBlueprint<T: 'static> {
    children: Vec<Hint<T>>,
}

impl<T> SettleBlueprint<T> {
    pub(crate) fn new(children: Vec<Hint<T>>) -> Self {
        Self { children }
    }
}

impl<T> Blueprint<Vec<Signal<T>>> for SettleBlueprint<T> {
    fn stage(
        self: Box<Self>,
        audience: Rc<dyn Audience<Vec<Signal<T>>>>,
        slot: usize,
    ) -> Rc<dyn Retire> {
        let n = self.children.len();
        let node = Rc::new(SettleNode {
            inner: RefCell::new(Roster {
                audience: Some((audience, slot)),
                results: (0..n).map(|_| None).collect(),
                remaining: n,
                children: (0..n).map(|_| None).collect(),
                used: false,
            }),
        });
        if n == 0 {
            let audience = node.inner.borrow_mut().resolve_now();
            if let Some((audience, slot)) = audience {
                audience.propagate(slot, Signal::Prompt(Vec::new()));
            }
            return node;
        }
        stage_children(self.children, &node);
        node
    }
}

struct SettleNode<T: 'static> {
    inner: RefCell<Roster<Vec<Signal<T>>, Signal<T>>>,
}

impl<T> FamilyNode for SettleNode<T> {
    fn is_used(&self) -> bool {
        self.inner.borrow().used
    }
    fn set_child(&self, slot: usize, handle: Rc<dyn Retire>) {
        let mut inner = self.inner.borrow_mut();
        // The node may have resolved while this child was being staged; a
        // propagating child is fully settled, so its handle can be dropped.
        if inner.used {
            return;
        }
        inner.children[slot] = Some(handle);
    }
}

impl<T> Audience<T> for SettleNode<T> {
    fn propagate(&self, slot: usize, signal: Signal<T>) {
        let audience = {
            let mut inner = self.inner.borrow_mut();
            if inner.used {
                return;
            }
            inner.record(slot, signal);
            if inner.remaining > 0 {
                return;
            }
            inner.resolve_now()
        };
        let results: Vec<Signal<T>> = {
            let mut inner = self.inner.borrow_mut();
            inner
                .results
                .drain(..)
                .map(|r| r.expect("family result missing"))
                .collect()
        };
        if let Some((audience, slot)) = audience {
            audience.propagate(slot, Signal::Prompt(results));
        }
    }
}

impl<T> Retire for SettleNode<T> {
    fn unblock(&self) {
        retire_roster(&self.inner);
    }
}
