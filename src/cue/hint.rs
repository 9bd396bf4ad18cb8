//! Hints: anything that can become a one-shot asynchronous event.
//!
//! A hint is materialised into a pending cue when someone commits to wait:
//!
//! - a [`Cue`] is blocked directly;
//! - a [`Teleprompter`] produces a fresh cue which is blocked;
//! - a foreign promise (any `Future` resolving to a signal) is bridged
//!   through the theater's portals table — a raw foreign hint committed
//!   outside a gig signals a commitment failure through the effect;
//! - composite blueprints (capture and the families) stage an event node
//!   and recurse into their children.

use super::commitment_blooper;
use super::core::{Audience, Cue, Retire, Teleprompter};
use crate::types::Signal;
use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

/// A foreign promise: a host future resolving to a signal.
pub(crate) type ForeignFuture<T> = Pin<Box<dyn Future<Output = Signal<T>>>>;

/// A deferred composite event (capture or family), staged at commit time.
pub(crate) trait Blueprint<T> {
    /// Blocks this event against its audience and stages its children,
    /// stopping early if the event resolves. Returns the cancellation
    /// handle for the staged subtree.
    fn stage(self: Box<Self>, audience: Rc<dyn Audience<T>>, slot: usize) -> Rc<dyn Retire>;
}

/// Anything that can become a one-shot asynchronous event.
pub struct Hint<T: 'static> {
    kind: HintKind<T>,
}

enum HintKind<T: 'static> {
    Cue(Cue<T>),
    Teleprompter(Teleprompter<T>),
    Foreign(ForeignFuture<T>),
    Blueprint(Box<dyn Blueprint<T>>),
}

impl<T> fmt::Debug for Hint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            HintKind::Cue(cue) => write!(f, "Hint::{cue:?}"),
            HintKind::Teleprompter(_) => f.write_str("Hint::Teleprompter"),
            HintKind::Foreign(_) => f.write_str("Hint::Foreign"),
            HintKind::Blueprint(_) => f.write_str("Hint::Blueprint"),
        }
    }
}

impl<T> Hint<T> {
    pub(crate) fn from_cue(cue: Cue<T>) -> Self {
        Self {
            kind: HintKind::Cue(cue),
        }
    }

    pub(crate) fn from_teleprompter(teleprompter: Teleprompter<T>) -> Self {
        Self {
            kind: HintKind::Teleprompter(teleprompter),
        }
    }

    pub(crate) fn from_blueprint(blueprint: Box<dyn Blueprint<T>>) -> Self {
        Self {
            kind: HintKind::Blueprint(blueprint),
        }
    }

    /// Wraps a foreign promise as a hint.
    ///
    /// The promise is bridged through the theater when the hint is yielded
    /// from a scene (or adopted explicitly); committing a raw foreign hint
    /// with [`crate::cue::commit`] reports a commitment failure.
    pub fn foreign(future: impl Future<Output = Signal<T>> + 'static) -> Self {
        Self {
            kind: HintKind::Foreign(Box::pin(future)),
        }
    }

    /// Returns true if this hint wraps a foreign promise.
    #[must_use]
    pub fn is_foreign(&self) -> bool {
        matches!(self.kind, HintKind::Foreign(_))
    }

    /// Takes the foreign promise out, or returns the hint unchanged.
    pub(crate) fn into_foreign(self) -> Result<ForeignFuture<T>, Self> {
        match self.kind {
            HintKind::Foreign(future) => Ok(future),
            kind => Err(Self { kind }),
        }
    }

    /// Materialises the hint into a pending cue tree.
    pub(crate) fn stage(self, audience: Rc<dyn Audience<T>>, slot: usize) -> Rc<dyn Retire> {
        match self.kind {
            HintKind::Cue(cue) => {
                cue.block(audience, slot);
                Rc::new(cue)
            }
            HintKind::Teleprompter(teleprompter) => {
                let cue = teleprompter.autocue();
                cue.block(audience, slot);
                Rc::new(cue)
            }
            HintKind::Foreign(_) => {
                let cue: Cue<T> = Cue::new(move |cue: &Cue<T>| {
                    cue.reveal(Signal::Blooper(commitment_blooper(
                        "foreign promise committed outside the theater; \
                         yield it from a scene or adopt it first",
                    )));
                });
                cue.block(audience, slot);
                Rc::new(cue)
            }
            HintKind::Blueprint(blueprint) => blueprint.stage(audience, slot),
        }
    }
}

impl<T> From<Cue<T>> for Hint<T> {
    fn from(cue: Cue<T>) -> Self {
        Self::from_cue(cue)
    }
}

impl<T> From<Teleprompter<T>> for Hint<T> {
    fn from(teleprompter: Teleprompter<T>) -> Self {
        Self::from_teleprompter(teleprompter)
    }
}
