//! Scenes: the coroutine contract gigs drive.
//!
//! A scene is a coroutine that yields hints and resumes with signals. Rust
//! has no native generators, so a scene is an object stepped explicitly:
//! each [`Scene::step`] receives the signal of the previous commitment and
//! either yields the next hint, returns the final value, or fails.
//!
//! Hand-written state machines implement [`Scene`] directly; the [`solo`]
//! and [`stepper`] adapters cover the common closure shapes.
//!
//! Returning `Err(Blooper::poison())` is the graceful wind-down: the gig
//! finishes with a `true` prompt and the agent is suspended and buried by
//! its manager.

use crate::cue::Hint;
use crate::error::Blooper;
use crate::types::{Payload, Signal};
use core::fmt;

/// The outcome of advancing a scene one step.
pub enum Step {
    /// The scene committed to an asynchronous wait.
    Yield(Hint<Payload>),
    /// The scene completed with a value.
    Return(Payload),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yield(hint) => write!(f, "Yield({hint:?})"),
            Self::Return(_) => f.write_str("Return(..)"),
        }
    }
}

/// A coroutine that yields hints and completes with a value or a blooper.
pub trait Scene {
    /// Advances the scene with the signal of its previous commitment.
    ///
    /// The first step receives the unit prompt.
    fn step(&mut self, signal: Signal<Payload>) -> Result<Step, Blooper>;
}

struct SoloScene<F> {
    body: Option<F>,
}

impl<F> Scene for SoloScene<F>
where
    F: FnOnce(Signal<Payload>) -> Result<Payload, Blooper>,
{
    fn step(&mut self, signal: Signal<Payload>) -> Result<Step, Blooper> {
        match self.body.take() {
            Some(body) => body(signal).map(Step::Return),
            None => Err(Blooper::protocol("solo scene stepped twice")),
        }
    }
}

/// A scene that completes in a single step.
///
/// This is the shape the surprise path requires.
pub fn solo(body: impl FnOnce(Signal<Payload>) -> Result<Payload, Blooper> + 'static) -> Box<dyn Scene> {
    Box::new(SoloScene { body: Some(body) })
}

struct StepperScene<F> {
    body: F,
    takes: usize,
}

impl<F> Scene for StepperScene<F>
where
    F: FnMut(usize, Signal<Payload>) -> Result<Step, Blooper>,
{
    fn step(&mut self, signal: Signal<Payload>) -> Result<Step, Blooper> {
        let take = self.takes;
        self.takes += 1;
        (self.body)(take, signal)
    }
}

/// A scene driven by a closure receiving the step index.
///
/// Index 0 is the first step; the closure plays the role of a hand-written
/// state machine for simple multi-step scenes.
pub fn stepper(
    body: impl FnMut(usize, Signal<Payload>) -> Result<Step, Blooper> + 'static,
) -> Box<dyn Scene> {
    Box::new(StepperScene { body, takes: 0 })
}
