//! Signals: the discriminated completion value of every asynchronous event.
//!
//! All completion in stagecraft is expressed as a [`Signal`]: either a
//! `Prompt` carrying a success value or a `Blooper` carrying a failure. Cues
//! reveal signals, scenes resume with signals, gigs finish with signals.
//!
//! The theater layer erases scene values to [`Payload`] (a shared `dyn Any`),
//! confining dynamic typing to the gig/scene boundary; the cue engine itself
//! stays generic.

use crate::error::Blooper;
use core::fmt;
use std::any::Any;
use std::rc::Rc;

/// Success value (`Prompt`) or failure value (`Blooper`).
#[derive(Clone)]
pub enum Signal<T> {
    /// The operation succeeded with a value.
    Prompt(T),
    /// The operation failed.
    Blooper(Blooper),
}

impl<T> Signal<T> {
    /// Returns true if this signal is a prompt.
    #[must_use]
    pub const fn is_prompt(&self) -> bool {
        matches!(self, Self::Prompt(_))
    }

    /// Returns true if this signal is a blooper.
    #[must_use]
    pub const fn is_blooper(&self) -> bool {
        matches!(self, Self::Blooper(_))
    }

    /// Maps the prompt value, passing bloopers through.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Signal<U> {
        match self {
            Self::Prompt(v) => Signal::Prompt(f(v)),
            Self::Blooper(b) => Signal::Blooper(b),
        }
    }

    /// Converts into a `Result`, with the blooper as the error.
    pub fn into_result(self) -> Result<T, Blooper> {
        match self {
            Self::Prompt(v) => Ok(v),
            Self::Blooper(b) => Err(b),
        }
    }

    /// Returns the blooper, if any.
    #[must_use]
    pub fn blooper(&self) -> Option<&Blooper> {
        match self {
            Self::Prompt(_) => None,
            Self::Blooper(b) => Some(b),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt(v) => f.debug_tuple("Prompt").field(v).finish(),
            Self::Blooper(b) => f.debug_tuple("Blooper").field(b).finish(),
        }
    }
}

impl<T> From<Result<T, Blooper>> for Signal<T> {
    fn from(result: Result<T, Blooper>) -> Self {
        match result {
            Ok(v) => Self::Prompt(v),
            Err(b) => Self::Blooper(b),
        }
    }
}

/// The erased value scenes yield and return.
///
/// Shared (`Rc`) so a single fate can be revealed cheaply to every pending
/// waiter. The source system is dynamically typed; in Rust the erasure is
/// confined to the gig/scene boundary, with [`unpack`] recovering concrete
/// values.
#[derive(Clone)]
pub struct Payload(Rc<dyn Any>);

impl Payload {
    /// Wraps a concrete value.
    #[must_use]
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// The unit payload, used where a signal carries no value.
    #[must_use]
    pub fn unit() -> Self {
        Self(Rc::new(()))
    }

    /// Returns true if the payload holds a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Recovers a concrete value, cloning it out of the shared allocation.
    #[must_use]
    pub fn unpack<T: Any + Clone>(&self) -> Option<T> {
        self.0.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is::<()>() {
            f.write_str("Payload(())")
        } else {
            f.write_str("Payload(..)")
        }
    }
}

/// Wraps a concrete value as a [`Payload`].
#[must_use]
pub fn payload<T: Any>(value: T) -> Payload {
    Payload::new(value)
}

/// The unit payload.
#[must_use]
pub fn unit() -> Payload {
    Payload::unit()
}

/// Recovers a concrete value from a [`Payload`].
///
/// Returns `None` if the payload holds a different type.
#[must_use]
pub fn unpack<T: Any + Clone>(value: &Payload) -> Option<T> {
    value.unpack()
}
