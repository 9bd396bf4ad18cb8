//! The blooper: stagecraft's failure value.
//!
//! Error handling follows these principles:
//!
//! - Failures are explicit and typed (no stringly-typed errors)
//! - Bloopers are cheap to clone: a finished gig's fate may be revealed to
//!   any number of waiters
//! - Supervision never hides a blooper from the originating gig
//!
//! Four failure categories flow through the same type:
//!
//! 1. **Scene failures** trigger the supervision flow.
//! 2. **Commitment failures** (a hint that cannot become a pending cue) are
//!    reported through the commit effect.
//! 3. **Protocol violations** (misuse of a state machine) are raised as
//!    bloopers on the offending call, or synchronously during bootstrap.
//!    Internal data-structure invariant breaches panic instead; they are
//!    programming errors with no local recovery.
//! 4. **Cancellation** is not an error, but it travels as a blooper so a
//!    stopped gig's fate is observable.

use core::fmt;
use std::sync::Arc;

/// The kind of failure a blooper carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlooperKind {
    // === Scene failures ===
    /// A scene raised an application failure.
    Scene,
    /// The poison sentinel: a scene was told to wind down.
    Poison,

    // === Cancellation ===
    /// A gig or commitment was stopped before completing.
    Stopped,

    // === Commitment failures ===
    /// A hint could not be turned into a pending cue.
    Commitment,
    /// Every branch of an `any` family failed.
    Aggregate,

    // === Protocol violations ===
    /// An operation addressed a buried agent or a stale id.
    Ghost,
    /// Misuse of the theater's state machines (nested surprise, posting a
    /// foreign gig, multi-step surprise scene, off-stage scene call).
    Protocol,
    /// A named scene was not found and the role declined to improvise.
    UnknownScene,
}

impl BlooperKind {
    /// Returns a short static label for the kind.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Scene => "scene",
            Self::Poison => "poison",
            Self::Stopped => "stopped",
            Self::Commitment => "commitment",
            Self::Aggregate => "aggregate",
            Self::Ghost => "ghost",
            Self::Protocol => "protocol",
            Self::UnknownScene => "unknown scene",
        }
    }
}

impl fmt::Display for BlooperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failure value.
///
/// Cloning is cheap; the source chain and aggregate branches are shared.
#[derive(Clone)]
pub struct Blooper {
    kind: BlooperKind,
    context: Option<Arc<str>>,
    source: Option<Arc<dyn std::error::Error>>,
    branches: Arc<[Blooper]>,
}

impl Blooper {
    /// Creates a new blooper with the given kind.
    #[must_use]
    pub fn new(kind: BlooperKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
            branches: Arc::from([]),
        }
    }

    /// Creates a scene failure with a message.
    #[must_use]
    pub fn scene(message: impl Into<String>) -> Self {
        Self::new(BlooperKind::Scene).with_context(message)
    }

    /// Creates the poison sentinel.
    #[must_use]
    pub fn poison() -> Self {
        Self::new(BlooperKind::Poison)
    }

    /// Creates a stop/cancellation blooper with a reason.
    #[must_use]
    pub fn stopped(reason: impl Into<String>) -> Self {
        Self::new(BlooperKind::Stopped).with_context(reason)
    }

    /// Creates a ghost blooper for an operation on a buried agent.
    #[must_use]
    pub fn ghost() -> Self {
        Self::new(BlooperKind::Ghost)
    }

    /// Creates a protocol-violation blooper.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(BlooperKind::Protocol).with_context(message)
    }

    /// Creates an aggregate blooper from the failures of every branch.
    #[must_use]
    pub fn aggregate(branches: Vec<Blooper>) -> Self {
        Self {
            kind: BlooperKind::Aggregate,
            context: None,
            source: None,
            branches: branches.into(),
        }
    }

    /// Returns the blooper kind.
    #[must_use]
    pub const fn kind(&self) -> BlooperKind {
        self.kind
    }

    /// Returns true if this is the poison sentinel.
    #[must_use]
    pub const fn is_poison(&self) -> bool {
        matches!(self.kind, BlooperKind::Poison)
    }

    /// Returns true if this blooper represents cancellation.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self.kind, BlooperKind::Stopped)
    }

    /// Returns the context message, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns the branch failures of an aggregate blooper.
    #[must_use]
    pub fn branches(&self) -> &[Blooper] {
        &self.branches
    }

    /// Adds context text to the blooper.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(Arc::from(context.into()));
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Debug for Blooper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Blooper");
        s.field("kind", &self.kind);
        if let Some(ctx) = &self.context {
            s.field("context", ctx);
        }
        if !self.branches.is_empty() {
            s.field("branches", &self.branches.len());
        }
        s.finish()
    }
}

impl fmt::Display for Blooper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        if !self.branches.is_empty() {
            write!(f, " ({} branches)", self.branches.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Blooper {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let b = Blooper::scene("boom");
        assert_eq!(b.to_string(), "scene: boom");
    }

    #[test]
    fn aggregate_carries_branches() {
        let b = Blooper::aggregate(vec![Blooper::scene("a"), Blooper::scene("b")]);
        assert_eq!(b.kind(), BlooperKind::Aggregate);
        assert_eq!(b.branches().len(), 2);
        assert_eq!(b.to_string(), "aggregate (2 branches)");
    }

    #[test]
    fn poison_is_sentinel() {
        assert!(Blooper::poison().is_poison());
        assert!(!Blooper::scene("x").is_poison());
    }

    #[test]
    fn clones_share_chain() {
        let b = Blooper::scene("x").with_source(std::fmt::Error);
        let c = b.clone();
        assert!(std::error::Error::source(&c).is_some());
    }
}
