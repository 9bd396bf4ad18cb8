//! Incidents and verdicts: the vocabulary of supervision.
//!
//! When a scene fails, the gig packages the failure as an [`Incident`] and
//! delivers it to the manager's [`Guard`]. The guard's [`Verdict`] decides
//! what happens to the offender and its team; it never hides the blooper from
//! the originating gig, which always receives one.

use crate::error::Blooper;
use crate::role::Casting;
use crate::types::{AgentId, Payload};
use core::fmt;
use std::rc::Rc;

/// A scene failure delivered to a manager's guard.
pub struct Incident {
    /// The agent whose gig failed.
    pub offender: AgentId,
    /// The failure value.
    pub blooper: Blooper,
    /// The failing gig's selector, if it had a scene name.
    pub selector: Option<String>,
    /// The failing gig's parameters, if still held.
    pub parameters: Option<Payload>,
}

impl fmt::Debug for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incident")
            .field("offender", &self.offender)
            .field("blooper", &self.blooper)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// A supervision decision.
pub enum Verdict {
    /// The offender continues; the failing gig still finishes with a blooper.
    Forgive,
    /// Suspend the offender and its descendants, then bury them.
    Punish,
    /// As `Punish`, and the manager raises a fresh escalation in its own
    /// supervision scope.
    Escalate,
    /// As `Punish` for the descendants, then resume the offender with a fresh
    /// role built from the casting.
    Recast(Casting),
}

impl fmt::Debug for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forgive => write!(f, "Forgive"),
            Self::Punish => write!(f, "Punish"),
            Self::Escalate => write!(f, "Escalate"),
            Self::Recast(_) => write!(f, "Recast(..)"),
        }
    }
}

/// A function mapping an incident to a verdict.
///
/// Guards are attached per team member at casting time and consulted by the
/// member's manager when one of the member's gigs fails.
pub type Guard = Rc<dyn Fn(&Incident) -> Verdict>;

/// The default guard: punish the offender.
#[must_use]
pub fn default_guard() -> Guard {
    Rc::new(|_| Verdict::Punish)
}
