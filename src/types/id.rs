//! Identifier types for theater entities.
//!
//! Agents and gigs are addressed through arena indices wrapped in typed ids.
//! A buried agent's slot may be reused; the generation counter inside the
//! index makes the stale id observable instead of aliasing the newcomer.

use crate::util::ArenaIndex;
use core::fmt;

/// A unique identifier for an agent.
///
/// Agents are identified through this opaque handle; the record it points to
/// is owned by the theater. Once the agent is buried the id goes stale and
/// operations on it report a ghost.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub(crate) ArenaIndex);

impl AgentId {
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent({}:{})", self.0.index(), self.0.generation())
    }
}

/// A unique identifier for a gig.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GigId(pub(crate) ArenaIndex);

impl GigId {
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }
}

impl fmt::Debug for GigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GigId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for GigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gig({}:{})", self.0.index(), self.0.generation())
    }
}

/// A key into the portals table (foreign promises being bridged).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalKey(pub(crate) u64);

impl PortalKey {
    /// Creates a portal key from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw key value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PortalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortalKey({})", self.0)
    }
}

/// A key identifying an armed timer on the platform.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey(pub(crate) u64);

impl TimerKey {
    /// Creates a timer key from a raw value (platform implementations).
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw key value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerKey({})", self.0)
    }
}
