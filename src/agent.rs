//! Agents: the actors of the theater.
//!
//! An agent owns its role and three gig queues (workload, agenda,
//! postponed), references its manager, and holds its team members with the
//! guard that judges each one. Lifecycle: cast → debut gig runs with other
//! gigs postponed → normal operation → possibly suspended (propagating to
//! descendants) → reset stops every gig and disposes the role → buried, or
//! revived with a fresh role.

use crate::destiny::Destiny;
use crate::gig::GigStatus;
use crate::role::RoleCell;
use crate::status::{Links, StatusList, Stationed};
use crate::theater::Theater;
use crate::types::{AgentId, GigId, Guard, Payload};
use core::fmt;

/// The exclusive statuses an agent can be stationed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AgentStatus {
    /// Has workload and may be granted the stage.
    Ready,
    /// Waiting on commitments; agenda non-empty, workload empty.
    Waiting,
    /// No work at all.
    Idle,
    /// Cannot work.
    Suspended,
    /// Its gig is on stage right now.
    Busy,
}

/// The theater-owned state of one agent.
pub(crate) struct AgentRecord {
    pub(crate) id: AgentId,
    pub(crate) suspended: bool,
    pub(crate) initializing: Option<GigId>,
    pub(crate) manager: Option<AgentId>,
    pub(crate) team: Vec<(AgentId, Guard)>,
    pub(crate) workload: StatusList<GigStatus>,
    pub(crate) agenda: StatusList<GigStatus>,
    pub(crate) postponed: StatusList<GigStatus>,
    pub(crate) role: Option<RoleCell>,
    pub(crate) destiny: Destiny<Payload>,
    pub(crate) showing: Option<GigId>,
    pub(crate) links: Links<AgentStatus>,
}

impl AgentRecord {
    pub(crate) fn new(id: AgentId, manager: Option<AgentId>, role: RoleCell) -> Self {
        Self {
            id,
            suspended: false,
            initializing: None,
            manager,
            team: Vec::new(),
            workload: StatusList::new("workload", GigStatus::Workload),
            agenda: StatusList::new("agenda", GigStatus::Agenda),
            postponed: StatusList::new("postponed", GigStatus::Postponed),
            role: Some(role),
            destiny: Destiny::new(),
            showing: None,
            links: Links::default(),
        }
    }

    /// Finds the guard attached to a team member.
    pub(crate) fn guard_for(&self, member: AgentId) -> Option<Guard> {
        self.team
            .iter()
            .find(|(id, _)| *id == member)
            .map(|(_, guard)| guard.clone())
    }
}

impl Stationed<AgentStatus> for AgentRecord {
    fn links(&self) -> &Links<AgentStatus> {
        &self.links
    }
    fn links_mut(&mut self) -> &mut Links<AgentStatus> {
        &mut self.links
    }
}

impl fmt::Debug for AgentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRecord")
            .field("id", &self.id)
            .field("status", &self.links.status())
            .field("suspended", &self.suspended)
            .field("team", &self.team.len())
            .field("workload", &self.workload.len())
            .field("agenda", &self.agenda.len())
            .field("postponed", &self.postponed.len())
            .finish()
    }
}

/// A handle to an agent.
///
/// Stays valid after burial: death is published through the destiny the
/// handle shares with the theater, and operations on a buried agent report
/// ghosts.
#[derive(Clone)]
pub struct Agent {
    pub(crate) theater: Theater,
    pub(crate) id: AgentId,
    pub(crate) destiny: Destiny<Payload>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent({}, alive: {})", self.id, self.is_alive())
    }
}

impl Agent {
    /// Returns the agent id.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Returns true while the agent has not been buried.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.destiny.is_sealed()
    }

    /// Kills the agent: a janitor gig resets and buries it, finishing with
    /// `true` once the agent is dead (immediately true if already buried).
    #[must_use]
    pub fn kill(&self) -> crate::Gig {
        let gig = self.theater.burial_gig(self.id);
        gig.run();
        gig
    }
}
