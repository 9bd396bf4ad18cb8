//! Gigs: the unit of work an agent performs.
//!
//! A gig carries a selector and parameters, lazily creates its scene on the
//! first stage take, and then alternates between the stage and its agent's
//! queues:
//!
//! ```text
//! Inert ──run/post──► Workload ──stage granted──► TakingStage
//!                        ▲                            │ yield hint
//!                        │ signal arrives             ▼
//!                        └──────────────────────── Agenda
//!                                                     │ completion,
//!                     Postponed (while initializing)  │ failure, stop
//!                                                     ▼
//!                                                  Finished(fate)
//! ```
//!
//! Finishing is terminal and happens exactly once; afterwards the record is
//! removed and only the controller destiny (held by the [`Gig`] handle)
//! remembers the fate.

use crate::destiny::Destiny;
use crate::error::Blooper;
use crate::role::{RoleCell, Stagehand};
use crate::scene::Scene;
use crate::status::{Links, Stationed};
use crate::theater::Theater;
use crate::types::{AgentId, GigId, Payload, Signal};
use crate::cue::{Hint, Rollback};
use core::fmt;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// The exclusive statuses a gig can be stationed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GigStatus {
    /// Queued for the stage.
    Workload,
    /// Holding a pending commitment.
    Agenda,
    /// Parked while the agent initialises.
    Postponed,
    /// On stage right now.
    Active,
}

/// How the gig's scene is obtained.
pub(crate) enum Selector {
    /// A free scene function.
    Scenic(Box<dyn FnOnce(&Stagehand, Payload) -> Result<Box<dyn Scene>, Blooper>>),
    /// A marked scene looked up on the role, with improvisation fallback.
    Named(String),
    /// The role's initialisation scene.
    Debut,
    /// The disposal scene of a role already detached from its agent.
    Dispose(RoleCell),
}

impl Selector {
    /// The selector name recorded on incidents.
    pub(crate) fn label(&self) -> Option<String> {
        match self {
            Self::Named(name) => Some(name.clone()),
            Self::Scenic(_) | Self::Debut | Self::Dispose(_) => None,
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scenic(_) => f.write_str("Scenic(..)"),
            Self::Named(name) => write!(f, "Named({name})"),
            Self::Debut => f.write_str("Debut"),
            Self::Dispose(_) => f.write_str("Dispose(..)"),
        }
    }
}

/// The theater-owned state of one gig.
pub(crate) struct GigRecord {
    pub(crate) id: GigId,
    pub(crate) agent: Option<AgentId>,
    pub(crate) selector: Option<Selector>,
    pub(crate) selector_label: Option<String>,
    pub(crate) params: Option<Payload>,
    pub(crate) scene: Option<Box<dyn Scene>>,
    pub(crate) progress: Option<Signal<Payload>>,
    pub(crate) rollback: Option<Rollback>,
    pub(crate) controller: Destiny<Payload>,
    pub(crate) links: Links<GigStatus>,
}

impl GigRecord {
    pub(crate) fn new(id: GigId, agent: AgentId, selector: Selector, params: Payload) -> Self {
        Self {
            id,
            agent: Some(agent),
            selector_label: selector.label(),
            selector: Some(selector),
            params: Some(params),
            scene: None,
            progress: None,
            rollback: None,
            controller: Destiny::new(),
            links: Links::default(),
        }
    }

    /// True if the gig has never been posted or staged.
    pub(crate) fn is_inert(&self) -> bool {
        self.links.status().is_none() && self.scene.is_none()
    }
}

impl Stationed<GigStatus> for GigRecord {
    fn links(&self) -> &Links<GigStatus> {
        &self.links
    }
    fn links_mut(&mut self) -> &mut Links<GigStatus> {
        &mut self.links
    }
}

impl fmt::Debug for GigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GigRecord")
            .field("id", &self.id)
            .field("agent", &self.agent)
            .field("status", &self.links.status())
            .finish_non_exhaustive()
    }
}

/// A handle to a unit of work.
///
/// The handle stays valid after the gig finishes: the fate is published
/// through the controller destiny it shares with the theater.
#[derive(Clone)]
pub struct Gig {
    pub(crate) theater: Theater,
    pub(crate) id: GigId,
    pub(crate) controller: Destiny<Payload>,
}

impl fmt::Debug for Gig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gig({}, fate: {:?})", self.id, self.controller.fate())
    }
}

impl Gig {
    /// Returns the gig id.
    #[must_use]
    pub fn id(&self) -> GigId {
        self.id
    }

    /// Starts an inert gig; a no-op on running or finished gigs.
    pub fn run(&self) {
        self.theater.start_gig(self.id);
    }

    /// Stops the gig, finishing it with a stop blooper and rolling back any
    /// pending commitment. A no-op on inert and finished gigs.
    pub fn stop(&self, reason: &str) {
        self.theater.stop_gig(self.id, reason);
    }

    /// Returns the fate, if the gig has finished.
    #[must_use]
    pub fn fate(&self) -> Option<Signal<Payload>> {
        self.controller.fate()
    }

    /// A hint over the gig's completion.
    ///
    /// First use forces the gig to run if it is still inert.
    #[must_use]
    pub fn when_done(&self) -> Hint<Payload> {
        self.run();
        Hint::from(self.controller.autocue())
    }

    /// Bridges the completion to a standard future.
    ///
    /// Lazy: the first poll forces the gig to run if it is still inert,
    /// then forks a helper gig on the janitor that reveals the completion
    /// signal to the promise. The future is single-threaded, like
    /// everything in the theater.
    #[must_use]
    pub fn promised(&self) -> FatePromise {
        FatePromise {
            gig: self.clone(),
            shared: Rc::new(RefCell::new(FateShared {
                fate: None,
                waker: None,
            })),
            forked: false,
        }
    }
}

/// The slot a fate promise shares with its janitor bridge gig.
pub(crate) struct FateShared {
    /// The completion signal, once the bridge has seen it.
    pub(crate) fate: Option<Signal<Payload>>,
    /// The waker of the latest poll; the bridge takes it on revelation.
    pub(crate) waker: Option<Waker>,
}

/// A standard future over a gig's fate.
///
/// The fate arrives through a helper gig on the janitor, so the bridge
/// runs under the same stage discipline as every other piece of work.
pub struct FatePromise {
    gig: Gig,
    shared: Rc<RefCell<FateShared>>,
    forked: bool,
}

impl Future for FatePromise {
    type Output = Result<Payload, Blooper>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.forked {
            this.forked = true;
            this.gig.run();
            this.gig
                .theater
                .fork_fate_bridge(&this.gig.controller, Rc::clone(&this.shared));
        }
        let mut shared = this.shared.borrow_mut();
        match shared.fate.clone() {
            Some(fate) => Poll::Ready(fate.into_result()),
            None => {
                // Only the waker of the latest poll is woken.
                shared.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
