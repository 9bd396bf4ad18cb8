//! The theater: public surface, supervision, and bootstrap.
//!
//! A [`Theater`] is a cheap handle over the single theater context: the
//! stage state, the platform, the configuration, and the metrics. There are
//! no globals; every entry point goes through a handle.
//!
//! # Supervision
//!
//! Three immortal house agents are constructed synchronously at startup
//! through the surprise path:
//!
//! - the **director** roots the supervision tree;
//! - the **janitor** runs helper gigs (burials, role disposal, kill);
//! - the **troupe** manages the agents cast through [`Theater::cast`].
//!
//! When a scene fails, the failing gig always receives the blooper; the
//! manager's guard only decides what happens to the offender and its team.

use crate::agent::{Agent, AgentRecord};
use crate::config::StageConfig;
use crate::cue::Hint;
use crate::destiny::Destiny;
use crate::error::Blooper;
use crate::exchange::Exchange;
use crate::gig::{FateShared, Gig, GigRecord, Selector};
use crate::observability::StageMetrics;
use crate::platform::Platform;
use crate::role::{Casting, HouseRole, RoleCell, Stagehand};
use crate::scene::{solo, stepper, Scene, Step};
use crate::stage::StageState;
use crate::tracing_compat::{debug, warn};
use crate::types::{
    default_guard, payload, unit, AgentId, GigId, Incident, Payload, Signal, Verdict,
};
use core::fmt;
use std::cell::{RefCell, RefMut};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

pub(crate) struct TheaterCore {
    config: StageConfig,
    metrics: Rc<StageMetrics>,
    platform: Rc<dyn Platform>,
    state: RefCell<StageState>,
}

/// A handle to the theater context.
#[derive(Clone)]
pub struct Theater {
    inner: Rc<TheaterCore>,
}

impl fmt::Debug for Theater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(
            f,
            "Theater(agents: {}, gigs: {})",
            state.agents.len(),
            state.gigs.len()
        )
    }
}

/// A non-owning theater handle for platform thunks.
pub(crate) struct WeakTheater {
    inner: Weak<TheaterCore>,
}

impl WeakTheater {
    pub(crate) fn upgrade(&self) -> Option<Theater> {
        self.inner.upgrade().map(|inner| Theater { inner })
    }
}

impl Theater {
    /// Creates a theater on the given platform and bootstraps the house
    /// agents synchronously.
    #[must_use]
    pub fn new(platform: Rc<dyn Platform>, config: StageConfig) -> Self {
        let theater = Self {
            inner: Rc::new(TheaterCore {
                config,
                metrics: Rc::new(StageMetrics::default()),
                platform,
                state: RefCell::new(StageState::new()),
            }),
        };
        let weak = theater.downgrade();
        theater
            .platform()
            .set_portal_pump(Box::new(move || {
                weak.upgrade().is_some_and(|theater| theater.pump_portals())
            }));

        let (director, debut) = theater.cast_root(Casting::new(|| Box::new(HouseRole)));
        theater.state().director = Some(director.id());
        theater
            .surprise_drive(debut.id())
            .expect("director debut cannot fail");

        let (janitor, debut) = theater
            .cast_inert(
                director.id(),
                Casting::new(|| Box::new(HouseRole)).with_guard(|_| Verdict::Forgive),
            )
            .expect("director is alive during bootstrap");
        theater.state().janitor = Some(janitor.id());
        theater
            .surprise_drive(debut.id())
            .expect("janitor debut cannot fail");

        let (troupe, debut) = theater
            .cast_inert(
                director.id(),
                Casting::new(|| Box::new(HouseRole)).with_guard(|_| Verdict::Forgive),
            )
            .expect("director is alive during bootstrap");
        theater.state().troupe = Some(troupe.id());
        theater
            .surprise_drive(debut.id())
            .expect("troupe debut cannot fail");

        theater
    }

    /// Creates a theater on a fresh lab platform with default configuration.
    #[must_use]
    pub fn lab() -> (Self, crate::platform::LabPlatform) {
        let platform = crate::platform::LabPlatform::new();
        let theater = Self::new(Rc::new(platform.clone()), StageConfig::default());
        (theater, platform)
    }

    pub(crate) fn state(&self) -> RefMut<'_, StageState> {
        self.inner.state.borrow_mut()
    }

    pub(crate) fn platform(&self) -> &Rc<dyn Platform> {
        &self.inner.platform
    }

    pub(crate) fn config(&self) -> &StageConfig {
        &self.inner.config
    }

    /// The stage metrics.
    #[must_use]
    pub fn metrics(&self) -> &StageMetrics {
        &self.inner.metrics
    }

    pub(crate) fn downgrade(&self) -> WeakTheater {
        WeakTheater {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // ========================================================================
    // Public surface
    // ========================================================================

    /// Builds an inert gig running a free scene on the troupe.
    pub fn play(
        &self,
        scenic: impl FnOnce(&Stagehand, Payload) -> Result<Box<dyn Scene>, Blooper> + 'static,
        params: Payload,
    ) -> Gig {
        let troupe = self.troupe_id();
        self.play_on_id(troupe, scenic, params)
    }

    /// Builds an inert gig running a free scene on the given agent.
    pub fn play_on(
        &self,
        agent: &Agent,
        scenic: impl FnOnce(&Stagehand, Payload) -> Result<Box<dyn Scene>, Blooper> + 'static,
        params: Payload,
    ) -> Gig {
        self.play_on_id(agent.id(), scenic, params)
    }

    /// Builds an inert gig invoking a marked (or improvised) scene by name.
    pub fn play_named(&self, agent: &Agent, selector: &str, params: Payload) -> Gig {
        self.play_named_on(agent.id(), selector, params)
    }

    /// Plays a free scene on the troupe and starts it immediately.
    pub fn run(
        &self,
        scenic: impl FnOnce(&Stagehand, Payload) -> Result<Box<dyn Scene>, Blooper> + 'static,
        params: Payload,
    ) -> Gig {
        let gig = self.play(scenic, params);
        gig.run();
        gig
    }

    /// Casts an agent under the troupe.
    pub fn cast(&self, casting: Casting) -> Result<Agent, Blooper> {
        let troupe = self.troupe_id();
        self.cast_on(troupe, casting)
    }

    /// Drives an inert gig synchronously; the scene must finish in one
    /// step. Used at construction time, before the scheduler pumps.
    pub fn surprise(&self, gig: &Gig) -> Result<Payload, Blooper> {
        self.surprise_drive(gig.id())
    }

    /// Normalises a hint for yielding: foreign promises are adopted through
    /// the portals table, everything else passes through.
    pub fn when(&self, hint: Hint<Payload>) -> Hint<Payload> {
        self.adopt_hint(hint)
    }

    /// Adopts a foreign promise as a hint.
    pub fn adopt(&self, future: impl Future<Output = Signal<Payload>> + 'static) -> Hint<Payload> {
        self.adopt_hint(Hint::foreign(future))
    }

    /// A hint that reveals once the agent is buried.
    ///
    /// Reveals immediately for an agent that is already dead.
    #[must_use]
    pub fn mourn(&self, agent: &Agent) -> Hint<Payload> {
        Hint::from(agent.destiny.autocue())
    }

    /// A timer hint: reveals the unit prompt after `delay`.
    #[must_use]
    pub fn timeout(&self, delay: Duration) -> Hint<Payload> {
        crate::cue::timeout(self.platform(), delay)
    }

    /// An exchange with the configured default capacity.
    #[must_use]
    pub fn exchange(&self) -> Exchange<Payload> {
        Exchange::new(self.config().exchange_capacity)
    }

    /// An exchange with an explicit capacity.
    #[must_use]
    pub fn exchange_with(&self, capacity: usize) -> Exchange<Payload> {
        Exchange::new(capacity)
    }

    // ========================================================================
    // Gig and agent construction
    // ========================================================================

    pub(crate) fn play_on_id(
        &self,
        aid: AgentId,
        scenic: impl FnOnce(&Stagehand, Payload) -> Result<Box<dyn Scene>, Blooper> + 'static,
        params: Payload,
    ) -> Gig {
        self.spawn_gig(aid, Selector::Scenic(Box::new(scenic)), params)
    }

    pub(crate) fn play_named_on(&self, aid: AgentId, selector: &str, params: Payload) -> Gig {
        self.spawn_gig(aid, Selector::Named(selector.to_string()), params)
    }

    pub(crate) fn spawn_gig(&self, aid: AgentId, selector: Selector, params: Payload) -> Gig {
        let (gid, controller) = {
            let mut state = self.state();
            let idx = state.gigs.insert_with(|idx| {
                GigRecord::new(GigId::from_arena(idx), aid, selector, params)
            });
            let controller = state
                .gigs
                .get(idx)
                .expect("freshly inserted gig")
                .controller
                .clone();
            (GigId::from_arena(idx), controller)
        };
        Gig {
            theater: self.clone(),
            id: gid,
            controller,
        }
    }

    /// Casts an agent managed by `manager` and starts its debut gig.
    pub(crate) fn cast_on(&self, manager: AgentId, casting: Casting) -> Result<Agent, Blooper> {
        let (agent, debut) = self.cast_inert(manager, casting)?;
        debut.run();
        Ok(agent)
    }

    /// Casts an agent without starting its debut gig (the surprise path
    /// drives it synchronously during bootstrap).
    pub(crate) fn cast_inert(
        &self,
        manager: AgentId,
        casting: Casting,
    ) -> Result<(Agent, Gig), Blooper> {
        let (factory, params, guard) = casting.into_parts();
        let role: RoleCell = Rc::new(RefCell::new(factory()));
        let (aid, destiny) = {
            let mut state = self.state();
            if state.agents.get(manager.arena_index()).is_none() {
                return Err(Blooper::ghost().with_context("casting under a buried manager"));
            }
            let idx = state.agents.insert_with(|idx| {
                AgentRecord::new(AgentId::from_arena(idx), Some(manager), role)
            });
            let aid = AgentId::from_arena(idx);
            state
                .agents
                .get_mut(manager.arena_index())
                .expect("manager vanished")
                .team
                .push((aid, guard.unwrap_or_else(default_guard)));
            let destiny = state.agents.get(idx).expect("fresh agent").destiny.clone();
            (aid, destiny)
        };
        self.metrics().live_agents.increment();
        let debut = self.spawn_gig(aid, Selector::Debut, params.unwrap_or_else(unit));
        {
            let mut state = self.state();
            if let Some(agent) = state.agents.get_mut(aid.arena_index()) {
                agent.initializing = Some(debut.id());
            }
        }
        Ok((
            Agent {
                theater: self.clone(),
                id: aid,
                destiny,
            },
            debut,
        ))
    }

    /// Casts the root director: the only agent without a manager.
    fn cast_root(&self, casting: Casting) -> (Agent, Gig) {
        let (factory, params, _) = casting.into_parts();
        let role: RoleCell = Rc::new(RefCell::new(factory()));
        let (aid, destiny) = {
            let mut state = self.state();
            let idx = state
                .agents
                .insert_with(|idx| AgentRecord::new(AgentId::from_arena(idx), None, role));
            let aid = AgentId::from_arena(idx);
            let destiny = state.agents.get(idx).expect("fresh agent").destiny.clone();
            (aid, destiny)
        };
        self.metrics().live_agents.increment();
        let debut = self.spawn_gig(aid, Selector::Debut, params.unwrap_or_else(unit));
        {
            let mut state = self.state();
            if let Some(agent) = state.agents.get_mut(aid.arena_index()) {
                agent.initializing = Some(debut.id());
            }
        }
        (
            Agent {
                theater: self.clone(),
                id: aid,
                destiny,
            },
            debut,
        )
    }

    // ========================================================================
    // Supervision
    // ========================================================================

    /// Judges a failed gig: poison winds the agent down gracefully;
    /// anything else becomes an incident for the manager's guard.
    pub(crate) fn handle_failure(&self, gid: GigId, aid: AgentId, blooper: Blooper) {
        if blooper.is_poison() {
            debug!(agent = %aid, "poisoned; winding down");
            self.conclude_gig(gid, Signal::Prompt(payload(true)));
            self.suspend_tree(aid);
            self.post_burial(aid);
            return;
        }
        let (selector, parameters, judge) = {
            let state = self.state();
            let (selector, parameters) = state
                .gigs
                .get(gid.arena_index())
                .map_or((None, None), |gig| {
                    (gig.selector_label.clone(), gig.params.clone())
                });
            let judge = state
                .agents
                .get(aid.arena_index())
                .and_then(|agent| agent.manager)
                .and_then(|mid| state.agents.get(mid.arena_index()))
                .and_then(|manager| manager.guard_for(aid));
            (selector, parameters, judge)
        };
        let incident = Incident {
            offender: aid,
            blooper: blooper.clone(),
            selector,
            parameters,
        };
        let verdict = match judge {
            Some(guard) => guard(&incident),
            None => Verdict::Punish,
        };
        debug!(agent = %aid, verdict = ?verdict, "incident judged");
        self.conclude_gig(gid, Signal::Blooper(blooper.clone()));
        match verdict {
            Verdict::Forgive => {
                self.metrics().verdicts_forgive.increment();
            }
            Verdict::Punish => {
                self.metrics().verdicts_punish.increment();
                self.suspend_tree(aid);
                self.post_burial(aid);
            }
            Verdict::Escalate => {
                self.metrics().verdicts_escalate.increment();
                self.suspend_tree(aid);
                self.post_burial(aid);
                if let Some(mid) = self.manager_of(aid) {
                    // A fresh failure in the manager's own supervision scope.
                    let escalated = blooper;
                    let gig = self.play_on_id(
                        mid,
                        move |_, _| Ok(solo(move |_| Err(escalated))),
                        unit(),
                    );
                    gig.run();
                }
            }
            Verdict::Recast(casting) => {
                self.metrics().verdicts_recast.increment();
                self.suspend_tree(aid);
                if let Some(mid) = self.manager_of(aid) {
                    let theater = self.clone();
                    let gig = self.play_on_id(
                        mid,
                        move |_, _| {
                            Ok(solo(move |_| {
                                theater.revive(aid, casting)?;
                                Ok(payload(true))
                            }))
                        },
                        unit(),
                    );
                    gig.run();
                }
            }
        }
    }

    /// Suspends an agent and every transitive team member.
    pub(crate) fn suspend_tree(&self, root: AgentId) {
        let mut pending = vec![root];
        while let Some(aid) = pending.pop() {
            let touched = {
                let mut state = self.state();
                match state.agents.get_mut(aid.arena_index()) {
                    Some(agent) => {
                        agent.suspended = true;
                        pending.extend(agent.team.iter().map(|(id, _)| *id));
                        true
                    }
                    None => false,
                }
            };
            if touched {
                self.negotiate(aid);
            }
        }
    }

    /// Buries an agent: resets it, removes the record, detaches it from its
    /// manager's team, and seals its destiny. Returns false for agents that
    /// are already dead or immortal.
    pub(crate) fn bury(&self, aid: AgentId) -> bool {
        {
            let state = self.state();
            if state.agents.get(aid.arena_index()).is_none() {
                return false;
            }
            if [state.director, state.janitor, state.troupe].contains(&Some(aid)) {
                warn!(agent = %aid, "refusing to bury a house agent");
                return false;
            }
        }
        self.reset_agent(aid);
        let destiny = {
            let mut state = self.state();
            state.move_agent(aid, None);
            let Some(record) = state.agents.remove(aid.arena_index()) else {
                return false;
            };
            if let Some(mid) = record.manager {
                if let Some(manager) = state.agents.get_mut(mid.arena_index()) {
                    manager.team.retain(|(id, _)| *id != aid);
                }
            }
            record.destiny
        };
        self.metrics().live_agents.decrement();
        debug!(agent = %aid, "buried");
        destiny.seal(Signal::Prompt(payload(true)));
        true
    }

    /// The `#reset` protocol: stops every queued gig, buries every team
    /// member, and disposes the role fire-and-forget on the janitor.
    pub(crate) fn reset_agent(&self, aid: AgentId) {
        let doomed: Vec<GigId> = {
            let mut state = self.state();
            let state = &mut *state;
            let Some(agent) = state.agents.get_mut(aid.arena_index()) else {
                return;
            };
            agent.initializing = None;
            let mut doomed = Vec::new();
            for idx in agent.workload.clear(&mut state.gigs) {
                doomed.push(GigId::from_arena(idx));
            }
            for idx in agent.agenda.clear(&mut state.gigs) {
                doomed.push(GigId::from_arena(idx));
            }
            for idx in agent.postponed.clear(&mut state.gigs) {
                doomed.push(GigId::from_arena(idx));
            }
            doomed
        };
        for gid in doomed {
            self.metrics().gigs_stopped.increment();
            self.conclude_gig(gid, Signal::Blooper(Blooper::stopped("agent reset")));
        }
        let team: Vec<AgentId> = {
            let state = self.state();
            state
                .agents
                .get(aid.arena_index())
                .map_or_else(Vec::new, |agent| {
                    agent.team.iter().map(|(id, _)| *id).collect()
                })
        };
        for member in team {
            self.bury(member);
        }
        let disposed = {
            let mut state = self.state();
            state
                .agents
                .get_mut(aid.arena_index())
                .and_then(|agent| agent.role.take())
        };
        if let Some(cell) = disposed {
            let gig = self.spawn_gig(self.janitor_id(), Selector::Dispose(cell), unit());
            gig.run();
        }
        self.negotiate(aid);
    }

    /// Revives a reset agent with a fresh role (the recast path). The
    /// agent's descendants die; the agent itself debuts again.
    pub(crate) fn revive(&self, aid: AgentId, casting: Casting) -> Result<(), Blooper> {
        self.reset_agent(aid);
        let (factory, params, guard) = casting.into_parts();
        let role: RoleCell = Rc::new(RefCell::new(factory()));
        {
            let mut state = self.state();
            let Some(agent) = state.agents.get_mut(aid.arena_index()) else {
                return Err(Blooper::ghost().with_context("reviving a buried agent"));
            };
            agent.suspended = false;
            agent.role = Some(role);
            let manager = agent.manager;
            if let (Some(guard), Some(mid)) = (guard, manager) {
                if let Some(manager) = state.agents.get_mut(mid.arena_index()) {
                    for entry in &mut manager.team {
                        if entry.0 == aid {
                            entry.1 = guard.clone();
                        }
                    }
                }
            }
        }
        let debut = self.spawn_gig(aid, Selector::Debut, params.unwrap_or_else(unit));
        {
            let mut state = self.state();
            if let Some(agent) = state.agents.get_mut(aid.arena_index()) {
                agent.initializing = Some(debut.id());
            }
        }
        debut.run();
        Ok(())
    }

    /// Posts the burial of `target` as a fresh gig on its manager (the
    /// janitor stands in for the unmanaged director).
    fn post_burial(&self, target: AgentId) {
        let host = self.manager_of(target).unwrap_or_else(|| self.janitor_id());
        let theater = self.clone();
        let gig = self.play_on_id(
            host,
            move |_, _| {
                Ok(solo(move |_| {
                    theater.bury(target);
                    Ok(payload(true))
                }))
            },
            unit(),
        );
        gig.run();
    }

    /// Forks the janitor helper gig bridging a gig's completion to a
    /// standard foreign promise: the helper commits to the completion
    /// destiny, records the signal in the shared slot, and wakes the
    /// promise's latest waker.
    pub(crate) fn fork_fate_bridge(
        &self,
        completion: &Destiny<Payload>,
        shared: Rc<RefCell<FateShared>>,
    ) {
        let completion = completion.clone();
        let bridge = self.play_on_id(
            self.janitor_id(),
            move |_, _| {
                Ok(stepper(move |take, signal| match take {
                    0 => Ok(Step::Yield(Hint::from(completion.autocue()))),
                    _ => {
                        let waker = {
                            let mut shared = shared.borrow_mut();
                            shared.fate = Some(signal);
                            shared.waker.take()
                        };
                        if let Some(waker) = waker {
                            waker.wake();
                        }
                        Ok(Step::Return(payload(true)))
                    }
                }))
            },
            unit(),
        );
        bridge.run();
    }

    /// Builds the janitor gig behind [`Agent::kill`].
    pub(crate) fn burial_gig(&self, target: AgentId) -> Gig {
        let theater = self.clone();
        self.play_on_id(
            self.janitor_id(),
            move |_, _| {
                Ok(solo(move |_| {
                    theater.bury(target);
                    Ok(payload(true))
                }))
            },
            unit(),
        )
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub(crate) fn manager_of(&self, aid: AgentId) -> Option<AgentId> {
        self.state()
            .agents
            .get(aid.arena_index())
            .and_then(|agent| agent.manager)
    }

    pub(crate) fn janitor_id(&self) -> AgentId {
        self.state().janitor.expect("theater not bootstrapped")
    }

    pub(crate) fn troupe_id(&self) -> AgentId {
        self.state().troupe.expect("theater not bootstrapped")
    }

    /// Fails unless the agent's gig is on stage right now; the stagehand
    /// casting helpers are only valid while showing.
    pub(crate) fn ensure_showing(&self, aid: AgentId) -> Result<(), Blooper> {
        let showing = self
            .state()
            .agents
            .get(aid.arena_index())
            .is_some_and(|agent| agent.showing.is_some());
        if showing {
            Ok(())
        } else {
            Err(Blooper::protocol("scene helper used off-stage"))
        }
    }
}
