//! The stage: global scheduler state and the interrupt-driven performance
//! loop.
//!
//! All process-wide state lives in [`StageState`] inside the theater: both
//! arenas, the exclusive statuses, the currently handled interrupt, the
//! `will_entertain` debounce flag, and the portals table. Everything is
//! mutated only from inside an interrupt handler or a public entry point;
//! the runtime is single-threaded, interrupts never nest, so no locking
//! exists anywhere on these paths.
//!
//! # Dispatch classes
//!
//! | Class | Delivery | Budget |
//! |---|---|---|
//! | immediate | synchronous | 4 ms |
//! | fast | microtask | 6 ms |
//! | normal | macrotask | 10 ms |
//!
//! An interrupt grants the stage to one gig at a time: the first workload
//! gig of the first ready agent, repeating until the budget runs out or no
//! agent is ready. Leftover readiness arms a normal interrupt on exit.

use crate::agent::{AgentRecord, AgentStatus};
use crate::config::StageConfig;
use crate::cue::{Cue, Hint};
use crate::error::Blooper;
use crate::gig::{GigRecord, GigStatus, Selector};
use crate::role::Stagehand;
use crate::scene::{solo, Scene, Step};
use crate::status::{Stationed, StatusList};
use crate::theater::Theater;
use crate::tracing_compat::{debug, trace};
use crate::types::{unit, AgentId, GigId, Payload, PortalKey, Signal};
use crate::util::Arena;
use std::collections::HashMap;
use std::task::{Context, Poll};
use std::time::Duration;

/// The priority class of an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Synchronous; the surprise path.
    Immediate,
    /// Microtask.
    Fast,
    /// Macrotask.
    Normal,
}

impl Dispatch {
    pub(crate) fn budget(self, config: &StageConfig) -> Duration {
        match self {
            Self::Immediate => config.immediate_budget,
            Self::Fast => config.fast_budget,
            Self::Normal => config.normal_budget,
        }
    }
}

/// A foreign promise being bridged into a leaf cue.
pub(crate) struct Portal {
    pub(crate) future: crate::cue::ForeignFuture<Payload>,
    pub(crate) cue: Cue<Payload>,
}

/// The process-wide scheduler state.
pub(crate) struct StageState {
    pub(crate) agents: Arena<AgentRecord>,
    pub(crate) gigs: Arena<GigRecord>,
    pub(crate) ready: StatusList<AgentStatus>,
    pub(crate) waiting: StatusList<AgentStatus>,
    pub(crate) idle: StatusList<AgentStatus>,
    pub(crate) suspended: StatusList<AgentStatus>,
    pub(crate) busy: StatusList<AgentStatus>,
    pub(crate) active: StatusList<GigStatus>,
    pub(crate) handling: Option<Dispatch>,
    pub(crate) will_entertain: Option<Dispatch>,
    pub(crate) portals: HashMap<u64, Portal>,
    pub(crate) next_portal: u64,
    pub(crate) director: Option<AgentId>,
    pub(crate) janitor: Option<AgentId>,
    pub(crate) troupe: Option<AgentId>,
}

impl StageState {
    pub(crate) fn new() -> Self {
        Self {
            agents: Arena::new(),
            gigs: Arena::new(),
            ready: StatusList::new("ready", AgentStatus::Ready),
            waiting: StatusList::new("waiting", AgentStatus::Waiting),
            idle: StatusList::new("idle", AgentStatus::Idle),
            suspended: StatusList::new("suspended", AgentStatus::Suspended),
            busy: StatusList::new("busy", AgentStatus::Busy),
            active: StatusList::new("active", GigStatus::Active),
            handling: None,
            will_entertain: None,
            portals: HashMap::new(),
            next_portal: 0,
            director: None,
            janitor: None,
            troupe: None,
        }
    }

    /// Moves an agent to the target status, unlinking from its current one.
    /// `None` unlinks only.
    pub(crate) fn move_agent(&mut self, aid: AgentId, target: Option<AgentStatus>) {
        let idx = aid.arena_index();
        let current = match self.agents.get(idx) {
            Some(agent) => agent.links().status(),
            None => return,
        };
        if current == target {
            return;
        }
        match current {
            Some(AgentStatus::Ready) => self.ready.delete(idx, &mut self.agents),
            Some(AgentStatus::Waiting) => self.waiting.delete(idx, &mut self.agents),
            Some(AgentStatus::Idle) => self.idle.delete(idx, &mut self.agents),
            Some(AgentStatus::Suspended) => self.suspended.delete(idx, &mut self.agents),
            Some(AgentStatus::Busy) => self.busy.delete(idx, &mut self.agents),
            None => {}
        }
        match target {
            Some(AgentStatus::Ready) => self.ready.add(idx, &mut self.agents),
            Some(AgentStatus::Waiting) => self.waiting.add(idx, &mut self.agents),
            Some(AgentStatus::Idle) => self.idle.add(idx, &mut self.agents),
            Some(AgentStatus::Suspended) => self.suspended.add(idx, &mut self.agents),
            Some(AgentStatus::Busy) => self.busy.add(idx, &mut self.agents),
            None => {}
        }
    }

    /// Unlinks a gig from whatever status it is stationed in.
    pub(crate) fn unlink_gig(&mut self, gid: GigId) {
        let idx = gid.arena_index();
        let (tag, owner) = match self.gigs.get(idx) {
            Some(gig) => (gig.links().status(), gig.agent),
            None => return,
        };
        let Some(tag) = tag else { return };
        if tag == GigStatus::Active {
            self.active.delete(idx, &mut self.gigs);
            return;
        }
        let owner = owner.expect("queued gig without an agent");
        let agent = self
            .agents
            .get_mut(owner.arena_index())
            .expect("queued gig on a buried agent");
        match tag {
            GigStatus::Workload => agent.workload.delete(idx, &mut self.gigs),
            GigStatus::Agenda => agent.agenda.delete(idx, &mut self.gigs),
            GigStatus::Postponed => agent.postponed.delete(idx, &mut self.gigs),
            GigStatus::Active => unreachable!(),
        }
    }

    /// Moves a gig into the target status.
    pub(crate) fn station_gig(&mut self, gid: GigId, target: GigStatus) {
        self.unlink_gig(gid);
        let idx = gid.arena_index();
        if target == GigStatus::Active {
            self.active.add(idx, &mut self.gigs);
            return;
        }
        let owner = self
            .gigs
            .get(idx)
            .and_then(|gig| gig.agent)
            .expect("stationing a gig without an agent");
        let agent = self
            .agents
            .get_mut(owner.arena_index())
            .expect("stationing a gig on a buried agent");
        match target {
            GigStatus::Workload => agent.workload.add(idx, &mut self.gigs),
            GigStatus::Agenda => agent.agenda.add(idx, &mut self.gigs),
            GigStatus::Postponed => agent.postponed.add(idx, &mut self.gigs),
            GigStatus::Active => unreachable!(),
        }
    }
}

impl Theater {
    /// Recomputes an agent's status after any queue or flag change, and
    /// requests entertainment if someone is ready with no interrupt armed.
    pub(crate) fn negotiate(&self, aid: AgentId) {
        let arm = {
            let mut state = self.state();
            let Some(agent) = state.agents.get(aid.arena_index()) else {
                return;
            };
            let target = if agent.suspended {
                AgentStatus::Suspended
            } else if agent.showing.is_some() {
                AgentStatus::Busy
            } else if !agent.workload.is_empty() {
                AgentStatus::Ready
            } else if !agent.agenda.is_empty() {
                AgentStatus::Waiting
            } else {
                AgentStatus::Idle
            };
            state.move_agent(aid, Some(target));
            state.handling.is_none()
                && state.will_entertain.is_none()
                && !state.ready.is_empty()
        };
        if arm {
            self.arm_interrupt(Dispatch::Fast);
        }
    }

    /// Arms an interrupt on the platform's matching queue.
    pub(crate) fn arm_interrupt(&self, dispatch: Dispatch) {
        {
            let mut state = self.state();
            if state.will_entertain.is_some() {
                return;
            }
            state.will_entertain = Some(dispatch);
        }
        trace!(?dispatch, "interrupt armed");
        let weak = self.downgrade();
        let thunk = Box::new(move || {
            if let Some(theater) = weak.upgrade() {
                theater.on_interrupt(dispatch);
            }
        });
        match dispatch {
            Dispatch::Fast => self.platform().post_fast(thunk),
            Dispatch::Normal => self.platform().post_normal(thunk),
            Dispatch::Immediate => unreachable!("immediate interrupts run synchronously"),
        }
    }

    fn on_interrupt(&self, dispatch: Dispatch) {
        {
            let mut state = self.state();
            if state.will_entertain == Some(dispatch) {
                state.will_entertain = None;
            }
        }
        self.entertain(dispatch);
    }

    /// Handles one interrupt: grants the stage to ready agents' gigs until
    /// the budget runs out or nobody is ready.
    pub(crate) fn entertain(&self, dispatch: Dispatch) {
        {
            let mut state = self.state();
            assert!(state.handling.is_none(), "interrupts must not nest");
            state.handling = Some(dispatch);
        }
        let metrics = self.metrics();
        match dispatch {
            Dispatch::Immediate => metrics.interrupts_immediate.increment(),
            Dispatch::Fast => metrics.interrupts_fast.increment(),
            Dispatch::Normal => metrics.interrupts_normal.increment(),
        }
        self.pump_portals();
        let deadline = self.platform().now() + dispatch.budget(self.config());
        loop {
            if self.platform().now() >= deadline {
                trace!(?dispatch, "interrupt budget exhausted");
                break;
            }
            let next = {
                let state = self.state();
                state.ready.first().map(|aidx| {
                    let agent = state.agents.get(aidx).expect("ready agent vanished");
                    let gidx = agent
                        .workload
                        .first()
                        .expect("ready agent with an empty workload");
                    GigId::from_arena(gidx)
                })
            };
            match next {
                Some(gig) => self.take_stage(gig),
                None => break,
            }
        }
        let arm = {
            let mut state = self.state();
            state.handling = None;
            !state.ready.is_empty() && state.will_entertain.is_none()
        };
        if arm {
            self.arm_interrupt(Dispatch::Normal);
        }
    }

    /// Performs one step of one gig.
    pub(crate) fn take_stage(&self, gid: GigId) {
        // Admission: the gig must still be queued and its agent employable.
        let aid = {
            let mut state = self.state();
            let Some(gig) = state.gigs.get(gid.arena_index()) else {
                return;
            };
            if gig.links().status() != Some(GigStatus::Workload) {
                return;
            }
            let aid = gig.agent.expect("queued gig without an agent");
            let Some(agent) = state.agents.get(aid.arena_index()) else {
                return;
            };
            if agent.suspended {
                return;
            }
            assert!(
                state.active.is_empty() && state.busy.is_empty(),
                "the stage must be empty"
            );
            state.station_gig(gid, GigStatus::Active);
            state.move_agent(aid, Some(AgentStatus::Busy));
            state
                .agents
                .get_mut(aid.arena_index())
                .expect("busy agent vanished")
                .showing = Some(gid);
            aid
        };
        trace!(gig = %gid, agent = %aid, "taking stage");

        // Lazy scene creation on the first take.
        let needs_scene = {
            let state = self.state();
            state
                .gigs
                .get(gid.arena_index())
                .is_some_and(|gig| gig.scene.is_none())
        };
        if needs_scene {
            let (selector, params, stagehand) = {
                let mut state = self.state();
                let gig = state
                    .gigs
                    .get_mut(gid.arena_index())
                    .expect("staged gig vanished");
                let selector = gig.selector.take().expect("gig without scene or selector");
                let params = gig.params.clone().unwrap_or_else(unit);
                let role = match &selector {
                    Selector::Dispose(cell) => std::rc::Rc::clone(cell),
                    _ => state
                        .agents
                        .get(aid.arena_index())
                        .and_then(|agent| agent.role.clone())
                        .expect("agent without a role"),
                };
                (
                    selector,
                    params,
                    Stagehand {
                        theater: self.clone(),
                        agent: aid,
                        role,
                    },
                )
            };
            match create_scene(&stagehand, selector, params) {
                Ok(scene) => {
                    let mut state = self.state();
                    match state.gigs.get_mut(gid.arena_index()) {
                        Some(gig) => gig.scene = Some(scene),
                        None => {
                            drop(state);
                            self.negotiate(aid);
                            return;
                        }
                    }
                }
                Err(blooper) => {
                    self.vacate_stage(gid, aid);
                    self.handle_failure(gid, aid, blooper);
                    return;
                }
            }
        }

        // Consume the progress signal and advance the coroutine.
        let (signal, mut scene) = {
            let mut state = self.state();
            let gig = state
                .gigs
                .get_mut(gid.arena_index())
                .expect("staged gig vanished");
            (
                gig.progress.take().unwrap_or_else(|| Signal::Prompt(unit())),
                gig.scene.take().expect("staged gig without a scene"),
            )
        };
        self.metrics().scene_steps.increment();
        let result = scene.step(signal);

        if self.state().gigs.get(gid.arena_index()).is_none() {
            // Stopped from inside its own step.
            self.negotiate(aid);
            return;
        }

        match result {
            Ok(Step::Return(value)) => {
                drop(scene);
                self.vacate_stage(gid, aid);
                self.conclude_gig(gid, Signal::Prompt(value));
            }
            Ok(Step::Yield(hint)) => {
                {
                    let mut state = self.state();
                    state
                        .gigs
                        .get_mut(gid.arena_index())
                        .expect("staged gig vanished")
                        .scene = Some(scene);
                }
                let hint = self.adopt_hint(hint);
                let theater = self.clone();
                let rollback =
                    crate::cue::commit(hint, move |signal| theater.gig_progress(gid, signal));
                let mut state = self.state();
                if state.gigs.get(gid.arena_index()).is_none() {
                    // Stopped while the commitment was being staged.
                    drop(state);
                    if let Some(rollback) = rollback {
                        rollback.cancel();
                    }
                    self.negotiate(aid);
                    return;
                }
                state.unlink_gig(gid);
                if let Some(agent) = state.agents.get_mut(aid.arena_index()) {
                    if agent.showing == Some(gid) {
                        agent.showing = None;
                    }
                }
                let progressed = state
                    .gigs
                    .get(gid.arena_index())
                    .expect("staged gig vanished")
                    .progress
                    .is_some();
                if progressed {
                    // The commitment fired during staging.
                    debug_assert!(rollback.is_none(), "synchronous commit kept a rollback");
                    state.station_gig(gid, GigStatus::Workload);
                } else {
                    let rollback = rollback.expect("pending commitment without a rollback");
                    state
                        .gigs
                        .get_mut(gid.arena_index())
                        .expect("staged gig vanished")
                        .rollback = Some(rollback);
                    state.station_gig(gid, GigStatus::Agenda);
                }
                drop(state);
                self.negotiate(aid);
            }
            Err(blooper) => {
                drop(scene);
                self.vacate_stage(gid, aid);
                self.handle_failure(gid, aid, blooper);
            }
        }
    }

    /// Clears the stage references of a gig that is leaving it.
    pub(crate) fn vacate_stage(&self, gid: GigId, aid: AgentId) {
        let mut state = self.state();
        state.unlink_gig(gid);
        if let Some(agent) = state.agents.get_mut(aid.arena_index()) {
            if agent.showing == Some(gid) {
                agent.showing = None;
            }
        }
    }

    /// Delivers the signal of a resolved commitment to its gig.
    pub(crate) fn gig_progress(&self, gid: GigId, signal: Signal<Payload>) {
        let owner = {
            let mut state = self.state();
            let Some(gig) = state.gigs.get_mut(gid.arena_index()) else {
                return;
            };
            gig.progress = Some(signal);
            gig.rollback = None;
            let owner = gig.agent;
            if gig.links().status() == Some(GigStatus::Agenda) {
                state.station_gig(gid, GigStatus::Workload);
            }
            owner
        };
        if let Some(aid) = owner {
            self.negotiate(aid);
        }
    }

    /// Finishes a gig with its fate. Exactly once; the record is removed
    /// and the fate is published through the controller destiny.
    pub(crate) fn conclude_gig(&self, gid: GigId, signal: Signal<Payload>) {
        let (destiny, rollback, owner) = {
            let mut state = self.state();
            let state = &mut *state;
            if state.gigs.get(gid.arena_index()).is_none() {
                return;
            }
            state.unlink_gig(gid);
            let record = state
                .gigs
                .remove(gid.arena_index())
                .expect("gig vanished mid-conclusion");
            let owner = record.agent;
            if let Some(aid) = owner {
                if let Some(agent) = state.agents.get_mut(aid.arena_index()) {
                    if agent.showing == Some(gid) {
                        agent.showing = None;
                    }
                    if agent.initializing == Some(gid) {
                        // Initialisation done: admit the postponed gigs.
                        agent.initializing = None;
                        let parked = agent.postponed.clear(&mut state.gigs);
                        for idx in parked {
                            agent.workload.add(idx, &mut state.gigs);
                        }
                    }
                }
            }
            (record.controller, record.rollback, owner)
        };
        match &signal {
            Signal::Prompt(_) => self.metrics().gigs_prompted.increment(),
            Signal::Blooper(_) => self.metrics().gigs_bloopered.increment(),
        }
        debug!(gig = %gid, prompt = signal.is_prompt(), "gig concluded");
        if let Some(rollback) = rollback {
            rollback.cancel();
        }
        destiny.seal(signal);
        if let Some(aid) = owner {
            self.negotiate(aid);
        }
    }

    /// Starts an inert gig. No-op otherwise.
    pub(crate) fn start_gig(&self, gid: GigId) {
        let inert = {
            let state = self.state();
            state
                .gigs
                .get(gid.arena_index())
                .is_some_and(GigRecord::is_inert)
        };
        if inert {
            self.post_gig(gid);
        }
    }

    /// Stops a running or anticipated gig with a stop blooper, rolling back
    /// its pending commitment. No-op on inert and finished gigs.
    pub(crate) fn stop_gig(&self, gid: GigId, reason: &str) {
        let stoppable = {
            let state = self.state();
            state
                .gigs
                .get(gid.arena_index())
                .is_some_and(|gig| !gig.is_inert())
        };
        if !stoppable {
            return;
        }
        self.metrics().gigs_stopped.increment();
        self.conclude_gig(gid, Signal::Blooper(Blooper::stopped(reason)));
    }

    /// Applies the posting discipline: postponed while initialising, agenda
    /// while a commitment is pending, workload otherwise.
    pub(crate) fn post_gig(&self, gid: GigId) {
        let queued = {
            let mut state = self.state();
            let Some(gig) = state.gigs.get(gid.arena_index()) else {
                return;
            };
            let aid = gig.agent.expect("posting a gig without an agent");
            let committed = gig.rollback.is_some();
            match state.agents.get(aid.arena_index()) {
                None => None,
                Some(agent) => {
                    let target = if agent.initializing.is_some()
                        && agent.initializing != Some(gid)
                    {
                        GigStatus::Postponed
                    } else if committed {
                        GigStatus::Agenda
                    } else {
                        GigStatus::Workload
                    };
                    state.station_gig(gid, target);
                    Some(aid)
                }
            }
        };
        match queued {
            Some(aid) => self.negotiate(aid),
            None => {
                // The agent is buried: the gig stops with a ghost blooper.
                self.conclude_gig(gid, Signal::Blooper(Blooper::ghost()));
            }
        }
    }

    /// Polls every woken portal, revealing the bridging cues of completed
    /// foreign promises. Returns true if any portal completed.
    pub(crate) fn pump_portals(&self) -> bool {
        let dock = self.platform().dock();
        let keys = dock.drain();
        if keys.is_empty() {
            return false;
        }
        let mut progressed = false;
        for key in keys {
            let portal = { self.state().portals.remove(&key.raw()) };
            let Some(mut portal) = portal else { continue };
            let waker = dock.waker(key);
            let mut cx = Context::from_waker(&waker);
            match portal.future.as_mut().poll(&mut cx) {
                Poll::Ready(signal) => {
                    progressed = true;
                    portal.cue.try_reveal(signal);
                }
                Poll::Pending => {
                    self.state().portals.insert(key.raw(), portal);
                }
            }
        }
        progressed
    }

    /// Converts a foreign hint into a bridged leaf cue through the portals
    /// table; other hints pass through unchanged.
    pub(crate) fn adopt_hint(&self, hint: Hint<Payload>) -> Hint<Payload> {
        let future = match hint.into_foreign() {
            Err(hint) => return hint,
            Ok(future) => future,
        };
        let mut future = future;
        let dock = self.platform().dock();
        let key = {
            let mut state = self.state();
            let key = PortalKey::from_raw(state.next_portal);
            state.next_portal += 1;
            key
        };
        let waker = dock.waker(key);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(signal) => crate::cue::spark(signal),
            Poll::Pending => {
                let weak = self.downgrade();
                let cue: Cue<Payload> = Cue::with_end(
                    |_| {},
                    move |revealing, _| {
                        if !revealing {
                            if let Some(theater) = weak.upgrade() {
                                theater.state().portals.remove(&key.raw());
                            }
                        }
                    },
                );
                self.state().portals.insert(
                    key.raw(),
                    Portal {
                        future,
                        cue: cue.clone(),
                    },
                );
                Hint::from(cue)
            }
        }
    }

    /// Drives one inert gig through a synchronous immediate interrupt.
    ///
    /// Requires a closed stage, an inert gig, and an employable agent; the
    /// scene must finish in a single step.
    pub(crate) fn surprise_drive(&self, gid: GigId) -> Result<Payload, Blooper> {
        let destiny = {
            let state = self.state();
            if state.handling.is_some() {
                return Err(Blooper::protocol("surprise requires a closed stage"));
            }
            let Some(gig) = state.gigs.get(gid.arena_index()) else {
                return Err(Blooper::protocol("surprise on a finished gig"));
            };
            if !gig.is_inert() {
                return Err(Blooper::protocol("surprise requires an inert gig"));
            }
            let aid = gig.agent.expect("inert gig without an agent");
            let Some(agent) = state.agents.get(aid.arena_index()) else {
                return Err(Blooper::ghost().with_context("surprise on a buried agent"));
            };
            if agent.suspended {
                return Err(Blooper::protocol("surprise on a suspended agent"));
            }
            gig.controller.clone()
        };
        {
            let mut state = self.state();
            state.handling = Some(Dispatch::Immediate);
            state.station_gig(gid, GigStatus::Workload);
        }
        self.metrics().interrupts_immediate.increment();
        self.take_stage(gid);
        let arm = {
            let mut state = self.state();
            state.handling = None;
            !state.ready.is_empty() && state.will_entertain.is_none()
        };
        if arm {
            self.arm_interrupt(Dispatch::Normal);
        }
        match destiny.fate() {
            Some(signal) => signal.into_result(),
            None => {
                self.stop_gig(gid, "surprise scene did not finish in one step");
                Err(Blooper::protocol("surprise scene must finish in a single step"))
            }
        }
    }
}

/// Builds a gig's scene from its selector.
///
/// A callable selector is applied with the role bound through the
/// stagehand; a name is looked up among the role's marked scenes and falls
/// back to improvisation; debut and dispose use the role's lifecycle
/// scenes, defaulting to a single empty step.
fn create_scene(
    stagehand: &Stagehand,
    selector: Selector,
    params: Payload,
) -> Result<Box<dyn Scene>, Blooper> {
    match selector {
        Selector::Scenic(build) => build(stagehand, params),
        Selector::Named(name) => {
            let table = stagehand.role.borrow().scene_table();
            match table.iter().find(|entry| entry.name == name) {
                Some(entry) => (entry.build)(stagehand, params),
                None => stagehand
                    .role
                    .borrow()
                    .improvise_scene(stagehand, &name, params),
            }
        }
        Selector::Debut => Ok(stagehand
            .role
            .borrow()
            .debut_scene(stagehand)
            .unwrap_or_else(|| solo(|_| Ok(unit())))),
        Selector::Dispose(cell) => Ok(cell
            .borrow()
            .dispose_scene(stagehand)
            .unwrap_or_else(|| solo(|_| Ok(unit())))),
    }
}
