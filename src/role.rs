//! Roles, the scene registry, and castings.
//!
//! A role is the transient object encapsulating an agent's current
//! behaviour. Its playable scenes are *marked*: they appear in the role's
//! static scene table, built with the [`scene_table!`](crate::scene_table)
//! registration macro. Selector dispatch matches by name against the table
//! and falls back to [`Role::improvise_scene`].
//!
//! Scene factories receive a [`Stagehand`]: the handle through which a
//! scene reaches its own role state, plays further scenes, and casts
//! children. The casting helpers are valid only while the owning agent is
//! on stage.

use crate::error::Blooper;
use crate::scene::Scene;
use crate::theater::Theater;
use crate::types::{AgentId, Guard, Incident, Payload, Verdict};
use core::fmt;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared ownership of a role instance.
///
/// The cell is the agent's identity anchor: recasting replaces the boxed
/// role behind it without disturbing scenes already holding the handle.
pub(crate) type RoleCell = Rc<RefCell<Box<dyn Role>>>;

/// Builds a scene from a marked entry.
pub type SceneFactory = fn(&Stagehand, Payload) -> Result<Box<dyn Scene>, Blooper>;

/// One marked scene in a role's table.
#[derive(Clone, Copy)]
pub struct SceneEntry {
    /// The selector this scene answers to.
    pub name: &'static str,
    /// The factory constructing the scene coroutine.
    pub build: SceneFactory,
}

impl fmt::Debug for SceneEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SceneEntry({})", self.name)
    }
}

/// The transient behaviour of an agent.
///
/// `as_any`/`as_any_mut` let scene factories recover the concrete role
/// through [`Stagehand::with_role`].
pub trait Role: Any {
    /// Upcasts to `Any` for downcasting in scene factories.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast to `Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// The marked scenes this role exposes.
    fn scene_table(&self) -> &'static [SceneEntry] {
        &[]
    }

    /// Builds a scene for a selector missing from the table.
    ///
    /// The default declines, which surfaces an unknown-scene blooper.
    fn improvise_scene(
        &self,
        stagehand: &Stagehand,
        selector: &str,
        params: Payload,
    ) -> Result<Box<dyn Scene>, Blooper> {
        let _ = (stagehand, params);
        Err(Blooper::new(crate::error::BlooperKind::UnknownScene)
            .with_context(selector.to_string()))
    }

    /// The initialisation scene, run before any other gig is admitted.
    fn debut_scene(&self, stagehand: &Stagehand) -> Option<Box<dyn Scene>> {
        let _ = stagehand;
        None
    }

    /// The disposal scene, run fire-and-forget on the janitor during reset.
    fn dispose_scene(&self, stagehand: &Stagehand) -> Option<Box<dyn Scene>> {
        let _ = stagehand;
        None
    }
}

/// Registers marked scenes for a role.
///
/// Each entry maps a selector name to an associated function of the role
/// with the [`SceneFactory`] signature:
///
/// ```rust,ignore
/// impl Role for Counter {
///     fn scene_table(&self) -> &'static [SceneEntry] {
///         scene_table! {
///             "add" => Counter::add_scene,
///             "get" => Counter::get_scene,
///         }
///     }
///     // ...
/// }
/// ```
#[macro_export]
macro_rules! scene_table {
    ($($name:literal => $factory:path),* $(,)?) => {
        &[
            $($crate::role::SceneEntry {
                name: $name,
                build: $factory,
            }),*
        ]
    };
}

/// The handle a scene works through: its theater, agent, and role state.
#[derive(Clone)]
pub struct Stagehand {
    pub(crate) theater: Theater,
    pub(crate) agent: AgentId,
    pub(crate) role: RoleCell,
}

impl fmt::Debug for Stagehand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stagehand({})", self.agent)
    }
}

impl Stagehand {
    /// Returns the owning agent's id.
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.agent
    }

    /// Returns the theater.
    #[must_use]
    pub fn theater(&self) -> &Theater {
        &self.theater
    }

    /// Runs `body` against the concrete role instance.
    ///
    /// Fails with a protocol blooper if the role is not an `R` (the agent
    /// may have been recast since the scene was created).
    pub fn with_role<R: Role, T>(&self, body: impl FnOnce(&mut R) -> T) -> Result<T, Blooper> {
        let mut role = self.role.borrow_mut();
        match role.as_any_mut().downcast_mut::<R>() {
            Some(role) => Ok(body(role)),
            None => Err(Blooper::protocol("role is no longer the expected type")),
        }
    }

    /// Posts a named scene on the owning agent.
    ///
    /// Valid only while the agent is on stage.
    pub fn play_scene(&self, selector: &str, params: Payload) -> Result<crate::Gig, Blooper> {
        self.theater.ensure_showing(self.agent)?;
        let gig = self.theater.play_named_on(self.agent, selector, params);
        gig.run();
        Ok(gig)
    }

    /// Casts a child agent managed by the owning agent.
    ///
    /// Valid only while the agent is on stage.
    pub fn cast_child(&self, casting: Casting) -> Result<crate::Agent, Blooper> {
        self.theater.ensure_showing(self.agent)?;
        self.theater.cast_on(self.agent, casting)
    }
}

/// The recipe for an agent: role factory, debut parameters, guard.
pub struct Casting {
    role: Box<dyn FnOnce() -> Box<dyn Role>>,
    params: Option<Payload>,
    guard: Option<Guard>,
}

impl fmt::Debug for Casting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Casting(..)")
    }
}

impl Casting {
    /// Starts a casting from a role factory.
    #[must_use]
    pub fn new(role: impl FnOnce() -> Box<dyn Role> + 'static) -> Self {
        Self {
            role: Box::new(role),
            params: None,
            guard: None,
        }
    }

    /// Sets the parameters handed to the debut scene.
    #[must_use]
    pub fn with_params(mut self, params: Payload) -> Self {
        self.params = Some(params);
        self
    }

    /// Sets the guard judging this agent's failures.
    #[must_use]
    pub fn with_guard(mut self, guard: impl Fn(&Incident) -> Verdict + 'static) -> Self {
        self.guard = Some(Rc::new(guard));
        self
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Box<dyn FnOnce() -> Box<dyn Role>>,
        Option<Payload>,
        Option<Guard>,
    ) {
        (self.role, self.params, self.guard)
    }
}

/// The built-in role of the immortal house agents (director, janitor,
/// troupe). No marked scenes; everything they run arrives as free scenes.
pub(crate) struct HouseRole;

impl Role for HouseRole {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
