//! Stagecraft: a cooperative actor theater over a one-shot asynchronous cue engine.
//!
//! # Overview
//!
//! Stagecraft answers one question: how does work get scheduled, isolated,
//! cancelled, and recovered from failure in a single-threaded cooperative
//! runtime? It is built from two tightly coupled engines:
//!
//! - **Theater**: agents (actors) own a role, run scene coroutines one gig at
//!   a time, and sit in a supervision tree where each failure is judged by the
//!   manager's guard. A budget-limited stage scheduler drives at most one gig
//!   at any moment.
//! - **Future**: cues (one-shot events with an explicit `begin`/`end`
//!   lifecycle), teleprompters (restartable cue factories), and exchanges
//!   (bounded rendezvous buffers) form the cancellation and synchronisation
//!   substrate the theater yields into. Every asynchronous wait is a
//!   commitment that returns a rollback.
//!
//! # Core Guarantees
//!
//! - **One gig on stage**: gigs never run concurrently; suspension points are
//!   exactly the `yield hint` boundaries inside scenes.
//! - **Cancel-correctness**: stopping a gig rolls back its pending commitment,
//!   cancelling the whole cue tree top-down; every leaf's `end(false, _)` runs
//!   exactly once.
//! - **Supervision never hides a blooper**: the failing gig always receives
//!   its blooper; the verdict only affects the offender and its team.
//! - **Deterministic testing**: the lab platform runs the stage on virtual
//!   time with FIFO microtask/macrotask queues.
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, signals, payloads, verdicts, virtual time
//! - [`error`]: the [`Blooper`] failure value
//! - [`cue`]: the one-shot asynchronous event engine
//! - [`exchange`]: bounded producer/consumer buffers
//! - [`scene`]: the coroutine contract scenes implement
//! - [`role`]: roles, the scene registry, and castings
//! - [`theater`]: agents, gigs, the stage scheduler, and the public surface
//! - [`platform`]: the host kernel seam and the deterministic lab platform
//! - [`config`]: stage configuration with environment overrides
//! - [`observability`]: structured metrics for stage activity

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod cue;
pub mod destiny;
pub mod error;
pub mod exchange;
pub mod observability;
pub mod platform;
pub mod role;
pub mod scene;
pub mod status;
pub mod theater;
pub mod tracing_compat;
pub mod types;
pub mod util;

mod agent;
mod gig;
mod stage;

pub use agent::Agent;
pub use config::StageConfig;
pub use cue::{Cue, Hint, Rollback, Teleprompter};
pub use error::{Blooper, BlooperKind};
pub use exchange::Exchange;
pub use gig::{FatePromise, Gig};
pub use platform::{LabPlatform, Platform};
pub use role::{Casting, Role, SceneEntry, Stagehand};
pub use scene::{Scene, Step};
pub use theater::Theater;
pub use types::{
    payload, unpack, AgentId, GigId, Guard, Incident, Payload, Signal, Time, Verdict,
};
