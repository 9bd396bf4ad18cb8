//! Core types: identifiers, signals, payloads, verdicts, and virtual time.

mod id;
mod signal;
mod time;
mod verdict;

pub use id::{AgentId, GigId, PortalKey, TimerKey};
pub use signal::{payload, unit, unpack, Payload, Signal};
pub use time::Time;
pub use verdict::{default_guard, Guard, Incident, Verdict};
