//! Scheduling: trigger specs, job bodies, and the orchestrator.

mod jobs;
mod orchestrator;
mod trigger;

pub use jobs::{JobKind, Jobs};
pub use orchestrator::{JobSlot, Orchestrator};
pub use trigger::{TriggerParseError, TriggerSpec};
