//! Pipeline sequencing: the state machine and the orchestrator that drives it.

mod orchestrator;
mod state;

pub use orchestrator::{NoopObserver, Orchestrator, RunFailure, RunObserver, RunPlan, RunSummary};
pub use state::{InvalidTransition, PipelineState};
