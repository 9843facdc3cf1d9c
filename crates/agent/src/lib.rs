//! The research loop: the heart of DeepDive.
//!
//! A turn answers one user message in bounded steps:
//!
//! 1. **Prune** the conversation so only recent messages keep tool detail
//! 2. **Generate** with the research directive and the tool catalogue
//! 3. **If tool calls**: run them in order, append call/result pairs, loop to 2
//! 4. **If text only**: the turn is done
//!
//! The loop also stops at the step cap, on cancellation or on a transport
//! failure. Progress streams out as [`UiEvent`]s.

pub mod context;
pub mod orchestrator;
pub mod prompt;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{ContextPruner, PrunePolicy, prune};
pub use orchestrator::{
    ExternalResolution, FinishCallback, StepOrchestrator, TurnHandle, TurnIo, TurnOutcome,
};
pub use prompt::{RESEARCH_DIRECTIVE, research_directive};
pub use stream_event::{FinishReason, UiEvent};
