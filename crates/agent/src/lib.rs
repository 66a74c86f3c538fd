//! Agent runtime: the model binding, tool plumbing, and the turn orchestrator.
//!
//! A turn runs through a fixed loop:
//! 1. **Intent filtering** (`intent`) narrows the tool catalog for the current message
//! 2. **Response generation** (`response`) invokes the model with schema-error retry and a
//!    tool-less fallback
//! 3. **Approval gating** decides whether sensitive tool calls wait for a human
//! 4. **Tool execution** (`executor`) runs each call id at most once
//!
//! `runtime::Orchestrator` sequences these steps and checkpoints the thread after each one,
//! so a turn suspended for approval or cut short by a crash resumes where it stopped.

pub mod builtin;
pub mod executor;
pub mod intent;
pub mod llm;
pub mod openai;
pub mod response;
pub mod runtime;
pub mod tools;

pub use builtin::default_registry;
pub use executor::ToolExecutor;
pub use intent::IntentFilter;
pub use llm::{ignore_deltas, DeltaSink, LlmClient, LlmError, LlmRequest};
pub use openai::OpenAiCompatibleClient;
pub use response::ResponseGenerator;
pub use runtime::{Orchestrator, OrchestratorError, TurnEvent, TurnEvents, TurnInput, TurnOutcome};
pub use tools::{Tool, ToolErrorKind, ToolOutcome, ToolRegistry};
