pub mod engine;
pub mod states;

pub use engine::{transition, FlowEngine, FlowTransitionError};
pub use states::{FlowAction, FlowEvent, FlowState, TransitionOutcome};
