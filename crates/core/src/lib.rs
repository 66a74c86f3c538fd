pub mod approvals;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod flows;

pub use approvals::{ApprovalDecision, ApprovalGate, GateDecision};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use catalog::{ToolCatalog, ToolSpec};
pub use conversation::{extract_recent_turns, resulted_call_ids, ConversationStats, Turn};
pub use domain::{
    AssistantMessage, Checkpoint, ConversationState, Message, PendingApproval, ThreadId, ToolCall,
    ToolClaim, ToolResult, REJECTION_NOTICE,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowAction, FlowEngine, FlowEvent, FlowState, FlowTransitionError};
