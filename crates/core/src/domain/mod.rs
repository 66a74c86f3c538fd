pub mod message;
pub mod state;

pub use message::{AssistantMessage, Message, ThreadId, ToolCall, ToolResult, REJECTION_NOTICE};
pub use state::{conversation_title, Checkpoint, ConversationState, PendingApproval, ToolClaim};
