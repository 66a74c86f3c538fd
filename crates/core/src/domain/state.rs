use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::message::{AssistantMessage, Message, ThreadId, ToolCall};
use crate::flows::states::FlowState;

const TITLE_MAX_CHARS: usize = 50;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub needed: bool,
    #[serde(default)]
    pub calls: Vec<ToolCall>,
}

impl PendingApproval {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_calls(calls: Vec<ToolCall>) -> Self {
        Self { needed: !calls.is_empty(), calls }
    }

    pub fn tool_names(&self) -> BTreeSet<String> {
        self.calls.iter().map(|call| call.name.clone()).collect()
    }
}

/// A tool call some turn has committed to running and not yet resulted.
///
/// While the claim is live, other resumers of the thread must not run the call. A claim older
/// than the lease belongs to a turn that died mid-call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolClaim {
    pub call_id: String,
    pub claimed_at: DateTime<Utc>,
}

impl ToolClaim {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), claimed_at: Utc::now() }
    }

    pub fn is_live(&self, lease: Duration, now: DateTime<Utc>) -> bool {
        self.claimed_at.checked_add_signed(lease).map_or(true, |expires| now < expires)
    }
}

/// Per-thread aggregate owned by the orchestrator and serialized into checkpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    #[serde(default)]
    pub human_approval_enabled: bool,
    #[serde(default)]
    pub pending_approval: PendingApproval,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub phase: FlowState,
    #[serde(default)]
    pub in_flight: Option<ToolClaim>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            allowed_tools: BTreeSet::new(),
            human_approval_enabled: false,
            pending_approval: PendingApproval::none(),
            title: None,
            phase: FlowState::Idle,
            in_flight: None,
        }
    }
}

impl ConversationState {
    pub fn new(human_approval_enabled: bool) -> Self {
        Self { human_approval_enabled, ..Self::default() }
    }

    /// Appends a user message, deriving the thread title from the first one.
    pub fn push_user_message(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.title.is_none() {
            self.title = Some(conversation_title(&text));
        }
        self.messages.push(Message::User { text });
    }

    pub fn push(&mut self, message: impl Into<Message>) {
        self.messages.push(message.into());
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent assistant message that requested tools.
    pub fn last_tool_request(&self) -> Option<&AssistantMessage> {
        self.messages
            .iter()
            .rev()
            .filter_map(Message::as_assistant)
            .find(|message| message.has_tool_calls())
    }

    pub fn accepts_new_message(&self) -> bool {
        self.phase.is_at_rest()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub sequence_number: u64,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
}

/// Title derived from the opening message: at most 50 characters, ellipsized when cut.
pub fn conversation_title(first_message: &str) -> String {
    let truncated = first_message.chars().count() > TITLE_MAX_CHARS;
    let mut title = first_message.chars().take(TITLE_MAX_CHARS).collect::<String>().trim().to_string();
    if truncated {
        title.push_str("...");
    }
    title
}
