use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Idle,
    IntentFiltering,
    Responding,
    ApprovalChecking,
    SuspendedForApproval,
    Executing,
    Done,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::IntentFiltering => "intent_filtering",
            Self::Responding => "responding",
            Self::ApprovalChecking => "approval_checking",
            Self::SuspendedForApproval => "suspended_for_approval",
            Self::Executing => "executing",
            Self::Done => "done",
        }
    }

    /// No turn is in flight; a new user message may start one.
    pub fn is_at_rest(&self) -> bool {
        matches!(self, Self::Idle | Self::Done)
    }

    /// The turn has returned control to the caller.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::SuspendedForApproval)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEvent {
    UserMessageReceived,
    ToolsSelected,
    FinalAnswerProduced,
    ToolCallsRequested,
    ApprovalRequired,
    ApprovalNotRequired,
    DecisionSubmitted,
    ToolsExecuted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    FilterIntent,
    GenerateResponse,
    EvaluateApproval,
    AwaitHumanDecision,
    ApplyRejections,
    ExecuteTools,
    PublishAnswer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
