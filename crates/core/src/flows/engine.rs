use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{FlowAction, FlowEvent, FlowState, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

/// Drives the turn state machine. Stateless; the current state lives in the checkpoint.
#[derive(Clone, Debug, Default)]
pub struct FlowEngine;

impl FlowEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> FlowState {
        FlowState::Idle
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.thread_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.thread_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

/// Pure transition function of the turn state machine.
pub fn transition(
    current: &FlowState,
    event: &FlowEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        ApplyRejections, AwaitHumanDecision, EvaluateApproval, ExecuteTools, FilterIntent,
        GenerateResponse, PublishAnswer,
    };
    use FlowEvent::{
        ApprovalNotRequired, ApprovalRequired, DecisionSubmitted, FinalAnswerProduced,
        ToolCallsRequested, ToolsExecuted, ToolsSelected, UserMessageReceived,
    };
    use FlowState::{
        ApprovalChecking, Done, Executing, Idle, IntentFiltering, Responding,
        SuspendedForApproval,
    };

    let (to, actions) = match (current, event) {
        (Idle, UserMessageReceived) | (Done, UserMessageReceived) => {
            (IntentFiltering, vec![FilterIntent])
        }
        (IntentFiltering, ToolsSelected) => (Responding, vec![GenerateResponse]),
        (Responding, FinalAnswerProduced) => (Done, vec![PublishAnswer]),
        // Approval policy is evaluated for every tool-producing response, enabled or not.
        (Responding, ToolCallsRequested) => (ApprovalChecking, vec![EvaluateApproval]),
        (ApprovalChecking, ApprovalRequired) => (SuspendedForApproval, vec![AwaitHumanDecision]),
        (ApprovalChecking, ApprovalNotRequired) => (Executing, vec![ExecuteTools]),
        (SuspendedForApproval, DecisionSubmitted) => {
            (Executing, vec![ApplyRejections, ExecuteTools])
        }
        (Executing, ToolsExecuted) => (Responding, vec![GenerateResponse]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: *event,
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
