use toolgate_agent::TurnInput;
use toolgate_core::approvals::ApprovalDecision;
use toolgate_core::config::LoadOptions;
use toolgate_core::domain::ThreadId;

use crate::commands::{
    block_on, load_config, open_orchestrator, orchestrator_failure, outcome_result, run_streamed,
    CommandResult, Failure,
};

/// Tools named in neither list are rejected, as are tools named in both.
pub fn run(
    options: LoadOptions,
    thread: String,
    approved: Vec<String>,
    rejected: Vec<String>,
    all: bool,
) -> CommandResult {
    let thread_id = ThreadId::new(thread);

    let result = load_config(options).and_then(|config| {
        block_on(async {
            let orchestrator = open_orchestrator(&config).await?;
            let decision = if all {
                let state = orchestrator
                    .get_state(&thread_id)
                    .await
                    .map_err(|error| orchestrator_failure(error, &thread_id))?
                    .ok_or_else(|| {
                        Failure::new("thread_not_found", format!("thread `{thread_id}` not found"), 7)
                    })?;
                ApprovalDecision::approve_all(&state.pending_approval)
            } else {
                ApprovalDecision::new(approved, rejected)
            };
            run_streamed(&orchestrator, &thread_id, TurnInput::Decision(decision)).await
        })
    });

    match result {
        Ok(outcome) => outcome_result("approve", &thread_id, outcome),
        Err(failure) => CommandResult::from_failure("approve", failure),
    }
}
