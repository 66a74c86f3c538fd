use uuid::Uuid;

use toolgate_agent::TurnInput;
use toolgate_core::config::LoadOptions;
use toolgate_core::domain::ThreadId;

use crate::commands::{
    block_on, load_config, open_orchestrator, orchestrator_failure, outcome_result, run_streamed,
    CommandResult,
};

pub fn run(
    options: LoadOptions,
    thread: Option<String>,
    message: Option<String>,
    approval: Option<bool>,
) -> CommandResult {
    let thread_id = ThreadId::new(thread.unwrap_or_else(new_thread_id));

    let result = load_config(options).and_then(|config| {
        block_on(async {
            let orchestrator = open_orchestrator(&config).await?;
            if let Some(enabled) = approval {
                orchestrator
                    .set_approval_enabled(&thread_id, enabled)
                    .await
                    .map_err(|error| orchestrator_failure(error, &thread_id))?;
            }
            let input = message.map_or(TurnInput::Resume, TurnInput::Message);
            run_streamed(&orchestrator, &thread_id, input).await
        })
    });

    match result {
        Ok(outcome) => outcome_result("chat", &thread_id, outcome),
        Err(failure) => CommandResult::from_failure("chat", failure),
    }
}

fn new_thread_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("chat_{}", &id[..8])
}
