use serde_json::json;

use toolgate_core::config::LoadOptions;
use toolgate_core::domain::{Checkpoint, ThreadId};

use crate::commands::{block_on, load_config, open_store, CommandResult, Failure};

pub fn run(options: LoadOptions, thread: String) -> CommandResult {
    let thread_id = ThreadId::new(thread);
    match load_checkpoint(options, &thread_id) {
        Ok(checkpoint) => CommandResult::success_with_data(
            "show",
            checkpoint.state.title.clone().unwrap_or_else(|| thread_id.to_string()),
            Some(json!({
                "thread_id": thread_id,
                "sequence_number": checkpoint.sequence_number,
                "updated_at": checkpoint.created_at,
                "state": checkpoint.state,
            })),
        ),
        Err(failure) => CommandResult::from_failure("show", failure),
    }
}

pub(crate) fn load_checkpoint(options: LoadOptions, thread_id: &ThreadId) -> Result<Checkpoint, Failure> {
    let config = load_config(options)?;
    block_on(async {
        let store = open_store(&config).await?;
        store
            .load(thread_id)
            .await
            .map_err(|error| Failure::new("persistence", error.to_string(), 4))?
            .ok_or_else(|| Failure::new("thread_not_found", format!("thread `{thread_id}` not found"), 7))
    })
}
