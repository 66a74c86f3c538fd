use serde_json::json;

use toolgate_core::config::LoadOptions;

use crate::commands::{block_on, load_config, open_store, CommandResult, Failure};

pub fn run(options: LoadOptions) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        block_on(async {
            let store = open_store(&config).await?;
            let threads = store
                .list_threads()
                .await
                .map_err(|error| Failure::new("persistence", error.to_string(), 4))?;

            let mut summaries = Vec::with_capacity(threads.len());
            for thread_id in threads {
                let Some(checkpoint) = store
                    .load(&thread_id)
                    .await
                    .map_err(|error| Failure::new("persistence", error.to_string(), 4))?
                else {
                    continue;
                };
                let state = checkpoint.state;
                summaries.push(json!({
                    "thread_id": thread_id,
                    "title": state.title,
                    "phase": state.phase,
                    "messages": state.messages.len(),
                    "awaiting_approval": state.pending_approval.needed,
                    "updated_at": checkpoint.created_at,
                }));
            }
            Ok::<_, Failure>(summaries)
        })
    });

    match result {
        Ok(summaries) => CommandResult::success_with_data(
            "threads",
            format!("{} thread(s)", summaries.len()),
            Some(json!(summaries)),
        ),
        Err(failure) => CommandResult::from_failure("threads", failure),
    }
}
