use toolgate_core::config::LoadOptions;
use toolgate_core::conversation::ConversationStats;
use toolgate_core::domain::ThreadId;

use crate::commands::show::load_checkpoint;
use crate::commands::CommandResult;

pub fn run(options: LoadOptions, thread: String) -> CommandResult {
    let thread_id = ThreadId::new(thread);
    match load_checkpoint(options, &thread_id) {
        Ok(checkpoint) => {
            let stats = ConversationStats::from_messages(&checkpoint.state.messages);
            let message = format!(
                "{} messages, {} tool call(s) executed, {} rejected",
                stats.total_messages, stats.tool_calls_executed, stats.tool_calls_rejected
            );
            CommandResult::success_with_data("stats", message, serde_json::to_value(&stats).ok())
        }
        Err(failure) => CommandResult::from_failure("stats", failure),
    }
}
