use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{info, warn};

use toolgate_core::domain::{AssistantMessage, ToolCall, ToolResult};

use crate::tools::{ToolErrorKind, ToolOutcome, ToolRegistry};

/// Runs tool calls at most once per call id within a thread.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Filtered copy of `message` without calls that already have a result.
    pub fn plan(message: &AssistantMessage, resulted: &BTreeSet<String>) -> AssistantMessage {
        message.retain_calls(|call| !resulted.contains(&call.id))
    }

    /// Runs one call under the executor timeout. Tool failures come back as error outcomes.
    pub async fn execute_call(&self, call: &ToolCall) -> ToolOutcome {
        let outcome = match self.registry.get(&call.name) {
            None => ToolOutcome::error(
                ToolErrorKind::UnknownTool,
                format!("Tool '{}' is not available", call.name),
            ),
            Some(tool) => match tokio::time::timeout(self.timeout, tool.execute(&call.arguments)).await {
                Ok(outcome) => outcome,
                Err(_) => ToolOutcome::error(
                    ToolErrorKind::Timeout,
                    format!("Tool '{}' did not finish within {}s", call.name, self.timeout.as_secs()),
                ),
            },
        };

        match &outcome {
            ToolOutcome::Success(_) => info!(
                event_name = "agent.tool.executed",
                call_id = %call.id,
                tool_name = %call.name,
                "tool call succeeded"
            ),
            ToolOutcome::Error { kind, message } => warn!(
                event_name = "agent.tool.failed",
                call_id = %call.id,
                tool_name = %call.name,
                error_type = kind.as_str(),
                error_message = %message,
                "tool call returned an error"
            ),
        }

        outcome
    }

    /// Synthetic results for unresulted calls whose tool name was rejected.
    pub fn reject(
        calls: &[ToolCall],
        rejected: &BTreeSet<String>,
        resulted: &BTreeSet<String>,
    ) -> Vec<ToolResult> {
        calls
            .iter()
            .filter(|call| rejected.contains(&call.name) && !resulted.contains(&call.id))
            .map(|call| {
                info!(
                    event_name = "agent.tool.rejected",
                    call_id = %call.id,
                    tool_name = %call.name,
                    "tool call rejected by user"
                );
                ToolResult::rejected(call)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use toolgate_core::domain::{AssistantMessage, ToolCall, REJECTION_NOTICE};

    use super::ToolExecutor;
    use crate::builtin::Calculator;
    use crate::tools::{Tool, ToolOutcome, ToolRegistry};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn description(&self) -> &'static str {
            "Counts invocations."
        }
        fn short_description(&self) -> &'static str {
            "counts"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: &Map<String, Value>) -> ToolOutcome {
            let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            ToolOutcome::success(json!({"count": count}))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &'static str {
            "sleepy"
        }
        fn description(&self) -> &'static str {
            "Never finishes in time."
        }
        fn short_description(&self) -> &'static str {
            "sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: &Map<String, Value>) -> ToolOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolOutcome::success(json!({}))
        }
    }

    fn executor(calls: &Arc<AtomicUsize>) -> ToolExecutor {
        let mut registry = ToolRegistry::default();
        registry.register(Counting { calls: calls.clone() });
        registry.register(Calculator);
        registry.register(Sleepy);
        ToolExecutor::new(registry, Duration::from_millis(50))
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, Map::new())
    }

    #[tokio::test]
    async fn skips_calls_that_already_have_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = executor(&calls);
        let message = AssistantMessage::new("", vec![call("a", "counting"), call("b", "counting")]);

        let resulted = BTreeSet::from(["a".to_string()]);
        let planned = ToolExecutor::plan(&message, &resulted);
        assert_eq!(planned.tool_calls.len(), 1);
        assert_eq!(planned.tool_calls[0].id, "b");
        for call in &planned.tool_calls {
            executor.execute_call(call).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let all = BTreeSet::from(["a".to_string(), "b".to_string()]);
        assert!(ToolExecutor::plan(&message, &all).tool_calls.is_empty());
    }

    #[tokio::test]
    async fn results_follow_call_order_and_capture_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = executor(&calls);
        let mut division = Map::new();
        division.insert("first_num".into(), json!(1));
        division.insert("second_num".into(), json!(0));
        division.insert("operation".into(), json!("div"));
        let message = AssistantMessage::new(
            "",
            vec![
                ToolCall::new("c1", "calculator", division),
                call("c2", "missing_tool"),
                call("c3", "counting"),
            ],
        );

        let mut results = Vec::new();
        for call in &ToolExecutor::plan(&message, &BTreeSet::new()).tool_calls {
            results.push(executor.execute_call(call).await.to_result(call));
        }
        let ids = results.iter().map(|result| result.call_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(results[0].text.contains("division_by_zero"));
        assert!(results[1].text.contains("unknown_tool"));
        assert!(results[2].text.contains("\"status\":\"success\""));
    }

    #[tokio::test]
    async fn slow_tools_time_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = executor(&calls).execute_call(&call("s1", "sleepy")).await;
        assert_eq!(outcome.to_value()["error_type"], "timeout");
    }

    #[test]
    fn rejection_synthesizes_results_only_for_rejected_unresulted_calls() {
        let batch = [call("a", "file_operations"), call("b", "calculator"), call("c", "file_operations")];
        let rejected = BTreeSet::from(["file_operations".to_string()]);
        let resulted = BTreeSet::from(["c".to_string()]);

        let results = ToolExecutor::reject(&batch, &rejected, &resulted);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].call_id, "a");
        assert_eq!(results[0].text, REJECTION_NOTICE);
    }
}
