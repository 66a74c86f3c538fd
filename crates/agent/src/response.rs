use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use toolgate_core::catalog::ToolCatalog;
use toolgate_core::domain::{AssistantMessage, Message};

use crate::llm::{DeltaSink, LlmClient, LlmError, LlmRequest};

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to various tools.

When using tools:
- Always provide complete and valid parameters according to the tool's schema
- If a tool call fails due to schema errors, carefully read the error message and retry with corrected parameters
- If a tool returns an error, analyze it and decide whether to retry, use a different tool, or respond without tools
- Only invoke tools explicitly available in the current iteration. If completing the request would require a tool that is not available, respond that there is not enough information to proceed.
- After 3 failed attempts, provide a helpful response without using tools

If a tool execution is rejected by the user:
- Do NOT retry the same tool or similar tools without explicit user permission
- Acknowledge the rejection gracefully without making the user feel bad about it
- Provide the best possible answer using only your knowledge and any other available approved tools
- If the request cannot be fulfilled without the rejected tool, clearly explain the limitation and ask if the user would like to proceed differently
- Remember this rejection for the remainder of the conversation and avoid suggesting the rejected tool again

When you receive tool results:
- Interpret the results clearly for the user
- If results contain errors, explain what went wrong and suggest alternatives if possible

Always prioritize giving the user a helpful response, even if tools fail.";

pub const FALLBACK_APOLOGY: &str = "I apologize, but I'm having trouble processing your request right now. Please try rephrasing your question.";

const RETRY_INSTRUCTIONS: &str = "Please retry with a correct tool call. Make sure all required parameters are provided and match the expected types.";

/// Invokes the model for one step of a turn, recovering from schema faults.
pub struct ResponseGenerator {
    llm: Arc<dyn LlmClient>,
    max_retries: u32,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, max_retries: u32) -> Self {
        Self { llm, max_retries: max_retries.max(1) }
    }

    /// Returns exactly one assistant message, or propagates a fatal model fault.
    ///
    /// At most `max_retries` strict invocations are made; after that a single tool-less,
    /// non-strict invocation answers with whatever feedback accumulated.
    pub async fn generate(
        &self,
        messages: &[Message],
        allowed_tools: &BTreeSet<String>,
        catalog: &ToolCatalog,
        on_delta: DeltaSink<'_>,
    ) -> Result<AssistantMessage, LlmError> {
        let tools = catalog.restrict(allowed_tools);
        let mut working = with_system_prompt(messages);

        for attempt in 1..=self.max_retries {
            let request = LlmRequest::with_tools(&working, &tools);
            match self.llm.invoke(request, on_delta).await {
                Ok(response) => {
                    let requested =
                        response.tool_calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>();
                    info!(
                        event_name = "agent.response.generated",
                        attempt,
                        tool_count = tools.len(),
                        requested_tools = ?requested,
                        "model responded"
                    );
                    return Ok(response);
                }
                Err(LlmError::FunctionCall(detail)) => {
                    warn!(event_name = "agent.response.schema_error", attempt, %detail, "strict tool call rejected");
                    working.push(feedback(None));
                }
                Err(LlmError::Validation(detail)) => {
                    warn!(event_name = "agent.response.validation_error", attempt, %detail, "tool call failed validation");
                    working.push(feedback(Some(&detail)));
                }
                Err(error @ (LlmError::RateLimited(_) | LlmError::Timeout(_))) => {
                    error!(event_name = "agent.response.unavailable", error_kind = error.kind(), error = %error, "model unavailable");
                    return Ok(AssistantMessage::final_answer(terminal_notice(&error)));
                }
                Err(error) => return Err(error),
            }
        }

        warn!(
            event_name = "agent.response.fallback",
            max_retries = self.max_retries,
            "schema retries exhausted; answering without tools"
        );
        match self.llm.invoke(LlmRequest::plain(&working), on_delta).await {
            Ok(response) => Ok(AssistantMessage::final_answer(response.text)),
            Err(error) => {
                error!(event_name = "agent.response.fallback_failed", error_kind = error.kind(), error = %error, "fallback invocation failed");
                Ok(AssistantMessage::final_answer(FALLBACK_APOLOGY))
            }
        }
    }
}

fn with_system_prompt(messages: &[Message]) -> Vec<Message> {
    let has_system = messages.iter().any(|message| matches!(message, Message::System { .. }));
    let mut working = Vec::with_capacity(messages.len() + 1);
    if !has_system {
        working.push(Message::system(SYSTEM_PROMPT));
    }
    working.extend_from_slice(messages);
    working
}

/// Feedback is assistant-authored and lives only in the working copy of this step.
fn feedback(detail: Option<&str>) -> Message {
    let text = match detail {
        None => format!(
            "You attempted to call a tool but provided an invalid input schema. {RETRY_INSTRUCTIONS}"
        ),
        Some(detail) => format!(
            "You attempted to call a tool but provided an invalid input schema.\nSchema error:\n{detail}\n\n{RETRY_INSTRUCTIONS}"
        ),
    };
    AssistantMessage::final_answer(text).into()
}

fn terminal_notice(error: &LlmError) -> String {
    match error {
        LlmError::RateLimited(detail) => format!("Rate limit error occurred: {detail}"),
        other => format!("The model did not respond in time ({other}). Please try again shortly."),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Map};

    use toolgate_core::catalog::{ToolCatalog, ToolSpec};
    use toolgate_core::domain::{AssistantMessage, Message, ToolCall};

    use super::{ResponseGenerator, FALLBACK_APOLOGY, SYSTEM_PROMPT};
    use crate::llm::{ignore_deltas, DeltaSink, LlmClient, LlmError, LlmRequest};

    #[derive(Debug)]
    struct Invocation {
        strict: bool,
        tool_names: Option<Vec<String>>,
        messages: Vec<Message>,
    }

    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<AssistantMessage, LlmError>>>,
        invocations: Mutex<Vec<Invocation>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<AssistantMessage, LlmError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), invocations: Mutex::default() })
        }

        fn invocations(&self) -> std::sync::MutexGuard<'_, Vec<Invocation>> {
            self.invocations.lock().expect("invocations lock")
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedModel {
        async fn invoke(
            &self,
            request: LlmRequest<'_>,
            _on_delta: DeltaSink<'_>,
        ) -> Result<AssistantMessage, LlmError> {
            self.invocations().push(Invocation {
                strict: request.strict,
                tool_names: request
                    .tools
                    .map(|tools| tools.iter().map(|spec| spec.name.clone()).collect()),
                messages: request.messages.to_vec(),
            });
            let reply = self.replies.lock().expect("replies lock").pop_front();
            reply.unwrap_or_else(|| Err(LlmError::Fatal("script exhausted".into())))
        }
    }

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(["calculator", "file_operations"].map(|name| {
            ToolSpec::new(name, name, name, json!({"type": "object"}))
        }))
    }

    fn schema_error() -> Result<AssistantMessage, LlmError> {
        Err(LlmError::FunctionCall("tool_use_failed".into()))
    }

    fn history() -> Vec<Message> {
        vec![Message::user("What's 10 plus 5?")]
    }

    #[tokio::test]
    async fn binds_only_allowed_tools_and_prepends_system_prompt() {
        let call = ToolCall::new("c1", "calculator", Map::new());
        let model = ScriptedModel::new(vec![Ok(AssistantMessage::new("", vec![call]))]);
        let generator = ResponseGenerator::new(model.clone(), 3);
        let allowed = BTreeSet::from(["calculator".to_string()]);

        let response =
            generator.generate(&history(), &allowed, &catalog(), &ignore_deltas).await.expect("response");
        assert!(response.has_tool_calls());

        let invocations = model.invocations();
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].strict);
        assert_eq!(invocations[0].tool_names, Some(vec!["calculator".to_string()]));
        assert_eq!(invocations[0].messages[0], Message::system(SYSTEM_PROMPT));
        assert_eq!(invocations[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn empty_allow_set_binds_full_catalog() {
        let model = ScriptedModel::new(vec![Ok(AssistantMessage::final_answer("hi"))]);
        let generator = ResponseGenerator::new(model.clone(), 3);
        generator.generate(&history(), &BTreeSet::new(), &catalog(), &ignore_deltas).await.expect("response");
        assert_eq!(model.invocations()[0].tool_names.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn existing_system_message_is_not_duplicated() {
        let model = ScriptedModel::new(vec![Ok(AssistantMessage::final_answer("hi"))]);
        let generator = ResponseGenerator::new(model.clone(), 3);
        let messages = vec![Message::system("custom policy"), Message::user("hi")];
        generator.generate(&messages, &BTreeSet::new(), &catalog(), &ignore_deltas).await.expect("response");
        assert_eq!(model.invocations()[0].messages, messages);
    }

    #[tokio::test]
    async fn retries_schema_errors_with_feedback() {
        let model = ScriptedModel::new(vec![
            schema_error(),
            Err(LlmError::Validation("calculator: missing required argument 'operation'".into())),
            Ok(AssistantMessage::final_answer("15")),
        ]);
        let generator = ResponseGenerator::new(model.clone(), 3);

        let response =
            generator.generate(&history(), &BTreeSet::new(), &catalog(), &ignore_deltas).await.expect("response");
        assert_eq!(response.text, "15");

        let invocations = model.invocations();
        assert_eq!(invocations.len(), 3);
        let first_feedback = invocations[1].messages.last().map(Message::text).unwrap_or_default();
        assert!(first_feedback.starts_with("You attempted to call a tool"));
        assert!(!first_feedback.contains("tool_use_failed"));
        let second_feedback = invocations[2].messages.last().map(Message::text).unwrap_or_default();
        assert!(second_feedback.contains("Schema error:\ncalculator: missing required argument 'operation'"));
    }

    #[tokio::test]
    async fn strict_invocations_never_exceed_retry_bound() {
        for max_retries in 1..=5u32 {
            let mut replies = (0..max_retries).map(|_| schema_error()).collect::<Vec<_>>();
            replies.push(Ok(AssistantMessage::final_answer("plain answer")));
            let model = ScriptedModel::new(replies);
            let generator = ResponseGenerator::new(model.clone(), max_retries);

            let response = generator
                .generate(&history(), &BTreeSet::new(), &catalog(), &ignore_deltas)
                .await
                .expect("response");
            assert_eq!(response.text, "plain answer");
            assert!(response.is_final);

            let invocations = model.invocations();
            let strict = invocations.iter().filter(|invocation| invocation.strict).count();
            assert_eq!(strict, max_retries as usize);
            let fallback = invocations.last().expect("fallback invocation");
            assert!(!fallback.strict);
            assert!(fallback.tool_names.is_none());
        }
    }

    #[tokio::test]
    async fn failed_fallback_returns_apology() {
        let model = ScriptedModel::new(vec![schema_error(), schema_error()]);
        let generator = ResponseGenerator::new(model, 2);
        let response =
            generator.generate(&history(), &BTreeSet::new(), &catalog(), &ignore_deltas).await.expect("response");
        assert_eq!(response.text, FALLBACK_APOLOGY);
        assert!(response.is_final);
    }

    #[tokio::test]
    async fn rate_limit_is_reported_without_retry() {
        let model = ScriptedModel::new(vec![Err(LlmError::RateLimited("slow down".into()))]);
        let generator = ResponseGenerator::new(model.clone(), 3);
        let response =
            generator.generate(&history(), &BTreeSet::new(), &catalog(), &ignore_deltas).await.expect("response");
        assert_eq!(response.text, "Rate limit error occurred: slow down");
        assert_eq!(model.invocations().len(), 1);
    }

    #[tokio::test]
    async fn fatal_errors_propagate() {
        let model = ScriptedModel::new(vec![Err(LlmError::Fatal("invalid api key".into()))]);
        let generator = ResponseGenerator::new(model, 3);
        let error = generator
            .generate(&history(), &BTreeSet::new(), &catalog(), &ignore_deltas)
            .await
            .expect_err("fatal");
        assert_eq!(error, LlmError::Fatal("invalid api key".into()));
    }
}
