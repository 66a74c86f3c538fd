use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use toolgate_core::catalog::ToolCatalog;
use toolgate_core::conversation::{extract_recent_turns, Turn};
use toolgate_core::domain::Message;

use crate::llm::{ignore_deltas, LlmClient, LlmRequest};

const CLASSIFIER_INSTRUCTIONS: &str = "You are an intent classifier. Your job is to analyze the user's message and determine which tools are relevant.

Given a conversation history and a list of available tools, return ONLY the names of tools that are relevant to the current user query.

You must determine the user's intent based solely on the current user query.
Prior conversations are provided only to clarify context and must not override the current query.
When using prior conversations for context, give higher importance to the most recent interactions, with relevance decreasing progressively for earlier ones.
Always prioritize the current user query.

Rules:
- Return tool names as a JSON array, e.g., [\"calculator\", \"get_weather\"]
- If no tools are needed, return an empty array: []
- Consider the conversation context to understand what the user is asking
- Only include tools that are directly relevant to answering the current question
- If the user's intent requires multiple tools, return all necessary tools.
- Be conservative: when in doubt, include the tool rather than exclude it

Your response must be valid JSON containing only the array of tool names.";

const ANSWER_FORMAT: &str =
    "You must not generate any explanation just respond with JSON array of relevant tool names:";

/// Narrows the catalog to the tools relevant for the current user message.
pub struct IntentFilter {
    llm: Arc<dyn LlmClient>,
    max_retries: u32,
    turn_window: usize,
}

impl IntentFilter {
    pub fn new(llm: Arc<dyn LlmClient>, max_retries: u32, turn_window: usize) -> Self {
        Self { llm, max_retries: max_retries.max(1), turn_window }
    }

    /// Selects tools for the last message of `history`.
    ///
    /// Fails open: a history that does not end in a user message, a model fault, or
    /// exhausted retries all yield the full catalog.
    pub async fn select(&self, history: &[Message], catalog: &ToolCatalog) -> BTreeSet<String> {
        let Some((Message::User { text }, earlier)) = history.split_last() else {
            warn!(event_name = "agent.intent.not_user_message", "last message is not a user message; allowing all tools");
            return all_tools(catalog);
        };
        let turns = extract_recent_turns(earlier, self.turn_window);
        self.filter(&turns, text, catalog).await
    }

    pub async fn filter(&self, turns: &[Turn], current: &str, catalog: &ToolCatalog) -> BTreeSet<String> {
        let mut sections = base_sections(turns, current, catalog);

        for attempt in 1..=self.max_retries {
            let prompt = [Message::system(render(&sections))];
            let request = LlmRequest::plain(&prompt).temperature(0.0);
            let response = match self.llm.invoke(request, &ignore_deltas).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(
                        event_name = "agent.intent.model_failed",
                        attempt,
                        error_kind = error.kind(),
                        error = %error,
                        "intent classifier invocation failed; allowing all tools"
                    );
                    return all_tools(catalog);
                }
            };

            match parse_tool_names(&response.text, catalog) {
                Ok(selected) => {
                    info!(
                        event_name = "agent.intent.classified",
                        attempt,
                        selected = ?selected,
                        "intent classifier selected tools"
                    );
                    return selected;
                }
                Err(error) => {
                    warn!(event_name = "agent.intent.parse_failed", attempt, error = %error, "invalid classifier output");
                    sections.push(("ai", feedback(&error)));
                }
            }
        }

        warn!(
            event_name = "agent.intent.retries_exhausted",
            max_retries = self.max_retries,
            "intent classifier retries exhausted; allowing all tools"
        );
        all_tools(catalog)
    }
}

fn all_tools(catalog: &ToolCatalog) -> BTreeSet<String> {
    catalog.names()
}

fn base_sections(turns: &[Turn], current: &str, catalog: &ToolCatalog) -> Vec<(&'static str, String)> {
    let mut sections = vec![
        ("system", CLASSIFIER_INSTRUCTIONS.to_string()),
        ("system", format!("Available tools:\n{}", catalog.classifier_descriptions())),
    ];
    if !turns.is_empty() {
        sections.push(("system", "Recent conversation context:".to_string()));
        for turn in turns {
            sections.push(("human", turn.user.clone()));
            sections.push(("ai", turn.assistant.clone()));
        }
    }
    sections.push(("system", format!("Current user query:\n{current}")));
    sections.push(("system", ANSWER_FORMAT.to_string()));
    sections
}

/// The classifier receives the whole exchange flattened into one system message.
fn render(sections: &[(&'static str, String)]) -> String {
    sections
        .iter()
        .map(|(role, content)| format!("{role}:\n{content}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn feedback(error: &str) -> String {
    format!(
        "You provided an invalid JSON response.\nError: {error}\n\n\
         Please respond with ONLY a valid JSON array of tool names.\n\
         Example: [\"calculator\", \"get_weather\"]\n\
         If no tools are needed, return: []"
    )
}

/// Parses a JSON array of tool names, silently dropping names missing from the catalog.
pub fn parse_tool_names(raw: &str, catalog: &ToolCatalog) -> Result<BTreeSet<String>, String> {
    let content = strip_code_fence(raw);
    let value = serde_json::from_str::<Value>(content).map_err(|error| error.to_string())?;
    let Value::Array(items) = value else {
        return Err("Response is not a JSON array".to_string());
    };
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| catalog.contains(name))
        .map(str::to_string)
        .collect())
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let inner = trimmed.split("```").nth(1).unwrap_or_default();
    inner.strip_prefix("json").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use toolgate_core::catalog::{ToolCatalog, ToolSpec};
    use toolgate_core::conversation::Turn;
    use toolgate_core::domain::{AssistantMessage, Message};

    use super::{parse_tool_names, IntentFilter};
    use crate::llm::{DeltaSink, LlmClient, LlmError, LlmRequest};

    struct ScriptedClassifier {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClassifier {
        fn new(replies: Vec<Result<&str, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(|reply| reply.map(str::to_string)).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("prompts lock").clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClassifier {
        async fn invoke(
            &self,
            request: LlmRequest<'_>,
            _on_delta: DeltaSink<'_>,
        ) -> Result<AssistantMessage, LlmError> {
            assert!(request.tools.is_none());
            assert_eq!(request.temperature, Some(0.0));
            self.prompts.lock().expect("prompts lock").push(request.messages[0].text().to_string());
            let reply = self.replies.lock().expect("replies lock").pop_front();
            reply.unwrap_or_else(|| Ok("not json".to_string())).map(AssistantMessage::final_answer)
        }
    }

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(["calculator", "unit_converter", "file_operations"].map(|name| {
            ToolSpec::new(name, format!("{name} tool"), format!("{name} summary"), json!({"type": "object"}))
        }))
    }

    fn names(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_fenced_arrays_and_drops_unknown_names() {
        let parsed = parse_tool_names("```json\n[\"calculator\", \"get_weather\"]\n```", &catalog());
        assert_eq!(parsed, Ok(names(&["calculator"])));
        assert_eq!(parse_tool_names("[]", &catalog()), Ok(BTreeSet::new()));
        assert_eq!(
            parse_tool_names("{\"tools\": []}", &catalog()),
            Err("Response is not a JSON array".to_string())
        );
        assert!(parse_tool_names("calculator", &catalog()).is_err());
    }

    #[tokio::test]
    async fn selects_tools_on_first_valid_answer() {
        let llm = ScriptedClassifier::new(vec![Ok("[\"calculator\"]")]);
        let filter = IntentFilter::new(llm.clone(), 3, 5);
        let history = vec![Message::user("What's 10 plus 5?")];

        assert_eq!(filter.select(&history, &catalog()).await, names(&["calculator"]));
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Available tools:\n- calculator: calculator summary"));
        assert!(prompts[0].contains("Current user query:\nWhat's 10 plus 5?"));
        assert!(!prompts[0].contains("Recent conversation context:"));
    }

    #[tokio::test]
    async fn retries_with_parse_feedback() {
        let llm = ScriptedClassifier::new(vec![Ok("calculator please"), Ok("[\"file_operations\"]")]);
        let filter = IntentFilter::new(llm.clone(), 3, 5);

        let selected = filter.filter(&[], "save a note", &catalog()).await;
        assert_eq!(selected, names(&["file_operations"]));
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("ai:\nYou provided an invalid JSON response."));
    }

    #[tokio::test]
    async fn fails_open_after_retries_are_exhausted() {
        let llm = ScriptedClassifier::new(vec![Ok("nope"), Ok("{}"), Ok("still nope"), Ok("[]")]);
        let filter = IntentFilter::new(llm.clone(), 3, 5);

        let selected = filter.filter(&[], "hello", &catalog()).await;
        assert_eq!(selected, names(&["calculator", "unit_converter", "file_operations"]));
        assert_eq!(llm.prompts().len(), 3);
    }

    #[tokio::test]
    async fn fails_open_on_model_error() {
        let llm = ScriptedClassifier::new(vec![Err(LlmError::Fatal("boom".into()))]);
        let filter = IntentFilter::new(llm, 3, 5);
        assert_eq!(filter.filter(&[], "hi", &catalog()).await.len(), 3);
    }

    #[tokio::test]
    async fn fails_open_when_last_message_is_not_from_user() {
        let llm = ScriptedClassifier::new(vec![Ok("[]")]);
        let filter = IntentFilter::new(llm.clone(), 3, 5);
        let history = vec![Message::user("hi"), AssistantMessage::final_answer("hello").into()];

        assert_eq!(filter.select(&history, &catalog()).await.len(), 3);
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn includes_recent_turns_in_prompt() {
        let llm = ScriptedClassifier::new(vec![Ok("[\"unit_converter\"]")]);
        let filter = IntentFilter::new(llm.clone(), 3, 5);
        let turns = [Turn { user: "convert 5 miles".into(), assistant: "8.0467 km".into() }];

        filter.filter(&turns, "and 10?", &catalog()).await;
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("Recent conversation context:\n\nhuman:\nconvert 5 miles\n\nai:\n8.0467 km"));
    }
}
