use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::Message;

/// One completed exchange: a user message and the final assistant answer it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Last `n` completed turns of `history`, oldest first.
///
/// Walks backward and pairs each final assistant message with the nearest user message
/// before it. Intermediate assistant messages (those that requested tools) are skipped,
/// and a final answer with no preceding user message is discarded.
pub fn extract_recent_turns(history: &[Message], n: usize) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut index = history.len();

    while index > 0 && turns.len() < n {
        index -= 1;
        let Some(answer) = history[index].as_assistant().filter(|message| message.is_final) else {
            continue;
        };

        let user = history[..index].iter().enumerate().rev().find_map(|(position, message)| {
            match message {
                Message::User { text } => Some((position, text)),
                _ => None,
            }
        });

        match user {
            Some((position, text)) => {
                turns.push(Turn { user: text.clone(), assistant: answer.text.clone() });
                index = position;
            }
            None => break,
        }
    }

    turns.reverse();
    turns
}

/// Call ids that already have a recorded result anywhere in the history.
pub fn resulted_call_ids(history: &[Message]) -> BTreeSet<String> {
    history.iter().filter_map(Message::as_tool_result).map(|result| result.call_id.clone()).collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tool_calls_executed: usize,
    pub tool_calls_rejected: usize,
    pub tools_used: BTreeMap<String, usize>,
    pub tools_rejected: BTreeMap<String, usize>,
    /// Whitespace-separated words of user and assistant text.
    pub approx_tokens: usize,
}

impl ConversationStats {
    pub fn from_messages(history: &[Message]) -> Self {
        let mut stats = Self { total_messages: history.len(), ..Self::default() };

        for message in history {
            match message {
                Message::User { text } => {
                    stats.user_messages += 1;
                    stats.approx_tokens += text.split_whitespace().count();
                }
                Message::Assistant(assistant) => {
                    stats.assistant_messages += 1;
                    stats.approx_tokens += assistant.text.split_whitespace().count();
                }
                Message::ToolResult(result) if result.is_rejection() => {
                    stats.tool_calls_rejected += 1;
                    *stats.tools_rejected.entry(result.tool_name.clone()).or_default() += 1;
                }
                Message::ToolResult(result) => {
                    stats.tool_calls_executed += 1;
                    *stats.tools_used.entry(result.tool_name.clone()).or_default() += 1;
                }
                Message::System { .. } => {}
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::{extract_recent_turns, resulted_call_ids, ConversationStats};
    use crate::domain::{AssistantMessage, Message, ToolCall, ToolResult};

    fn tool_request(id: &str, name: &str) -> Message {
        AssistantMessage::new("", vec![ToolCall::new(id, name, Map::new())]).into()
    }

    fn result(id: &str, name: &str, text: &str) -> Message {
        ToolResult { call_id: id.into(), tool_name: name.into(), text: text.into() }.into()
    }

    fn history() -> Vec<Message> {
        vec![
            Message::system("policy"),
            Message::user("What's 10 plus 5?"),
            tool_request("c1", "calculator"),
            result("c1", "calculator", r#"{"status":"success","result":15}"#),
            AssistantMessage::final_answer("10 plus 5 is 15.").into(),
            Message::user("Write it to notes.txt"),
            tool_request("c2", "file_operations"),
            ToolResult::rejected(&ToolCall::new("c2", "file_operations", Map::new())).into(),
            AssistantMessage::final_answer("Okay, I won't write the file.").into(),
        ]
    }

    #[test]
    fn turns_pair_final_answers_with_preceding_user() {
        let turns = extract_recent_turns(&history(), 5);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].user, "What's 10 plus 5?");
        assert_eq!(turns[0].assistant, "10 plus 5 is 15.");
        assert_eq!(turns[1].user, "Write it to notes.txt");
    }

    #[test]
    fn turn_window_keeps_most_recent() {
        let turns = extract_recent_turns(&history(), 1);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].assistant, "Okay, I won't write the file.");
    }

    #[test]
    fn orphan_answers_are_discarded() {
        let messages = vec![Message::from(AssistantMessage::final_answer("hello"))];
        assert!(extract_recent_turns(&messages, 5).is_empty());
    }

    #[test]
    fn resulted_ids_cover_real_and_synthetic_results() {
        let ids = resulted_call_ids(&history());
        assert!(ids.contains("c1"));
        assert!(ids.contains("c2"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn stats_count_rejections_separately() {
        let stats = ConversationStats::from_messages(&history());
        assert_eq!(stats.total_messages, 9);
        assert_eq!(stats.user_messages, 2);
        assert_eq!(stats.assistant_messages, 4);
        assert_eq!(stats.tool_calls_executed, 1);
        assert_eq!(stats.tool_calls_rejected, 1);
        assert_eq!(stats.tools_used.get("calculator"), Some(&1));
        assert_eq!(stats.tools_rejected.get("file_operations"), Some(&1));
        assert!(stats.approx_tokens > 0);
    }
}
