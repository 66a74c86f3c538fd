use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Content of the synthetic result recorded for a tool call the user rejected.
pub const REJECTION_NOTICE: &str =
    "Tool execution was rejected by the user. Please respond without using this tool.";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A model-requested tool invocation. `id` is the join key with its eventual [`ToolResult`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub is_final: bool,
}

impl AssistantMessage {
    /// Builds a message whose finality follows from the presence of tool calls.
    pub fn new(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let is_final = tool_calls.is_empty();
        Self { text: text.into(), tool_calls, is_final }
    }

    pub fn final_answer(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Copy of this message restricted to the given call ids, preserving call order.
    pub fn retain_calls(&self, keep: impl Fn(&ToolCall) -> bool) -> Self {
        let tool_calls = self.tool_calls.iter().filter(|call| keep(call)).cloned().collect();
        Self { text: self.text.clone(), tool_calls, is_final: self.is_final }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub text: String,
}

impl ToolResult {
    pub fn rejected(call: &ToolCall) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            text: REJECTION_NOTICE.to_string(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.text == REJECTION_NOTICE
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { text: String },
    User { text: String },
    Assistant(AssistantMessage),
    ToolResult(ToolResult),
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::System { text } | Self::User { text } => text,
            Self::Assistant(message) => &message.text,
            Self::ToolResult(result) => &result.text,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant(_) => "assistant",
            Self::ToolResult(_) => "tool",
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Self::ToolResult(result) => Some(result),
            _ => None,
        }
    }
}

impl From<AssistantMessage> for Message {
    fn from(value: AssistantMessage) -> Self {
        Self::Assistant(value)
    }
}

impl From<ToolResult> for Message {
    fn from(value: ToolResult) -> Self {
        Self::ToolResult(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::{AssistantMessage, Message, ToolCall, ToolResult, REJECTION_NOTICE};

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, Map::new())
    }

    #[test]
    fn assistant_finality_follows_tool_calls() {
        assert!(AssistantMessage::final_answer("15").is_final);
        assert!(!AssistantMessage::new("", vec![call("c1", "calculator")]).is_final);
    }

    #[test]
    fn message_serializes_with_role_tag() {
        let encoded = serde_json::to_value(Message::user("hi")).expect("serialize");
        assert_eq!(encoded, json!({"role": "user", "text": "hi"}));

        let assistant = Message::from(AssistantMessage::new("", vec![call("c1", "calculator")]));
        let encoded = serde_json::to_value(&assistant).expect("serialize");
        assert_eq!(encoded["role"], "assistant");
        assert_eq!(encoded["tool_calls"][0]["id"], "c1");

        let decoded: Message = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, assistant);
    }

    #[test]
    fn retain_calls_preserves_order() {
        let message = AssistantMessage::new(
            "",
            vec![call("a", "calculator"), call("b", "file_operations"), call("c", "calculator")],
        );
        let filtered = message.retain_calls(|call| call.id != "b");
        let ids = filtered.tool_calls.iter().map(|call| call.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn rejection_results_are_recognized() {
        let result = ToolResult::rejected(&call("c9", "web_search"));
        assert!(result.is_rejection());
        assert_eq!(result.text, REJECTION_NOTICE);
        assert_eq!(result.tool_name, "web_search");
    }
}
