//! OpenAI-compatible chat completions binding.
//!
//! Streams `POST {base_url}/chat/completions` as server-sent events, forwarding text deltas
//! as they arrive and accumulating tool-call fragments by index.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use toolgate_core::catalog::ToolSpec;
use toolgate_core::config::LlmConfig;
use toolgate_core::domain::{AssistantMessage, Message, ToolCall};

use crate::llm::{DeltaSink, LlmClient, LlmError, LlmRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OpenAiCompatibleClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Fatal(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(&self, request: &LlmRequest<'_>) -> ChatCompletionRequest {
        let tools = request.tools.filter(|tools| !tools.is_empty()).map(|tools| {
            tools.iter().map(|spec| ToolDefinition::from_spec(spec, request.strict)).collect()
        });
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(ChatMessage::from_message).collect(),
            tool_choice: tools.as_ref().map(|_: &Vec<ToolDefinition>| "auto".to_string()),
            tools,
            temperature: request.temperature.unwrap_or(self.temperature),
            stream: true,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn invoke(
        &self,
        request: LlmRequest<'_>,
        on_delta: DeltaSink<'_>,
    ) -> Result<AssistantMessage, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        info!(
            event_name = "agent.llm.request",
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map_or(0, Vec::len),
            strict = request.strict,
            "invoking model"
        );

        let mut builder = self.http.post(&url).json(&body).header("Accept", "text/event-stream");
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let mut response = builder.send().await.map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status.as_u16(), &body_text));
        }

        let mut accumulator = SseAccumulator::default();
        while let Some(bytes) = response.chunk().await.map_err(|error| self.transport_error(error))? {
            for delta in accumulator.push(&bytes)? {
                on_delta(&delta);
            }
        }
        for delta in accumulator.flush()? {
            on_delta(&delta);
        }

        let message = accumulator.finish()?;
        if request.strict {
            if let Some(tools) = request.tools {
                validate_tool_calls(&message.tool_calls, tools).map_err(LlmError::Validation)?;
            }
        }

        debug!(
            event_name = "agent.llm.response",
            tool_calls = message.tool_calls.len(),
            text_len = message.text.len(),
            "model responded"
        );
        Ok(message)
    }
}

impl OpenAiCompatibleClient {
    fn transport_error(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout(self.timeout_secs)
        } else {
            LlmError::Fatal(error.to_string())
        }
    }
}

/// Maps a non-success response (or an in-stream error payload) to an [`LlmError`].
pub fn classify_http_error(status: u16, body: &str) -> LlmError {
    if status == 429 || body.contains("rate_limit_exceeded") {
        return LlmError::RateLimited(extract_error_message(body));
    }
    if body.contains("tool_use_failed") || body.contains("Failed to call a function") {
        return LlmError::FunctionCall(extract_error_message(body));
    }
    LlmError::Fatal(format!("HTTP {status}: {}", extract_error_message(body)))
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Validates each call's arguments against the JSON Schema of the tool it names.
pub fn validate_tool_calls(calls: &[ToolCall], tools: &[ToolSpec]) -> Result<(), String> {
    for call in calls {
        let Some(spec) = tools.iter().find(|spec| spec.name == call.name) else {
            return Err(format!("tool `{}` is not available in this turn", call.name));
        };
        validate_arguments(&call.name, &call.arguments, &spec.parameters)?;
    }
    Ok(())
}

fn validate_arguments(tool: &str, arguments: &Map<String, Value>, schema: &Value) -> Result<(), String> {
    let validator = jsonschema::Validator::new(schema)
        .map_err(|error| format!("`{tool}` has an invalid parameter schema: {error}"))?;
    let arguments = Value::Object(arguments.clone());
    if validator.is_valid(&arguments) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(&arguments).map(|error| error.to_string()).collect();
    Err(format!("`{tool}` arguments are invalid: {}", errors.join("; ")))
}

// Wire types

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallWire>>,
}

impl ChatMessage {
    fn from_message(message: &Message) -> Self {
        let base = Self {
            role: message.role(),
            content: message.text().to_string(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        };
        match message {
            Message::System { .. } | Message::User { .. } => base,
            Message::Assistant(assistant) => Self {
                tool_calls: assistant
                    .has_tool_calls()
                    .then(|| assistant.tool_calls.iter().map(ToolCallWire::from_call).collect()),
                ..base
            },
            Message::ToolResult(result) => Self {
                tool_call_id: Some(result.call_id.clone()),
                name: Some(result.tool_name.clone()),
                ..base
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCallWire {
    id: String,
    r#type: String,
    function: FunctionCallWire,
}

impl ToolCallWire {
    fn from_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            r#type: "function".to_string(),
            function: FunctionCallWire {
                name: call.name.clone(),
                arguments: Value::Object(call.arguments.clone()).to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCallWire {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct ToolDefinition {
    r#type: &'static str,
    function: FunctionDefinition,
}

impl ToolDefinition {
    fn from_spec(spec: &ToolSpec, strict: bool) -> Self {
        Self {
            r#type: "function",
            function: FunctionDefinition {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
                strict: strict.then_some(true),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct FunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    strict: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Incremental SSE parser for streamed chat completions.
///
/// Network chunks can end inside a multi-byte character, so bytes are buffered and only
/// complete events are decoded.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    buffer: Vec<u8>,
    text: String,
    tool_calls: Vec<(usize, PendingToolCall)>,
    done: bool,
}

fn decode_event(bytes: &[u8]) -> Result<String, LlmError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|error| LlmError::Validation(format!("stream event is not valid UTF-8: {error}")))
}

impl SseAccumulator {
    /// Feeds raw bytes and returns the content deltas of the events they complete.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, LlmError> {
        self.buffer.extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));
        let mut deltas = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|window| window == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..end + 2).take(end).collect();
            deltas.extend(self.process_event(&decode_event(&event)?)?);
        }
        Ok(deltas)
    }

    /// Processes any trailing event left without a terminating blank line.
    pub fn flush(&mut self) -> Result<Vec<String>, LlmError> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = decode_event(&rest)?;
        if rest.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.process_event(rest.trim())
    }

    pub fn finish(self) -> Result<AssistantMessage, LlmError> {
        let mut pending = self.tool_calls;
        pending.sort_by_key(|(index, _)| *index);

        let mut calls = Vec::with_capacity(pending.len());
        for (_, call) in pending {
            let arguments = parse_arguments(&call.name, &call.arguments)?;
            let id = call.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            calls.push(ToolCall::new(id, call.name, arguments));
        }
        Ok(AssistantMessage::new(self.text, calls))
    }

    fn process_event(&mut self, event: &str) -> Result<Vec<String>, LlmError> {
        let mut deltas = Vec::new();
        for line in event.lines() {
            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data.is_empty() || self.done {
                continue;
            }
            if data == "[DONE]" {
                self.done = true;
                continue;
            }

            let chunk = serde_json::from_str::<ChatCompletionChunk>(data)
                .map_err(|error| LlmError::Fatal(format!("malformed stream chunk: {error}")))?;
            if let Some(error) = chunk.error {
                return Err(classify_http_error(200, &serde_json::json!({ "error": error }).to_string()));
            }

            for choice in chunk.choices {
                if let Some(content) = choice.delta.content.filter(|content| !content.is_empty()) {
                    self.text.push_str(&content);
                    deltas.push(content);
                }
                for fragment in choice.delta.tool_calls.unwrap_or_default() {
                    self.merge_fragment(fragment);
                }
            }
        }
        Ok(deltas)
    }

    fn merge_fragment(&mut self, fragment: ChunkToolCall) {
        let index = fragment.index.unwrap_or(self.tool_calls.len());
        let position = match self.tool_calls.iter().position(|(existing, _)| *existing == index) {
            Some(position) => position,
            None => {
                self.tool_calls.push((index, PendingToolCall::default()));
                self.tool_calls.len() - 1
            }
        };
        let pending = &mut self.tool_calls[position].1;
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            pending.id = Some(id);
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                pending.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                pending.arguments.push_str(&arguments);
            }
        }
    }
}

fn parse_arguments(tool: &str, raw: &str) -> Result<Map<String, Value>, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(other) => Err(LlmError::Validation(format!(
            "arguments for `{tool}` must be a JSON object, got `{other}`"
        ))),
        Err(error) => Err(LlmError::Validation(format!(
            "arguments for `{tool}` are not valid JSON: {error}"
        ))),
    }
}
