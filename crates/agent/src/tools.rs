use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use toolgate_core::catalog::{ToolCatalog, ToolSpec};
use toolgate_core::domain::{ToolCall, ToolResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolErrorKind {
    DivisionByZero,
    InvalidOperation,
    InvalidArguments,
    InvalidDateFormat,
    InvalidTimezone,
    FileNotFound,
    UnsupportedConversion,
    ApiKeyMissing,
    CityNotFound,
    NetworkError,
    SearchFailed,
    Timeout,
    UnknownTool,
    UnexpectedError,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DivisionByZero => "division_by_zero",
            Self::InvalidOperation => "invalid_operation",
            Self::InvalidArguments => "invalid_arguments",
            Self::InvalidDateFormat => "invalid_date_format",
            Self::InvalidTimezone => "invalid_timezone",
            Self::FileNotFound => "file_not_found",
            Self::UnsupportedConversion => "unsupported_conversion",
            Self::ApiKeyMissing => "api_key_missing",
            Self::CityNotFound => "city_not_found",
            Self::NetworkError => "network_error",
            Self::SearchFailed => "search_failed",
            Self::Timeout => "timeout",
            Self::UnknownTool => "unknown_tool",
            Self::UnexpectedError => "unexpected_error",
        }
    }
}

/// Structured status object returned by every tool; tools never fail by panicking or erroring.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    Success(Map<String, Value>),
    Error { kind: ToolErrorKind, message: String },
}

impl ToolOutcome {
    pub fn success(fields: Value) -> Self {
        match fields {
            Value::Object(map) => Self::Success(map),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                Self::Success(map)
            }
        }
    }

    pub fn error(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self::Error { kind, message: message.into() }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(fields) => {
                let mut object = Map::with_capacity(fields.len() + 1);
                object.insert("status".to_string(), json!("success"));
                for (key, value) in fields {
                    if key != "status" {
                        object.insert(key.clone(), value.clone());
                    }
                }
                Value::Object(object)
            }
            Self::Error { kind, message } => json!({
                "status": "error",
                "error_type": kind.as_str(),
                "message": message,
            }),
        }
    }

    /// Text recorded as the tool result content.
    pub fn to_content(&self) -> String {
        self.to_value().to_string()
    }

    pub fn to_result(&self, call: &ToolCall) -> ToolResult {
        ToolResult { call_id: call.id.clone(), tool_name: call.name.clone(), text: self.to_content() }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// One-line summary shown to the intent classifier.
    fn short_description(&self) -> &'static str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, arguments: &Map<String, Value>) -> ToolOutcome;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            self.name(),
            self.description(),
            self.short_description(),
            self.parameters_schema(),
        )
    }
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalog in registration order.
    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog::new(
            self.order.iter().filter_map(|name| self.tools.get(name)).map(|tool| tool.spec()),
        )
    }
}
