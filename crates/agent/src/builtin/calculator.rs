use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{number_arg, number_value, string_arg};
use crate::tools::{Tool, ToolErrorKind, ToolOutcome};

pub struct Calculator;

impl Calculator {
    fn evaluate(arguments: &Map<String, Value>) -> Result<ToolOutcome, ToolOutcome> {
        let first = number_arg(arguments, "first_num")?;
        let second = number_arg(arguments, "second_num")?;
        let operation = string_arg(arguments, "operation")?;

        let result = match operation {
            "add" => first + second,
            "sub" => first - second,
            "mul" => first * second,
            "div" if second == 0.0 => {
                return Ok(ToolOutcome::error(
                    ToolErrorKind::DivisionByZero,
                    "Division by zero is not allowed",
                ));
            }
            "div" => first / second,
            other => {
                return Ok(ToolOutcome::error(
                    ToolErrorKind::InvalidOperation,
                    format!("Unsupported operation '{other}'. Use: add, sub, mul, div"),
                ));
            }
        };

        debug!(event_name = "tool.calculator.evaluated", operation, result, "calculated");
        Ok(ToolOutcome::success(json!({
            "first_num": number_value(first),
            "second_num": number_value(second),
            "operation": operation,
            "result": number_value(result),
        })))
    }
}

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn description(&self) -> &'static str {
        "Perform a basic arithmetic operation (add, sub, mul, div) on two numbers."
    }

    fn short_description(&self) -> &'static str {
        "Perform a basic arithmetic operation on two numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "first_num": {"type": "number", "description": "First operand"},
                "second_num": {"type": "number", "description": "Second operand"},
                "operation": {
                    "type": "string",
                    "enum": ["add", "sub", "mul", "div"],
                    "description": "Operation to perform"
                }
            },
            "required": ["first_num", "second_num", "operation"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        Self::evaluate(arguments).unwrap_or_else(|error| error)
    }
}
