use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{invalid, string_arg};
use crate::tools::{Tool, ToolErrorKind, ToolOutcome};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Current wall-clock time in an IANA timezone.
pub struct CurrentTime;

impl CurrentTime {
    fn describe(arguments: &Map<String, Value>, now: DateTime<Utc>) -> Result<ToolOutcome, ToolOutcome> {
        let timezone = match arguments.get("timezone") {
            None | Some(Value::Null) => "UTC",
            Some(_) => string_arg(arguments, "timezone")?,
        };
        let Ok(zone) = timezone.parse::<Tz>() else {
            return Ok(ToolOutcome::error(
                ToolErrorKind::InvalidTimezone,
                format!("Invalid timezone '{timezone}'. Use an IANA name such as 'Europe/Paris'"),
            ));
        };

        let local = zone.from_utc_datetime(&now.naive_utc());
        Ok(ToolOutcome::success(json!({
            "timezone": timezone,
            "datetime": local.format("%Y-%m-%d %H:%M:%S").to_string(),
            "date": local.format(DATE_FORMAT).to_string(),
            "time": local.format("%H:%M:%S").to_string(),
            "day_of_week": local.format("%A").to_string(),
            "iso_format": local.to_rfc3339(),
        })))
    }
}

#[async_trait]
impl Tool for CurrentTime {
    fn name(&self) -> &'static str {
        "get_current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time in a timezone (IANA name, defaults to UTC)."
    }

    fn short_description(&self) -> &'static str {
        "Get the current date and time in a timezone."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone such as 'UTC' or 'America/New_York'",
                    "default": "UTC"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        Self::describe(arguments, Utc::now()).unwrap_or_else(|error| error)
    }
}

/// Adds days to or subtracts days from a calendar date.
pub struct DateCalculator;

impl DateCalculator {
    fn evaluate(arguments: &Map<String, Value>) -> Result<ToolOutcome, ToolOutcome> {
        let start = string_arg(arguments, "start_date")?;
        let operation = string_arg(arguments, "operation")?;
        let days = days_arg(arguments)?;

        let Ok(start_date) = NaiveDate::parse_from_str(start.trim(), DATE_FORMAT) else {
            return Ok(ToolOutcome::error(
                ToolErrorKind::InvalidDateFormat,
                "Invalid date format. Use YYYY-MM-DD (e.g., 2024-01-15)",
            ));
        };
        let offset = match operation.to_ascii_lowercase().as_str() {
            "add" => days,
            "subtract" => days.checked_neg().ok_or_else(|| invalid("days", "within range"))?,
            _ => {
                return Ok(ToolOutcome::error(
                    ToolErrorKind::InvalidOperation,
                    format!("Invalid operation '{operation}'. Use 'add' or 'subtract'"),
                ));
            }
        };
        let result = chrono::Duration::try_days(offset)
            .and_then(|delta| start_date.checked_add_signed(delta))
            .ok_or_else(|| invalid("days", "small enough to stay within the calendar"))?;

        debug!(event_name = "tool.date_calculator.evaluated", operation, days, "calculated");
        Ok(ToolOutcome::success(json!({
            "start_date": start_date.format(DATE_FORMAT).to_string(),
            "operation": operation.to_ascii_lowercase(),
            "days": days,
            "result_date": result.format(DATE_FORMAT).to_string(),
            "day_of_week": result.format("%A").to_string(),
        })))
    }
}

fn days_arg(arguments: &Map<String, Value>) -> Result<i64, ToolOutcome> {
    match arguments.get("days") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(number)) => number.as_i64().ok_or_else(|| invalid("days", "an integer")),
        Some(Value::String(text)) => text.trim().parse::<i64>().map_err(|_| invalid("days", "an integer")),
        Some(_) => Err(invalid("days", "an integer")),
    }
}

#[async_trait]
impl Tool for DateCalculator {
    fn name(&self) -> &'static str {
        "date_calculator"
    }

    fn description(&self) -> &'static str {
        "Add days to or subtract days from a date given as YYYY-MM-DD."
    }

    fn short_description(&self) -> &'static str {
        "Add or subtract days from a date."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start_date": {"type": "string", "description": "Start date in YYYY-MM-DD format"},
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract"],
                    "description": "Whether to add or subtract days"
                },
                "days": {"type": "integer", "description": "Number of days", "default": 0}
            },
            "required": ["start_date", "operation"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        Self::evaluate(arguments).unwrap_or_else(|error| error)
    }
}
